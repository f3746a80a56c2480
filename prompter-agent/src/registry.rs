// ABOUTME: Registry pattern for runtime provider selection.
// ABOUTME: Providers register factories, prompter creates one by name from config.

use crate::traits::AiProvider;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory function that creates a provider from config
pub type ProviderFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn AiProvider>> + Send + Sync>;

/// Registry for runtime provider selection
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn AiProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a provider by name with the given config
    pub fn create(&self, name: &str, config: &Value) -> Result<Arc<dyn AiProvider>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown provider: {} (available: {})",
                name,
                self.available().join(", ")
            )
        })?;
        tracing::debug!(provider = %name, "Creating AI provider");
        factory(config)
    }

    /// Create the provider named by the `"provider"` key of a settings object.
    ///
    /// The whole object is handed to the factory, so provider-specific keys
    /// sit beside the name.
    pub fn create_from_settings(&self, settings: &Value) -> Result<Arc<dyn AiProvider>> {
        let name = settings
            .get("provider")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("provider settings are missing 'provider'"))?;
        self.create(name, settings)
    }

    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        use crate::backends::gemini::GeminiProvider;
        use crate::backends::mock::MockProvider;

        Self::new()
            .register("mock", MockProvider::factory())
            .register("gemini", GeminiProvider::factory())
    }
}
