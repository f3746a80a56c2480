// ABOUTME: Main entry point for the prompter CLI.
// ABOUTME: Loads configuration, initializes logging, and dispatches to the auth or run command.

use clap::Parser;
use prompter::commands::{self, Cli, Command};
use prompter::config::Config;
use prompter::logging::{self, LogOptions};
use prompter::paths;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! prompter crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = logging::init_logging(&LogOptions {
        filter: config.logging.filter.clone(),
        json: cli.log_json || config.logging.json,
        file_dir: config.logging.file.then(paths::log_dir),
    });

    tracing::debug!(config = ?config, "Configuration loaded");

    let result = match cli.command {
        Command::Auth(args) => commands::auth::run(config, args).await,
        Command::Run(args) => commands::run::run(config, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "prompter failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
