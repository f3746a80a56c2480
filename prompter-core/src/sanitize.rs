// ABOUTME: Turns raw model output into plain text that a live chat will accept.
// ABOUTME: Strips markdown, collapses whitespace, and caps length by code points.

use once_cell::sync::Lazy;
use regex::Regex;

/// Appended when a reply is cut to fit the length cap
pub const TRUNCATION_SUFFIX: &str = "...";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("sanitizer pattern is valid")
}

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| compile(r"(?s)```.*?```|~~~.*?~~~"));
static FENCE_MARKER: Lazy<Regex> = Lazy::new(|| compile(r"```[\w+-]*|~~~"));
static BOLD_STAR: Lazy<Regex> = Lazy::new(|| compile(r"\*\*(\S(?:[^*\n]*?\S)?)\*\*"));
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| compile(r"\*(\S(?:[^*\n]*?\S)?)\*"));
static BOLD_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| compile(r"(^|\W)__(\S(?:[^_\n]*?\S)?)__(\W|$)"));
static ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| compile(r"(^|\W)_(\S(?:[^_\n]*?\S)?)_(\W|$)"));
static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| compile(r"~~(\S(?:[^~\n]*?\S)?)~~"));
static LINE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|>[ \t]*|[-*+][ \t]+|\d+[.)][ \t]+)+")
});
static LINE_EDGES: Lazy<Regex> = Lazy::new(|| compile(r"[ \t]*\n[ \t]*"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| compile(r"\n{2,}"));
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| compile(r"[ \t]{2,}"));

// Punctuation outside ASCII that should not count as content on its own
const WIDE_PUNCTUATION: &[char] = &[
    '…', '、', '。', '・', '「', '」', '『', '』', '！', '？', '～', '（', '）', '“', '”', '‘', '’',
    '—', '–',
];

/// Convert raw model output into chat-safe text of at most `cap` code points
pub fn sanitize(raw: &str, cap: usize) -> String {
    let text = raw.replace("\r\n", "\n");

    let text = FENCED_BLOCK.replace_all(&text, "\n");
    let text = FENCE_MARKER.replace_all(&text, "");
    let text = until_stable(&text, unwrap_code_spans);

    let text = BOLD_STAR.replace_all(&text, "${1}");
    let text = ITALIC_STAR.replace_all(&text, "${1}");
    let text = until_stable(&text, |t| underscore_pass(&BOLD_UNDERSCORE, t));
    let text = until_stable(&text, |t| underscore_pass(&ITALIC_UNDERSCORE, t));
    let text = STRIKETHROUGH.replace_all(&text, "${1}");

    let text = LINE_MARKERS.replace_all(&text, "");

    let text = LINE_EDGES.replace_all(&text, "\n");
    let text = BLANK_LINES.replace_all(&text, "\n");
    let text = SPACE_RUNS.replace_all(&text, " ");

    truncate(text.trim(), cap)
}

/// Groups streamed deltas into segments that can be sanitized on their own.
///
/// A segment ends at a line break or a sentence end, never inside a fenced
/// block, so markup opened in one delta is closed before the text is cut.
#[derive(Debug, Default)]
pub struct ReplySegmenter {
    pending: String,
    flushed: bool,
}

impl ReplySegmenter {
    /// Append a delta and return everything up to the last complete boundary
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.pending.push_str(delta);
        let end = last_boundary(&self.pending)?;
        let rest = self.pending.split_off(end);
        self.flushed = true;
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Text still owed once the reply is complete.
    ///
    /// Before any segment was flushed this is the whole reply; afterwards it
    /// is the unflushed tail, or None when that tail is blank.
    pub fn finish(&mut self, full_text: String) -> Option<String> {
        let flushed = std::mem::take(&mut self.flushed);
        let rest = std::mem::take(&mut self.pending);
        if !flushed {
            return Some(full_text);
        }
        (!rest.trim().is_empty()).then_some(rest)
    }

    /// Drop any unflushed text
    pub fn reset(&mut self) {
        self.pending.clear();
        self.flushed = false;
    }
}

fn last_boundary(text: &str) -> Option<usize> {
    let mut boundary = None;
    let mut in_fence = false;
    let mut prev = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let rest = &text[i..];
        if rest.starts_with("```") || rest.starts_with("~~~") {
            in_fence = !in_fence;
            chars.next();
            chars.next();
            prev = Some(c);
            continue;
        }
        if !in_fence {
            let end = i + c.len_utf8();
            let followed_by_space = chars.peek().is_some_and(|&(_, next)| next.is_whitespace());
            match c {
                '\n' | '。' | '！' | '？' => boundary = Some(end),
                // "1. " opens a list item rather than ending a sentence
                '.' if followed_by_space && !prev.is_some_and(|p: char| p.is_ascii_digit()) => {
                    boundary = Some(end)
                }
                '!' | '?' if followed_by_space => boundary = Some(end),
                _ => {}
            }
        }
        prev = Some(c);
    }
    boundary
}

/// Whether sanitized text carries anything worth posting
pub fn is_postable(text: &str) -> bool {
    text.chars().any(|c| {
        c.is_alphanumeric()
            || (!c.is_ascii() && !c.is_whitespace() && !WIDE_PUNCTUATION.contains(&c))
    })
}

// Unwrapping can expose spans that were nested inside longer ones, and
// adjacent underscore spans share their boundary character, so one pass
// is not always enough.
fn until_stable(text: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = text.to_string();
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn underscore_pass(re: &Regex, text: &str) -> String {
    re.replace_all(text, "${1}${2}${3}").into_owned()
}

/// Replace each code span with its contents.
///
/// A span opens with a run of backticks and closes at the next run of the
/// same length on that line. A run with no partner is kept as literal text.
fn unwrap_code_spans(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            let next = text[i..].find('`').map_or(text.len(), |p| i + p);
            out.push_str(&text[i..next]);
            i = next;
            continue;
        }

        let open = backtick_run(bytes, i);
        let body_start = i + open;
        match closing_run(bytes, body_start, open) {
            Some(close) => {
                out.push_str(trim_padding(&text[body_start..close]));
                i = close + open;
            }
            None => {
                out.push_str(&text[i..body_start]);
                i = body_start;
            }
        }
    }
    out
}

fn backtick_run(bytes: &[u8], start: usize) -> usize {
    bytes[start..].iter().take_while(|&&b| b == b'`').count()
}

fn closing_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() && bytes[j] != b'\n' {
        if bytes[j] != b'`' {
            j += 1;
            continue;
        }
        let run = backtick_run(bytes, j);
        if run == len {
            return Some(j);
        }
        j += run;
    }
    None
}

// One space on each side is padding, unless the body is nothing but spaces
fn trim_padding(body: &str) -> &str {
    match body.strip_prefix(' ').and_then(|b| b.strip_suffix(' ')) {
        Some(inner) if !inner.trim().is_empty() => inner,
        _ => body,
    }
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }

    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    if cap < suffix_len {
        return text.chars().take(cap).collect();
    }

    let kept: String = text.chars().take(cap - suffix_len).collect();
    format!("{}{}", kept.trim_end(), TRUNCATION_SUFFIX)
}
