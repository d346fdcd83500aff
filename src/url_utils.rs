//! Input normalization
//!
//! The URL field accepts anything yt-dlp accepts: an http(s) URL (possibly
//! pasted with surrounding punctuation) or a free-text search query. URLs are
//! cleaned and normalized; anything else passes through verbatim.

use url::Url;

/// What the user typed, after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchInput {
    /// A normalized http(s) URL.
    Url(String),
    /// Free text handed to yt-dlp's default search.
    Query(String),
}

impl FetchInput {
    /// The string passed to yt-dlp.
    pub fn as_str(&self) -> &str {
        match self {
            FetchInput::Url(s) | FetchInput::Query(s) => s,
        }
    }
}

/// Classify and normalize raw input. Returns `None` only for empty/blank
/// text; no other local validation is applied.
pub fn prepare_input(text: &str) -> Option<FetchInput> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let cleaned = trim_trailing_punct(trimmed);
        if let Some(normalized) = normalize_http_url(cleaned) {
            return Some(FetchInput::Url(normalized));
        }
        // Looks like a URL but does not parse; let yt-dlp produce the error.
        return Some(FetchInput::Url(cleaned.to_string()));
    }

    Some(FetchInput::Query(trimmed.to_string()))
}

/// Normalize a presumed http(s) URL.
///
/// - Only accepts http/https
/// - Strips fragments (`#...`), which are meaningless for downloads
/// - Relies on the `url` crate for scheme/host lowercasing and default-port
///   removal
pub fn normalize_http_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }

    url.set_fragment(None);

    Some(url.to_string())
}

/// Trim common trailing punctuation which frequently appears in pasted text.
///
/// Example: `https://example.com/foo),` -> `https://example.com/foo`
fn trim_trailing_punct(s: &str) -> &str {
    let mut end = s.len();

    while end > 0 {
        let ch = s[..end].chars().last().unwrap();
        let should_trim = matches!(
            ch,
            ')' | ']' | '}' | '>' | ',' | '.' | ';' | ':' | '!' | '?' | '"' | '\''
        );

        if !should_trim {
            break;
        }

        end -= ch.len_utf8();
    }

    &s[..end]
}
