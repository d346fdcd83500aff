//! Thumbnail retrieval
//!
//! Fetches preview images over HTTP for the history thumbnail cache. A
//! truncated or failed read is retried up to a configured number of attempts;
//! after that the caller proceeds without a thumbnail.

use std::time::Duration;

use anyhow::{anyhow, Result};

/// Default number of fetch attempts before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Download raw thumbnail bytes, retrying up to `attempts` times.
///
/// A response shorter than its declared `Content-Length` counts as a failed
/// attempt, same as a transport error.
pub async fn fetch_thumbnail(url: &str, attempts: u32) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match fetch_once(&client, url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                log::warn!("thumbnail fetch attempt {attempt}/{attempts} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("thumbnail fetch failed")))
}

async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?.error_for_status()?;
    let expected = response.content_length();
    let bytes = response.bytes().await?;

    if let Some(expected) = expected {
        if (bytes.len() as u64) < expected {
            return Err(anyhow!(
                "truncated read: got {} of {} bytes",
                bytes.len(),
                expected
            ));
        }
    }

    Ok(bytes.to_vec())
}

/// File extension for the cache file, guessed from the URL path. yt-dlp
/// thumbnails are almost always jpg or webp.
pub fn extension_for_url(url: &str) -> &'static str {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");

    match path.rsplit('.').next() {
        Some("png") => "png",
        Some("webp") => "webp",
        Some("gif") => "gif",
        Some("jpeg") | Some("jpg") => "jpg",
        _ => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_plain_url() {
        assert_eq!(extension_for_url("https://i.example.com/vi/abc/hq720.webp"), "webp");
        assert_eq!(extension_for_url("https://i.example.com/vi/abc/0.jpg"), "jpg");
        assert_eq!(extension_for_url("https://i.example.com/thumb.jpeg"), "jpg");
    }

    #[test]
    fn extension_ignores_query_and_fragment() {
        assert_eq!(
            extension_for_url("https://i.example.com/t.png?sqp=xyz&rs=abc"),
            "png"
        );
        assert_eq!(extension_for_url("https://i.example.com/t.webp#frag"), "webp");
    }

    #[test]
    fn extension_defaults_to_jpg() {
        assert_eq!(extension_for_url("https://i.example.com/no-extension"), "jpg");
        assert_eq!(extension_for_url(""), "jpg");
    }
}
