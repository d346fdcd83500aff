//! Metadata Fetcher
//!
//! Wraps `yt-dlp --dump-json` to resolve a URL (or search query) into a
//! `MediaInfo` record for preview and format selection. Never downloads
//! media; the coordinator owns that.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::models::{FormatOption, MediaInfo};

/// Where to find yt-dlp and how long to wait for metadata.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Absolute path to the `yt-dlp` binary.
    pub yt_dlp_path: PathBuf,

    /// Optional extra arguments injected into every call (e.g. proxy).
    pub global_args: Vec<String>,

    /// Timeout for metadata calls (not for downloads).
    pub metadata_timeout: Duration,
}

impl YtDlpConfig {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self {
            yt_dlp_path,
            global_args: vec![],
            metadata_timeout: Duration::from_secs(30),
        }
    }
}

/// Fetch failures surfaced to the user. The message for `Extraction` comes
/// straight from yt-dlp's stderr; callers surface it and leave any previously
/// displayed media untouched.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("no URL or search query entered")]
    EmptyInput,

    #[error("yt-dlp not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to run yt-dlp: {0}")]
    Spawn(String),

    #[error("metadata fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("yt-dlp returned invalid JSON: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    Extraction(String),
}

/// Primary runner for metadata lookups.
#[derive(Debug, Clone)]
pub struct YtDlpRunner {
    cfg: YtDlpConfig,
}

impl YtDlpRunner {
    pub fn new(cfg: YtDlpConfig) -> Self {
        Self { cfg }
    }

    pub fn yt_dlp_path(&self) -> &Path {
        &self.cfg.yt_dlp_path
    }

    /// Fetch metadata for a URL via `yt-dlp --dump-json`.
    ///
    /// The only local validation is non-empty input; anything yt-dlp accepts
    /// (including `ytsearch:` queries) is passed through. Blocks for up to
    /// the configured timeout while the extractor talks to the network.
    pub async fn fetch_media(&self, input: &str) -> Result<MediaInfo, FetchError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(FetchError::EmptyInput);
        }

        let args = vec![
            "--dump-json".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            input.to_string(),
        ];

        let json_line = self
            .exec_first_json_line(&args, self.cfg.metadata_timeout)
            .await?;
        parse_media_info(&json_line, input)
    }

    /// Execute yt-dlp and return the first stdout line that parses as a JSON
    /// object. Captures bounded stderr for error reporting; fails on non-zero
    /// exit with the extractor's own error line as the message.
    async fn exec_first_json_line(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, FetchError> {
        // Check existence early for a nicer error than a spawn failure.
        if !self.cfg.yt_dlp_path.exists() {
            return Err(FetchError::NotFound(self.cfg.yt_dlp_path.clone()));
        }

        let mut cmd = Command::new(&self.cfg.yt_dlp_path);
        cmd.args(&self.cfg.global_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Hide console window on Windows
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| FetchError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Spawn("failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Spawn("failed to capture yt-dlp stderr".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        // Bound log capture to avoid unbounded memory use.
        const MAX_STDERR_LINES: usize = 2_000;

        let mut stderr_lines: Vec<String> = Vec::new();
        let mut json_lines: Vec<String> = Vec::new();

        let read_task = async {
            loop {
                tokio::select! {
                    line = stdout_reader.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                if looks_like_json_object(&l) {
                                    json_lines.push(l);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                return Err(FetchError::Spawn(format!(
                                    "error reading yt-dlp stdout: {e}"
                                )))
                            }
                        }
                    }
                    line = stderr_reader.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                if stderr_lines.len() < MAX_STDERR_LINES {
                                    stderr_lines.push(l);
                                }
                            }
                            Ok(None) => {
                                // stdout might still have data; break when it closes.
                            }
                            Err(e) => {
                                return Err(FetchError::Spawn(format!(
                                    "error reading yt-dlp stderr: {e}"
                                )))
                            }
                        }
                    }
                }
            }
            Ok::<(), FetchError>(())
        };

        let timed = tokio::time::timeout(timeout, read_task).await;
        if timed.is_err() {
            let _ = child.kill().await;
            return Err(FetchError::Timeout(timeout));
        }
        timed.unwrap()?;

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::Spawn(e.to_string()))?;

        if !status.success() {
            return Err(FetchError::Extraction(extraction_message(&stderr_lines)));
        }

        json_lines
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::InvalidJson("yt-dlp returned no JSON output".to_string()))
    }
}

fn looks_like_json_object(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('{') && t.ends_with('}')
}

/// Pull the most useful human-readable line out of yt-dlp stderr. yt-dlp
/// prefixes fatal problems with "ERROR:".
fn extraction_message(stderr_lines: &[String]) -> String {
    let error_line = stderr_lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string());

    match error_line {
        Some(msg) if !msg.is_empty() => msg,
        _ => stderr_lines
            .last()
            .cloned()
            .unwrap_or_else(|| "yt-dlp failed without error output".to_string()),
    }
}

/// Parse one `--dump-json` object into a `MediaInfo`.
///
/// Every optional field stays `None` unless the extractor supplied it.
/// Format entries without a `format_id` are skipped rather than failing the
/// whole fetch.
fn parse_media_info(json_line: &str, fallback_url: &str) -> Result<MediaInfo, FetchError> {
    let v: Value =
        serde_json::from_str(json_line).map_err(|e| FetchError::InvalidJson(e.to_string()))?;

    let webpage_url = v
        .get("webpage_url")
        .and_then(|x| x.as_str())
        .unwrap_or(fallback_url)
        .to_string();

    let formats = v
        .get("formats")
        .and_then(|x| x.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    serde_json::from_value::<FormatOption>(entry.clone())
                        .ok()
                        .filter(|f| !f.format_id.is_empty())
                })
                .collect()
        })
        .unwrap_or_default();

    // yt-dlp reports `channel` for most sites and `uploader` for the rest.
    let channel = str_field(&v, "channel").or_else(|| str_field(&v, "uploader"));
    let channel_url = str_field(&v, "channel_url").or_else(|| str_field(&v, "uploader_url"));

    Ok(MediaInfo {
        webpage_url,
        title: str_field(&v, "title"),
        channel,
        channel_url,
        channel_follower_count: u64_field(&v, "channel_follower_count"),
        channel_is_verified: v.get("channel_is_verified").and_then(|x| x.as_bool()),
        comment_count: u64_field(&v, "comment_count"),
        like_count: u64_field(&v, "like_count"),
        view_count: u64_field(&v, "view_count"),
        upload_date: str_field(&v, "upload_date"),
        duration_string: str_field(&v, "duration_string"),
        thumbnail_url: str_field(&v, "thumbnail"),
        description: str_field(&v, "description"),
        formats,
    })
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn u64_field(v: &Value, key: &str) -> Option<u64> {
    v.get(key)
        .and_then(|x| x.as_u64())
        .or_else(|| v.get(key).and_then(|x| x.as_f64()).map(|f| f as u64))
}
