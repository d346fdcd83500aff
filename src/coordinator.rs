//! Download Coordinator
//!
//! Executes one download at a time with yt-dlp on a background task, parses
//! progress from its output, and relays ordered job events to the frontend
//! channel. On terminal success it writes the history row and caches the
//! thumbnail before reporting completion; on failure nothing is persisted.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing when spawning processes.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use anyhow::{anyhow, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::events::{DownloadFailure, ErrorCode, JobEvent, ProgressSnapshot};
use crate::history::Db;
use crate::models::{DownloadRequest, MediaSummary, NewHistoryRecord};
use crate::thumbs;

/// Tag prefixed to our custom progress-template lines so they are trivially
/// distinguishable from yt-dlp's own output.
const PROGRESS_TAG: &str = "[vidvault]";

/// Configuration for download execution.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: Option<PathBuf>,

    /// yt-dlp output template appended to the request's destination directory.
    pub filename_template: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: find_ytdlp_binary(),
            ffmpeg_path: find_ffmpeg_binary(),
            filename_template: "%(title)s [%(id)s].%(ext)s".to_string(),
        }
    }
}

/// Find yt-dlp by checking a bundled sidecar next to the executable, then
/// `which`, then common installation paths. Bundled desktop apps don't see
/// the user's full PATH, so the probing matters.
pub fn find_ytdlp_binary() -> PathBuf {
    if let Some(sidecar) = sidecar_path("yt-dlp") {
        log::info!("found bundled yt-dlp sidecar at {}", sidecar.display());
        return sidecar;
    }

    if let Ok(found) = which::which("yt-dlp") {
        log::info!("found yt-dlp at {}", found.display());
        return found;
    }

    for candidate in expand_common_paths(&[
        "/opt/homebrew/bin/yt-dlp",
        "/usr/local/bin/yt-dlp",
        "/usr/bin/yt-dlp",
        "/opt/local/bin/yt-dlp",
        "$HOME/.local/bin/yt-dlp",
    ]) {
        if candidate.exists() {
            log::info!("found yt-dlp at {}", candidate.display());
            return candidate;
        }
    }

    // Last resort - hope it's in PATH at spawn time.
    log::warn!("could not find yt-dlp, falling back to PATH lookup");
    PathBuf::from("yt-dlp")
}

/// Find ffmpeg the same way; absence is tolerated (merging/conversion will
/// rely on whatever yt-dlp can locate itself).
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    if let Some(sidecar) = sidecar_path("ffmpeg") {
        log::info!("found bundled ffmpeg sidecar at {}", sidecar.display());
        return Some(sidecar);
    }

    if let Ok(found) = which::which("ffmpeg") {
        log::info!("found ffmpeg at {}", found.display());
        return Some(found);
    }

    for candidate in expand_common_paths(&[
        "/opt/homebrew/bin/ffmpeg",
        "/usr/local/bin/ffmpeg",
        "/usr/bin/ffmpeg",
        "/opt/local/bin/ffmpeg",
    ]) {
        if candidate.exists() {
            log::info!("found ffmpeg at {}", candidate.display());
            return Some(candidate);
        }
    }

    log::warn!("could not find ffmpeg");
    None
}

fn sidecar_path(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?;

    let beside = dir.join(name);
    if beside.exists() {
        return Some(beside);
    }

    // macOS .app bundles keep helpers under Contents/Resources.
    let resources = dir.parent()?.join("Resources").join(name);
    if resources.exists() {
        return Some(resources);
    }

    None
}

fn expand_common_paths(templates: &[&str]) -> Vec<PathBuf> {
    templates
        .iter()
        .filter_map(|t| {
            if let Some(rest) = t.strip_prefix("$HOME") {
                let home = std::env::var_os("HOME")?;
                Some(PathBuf::from(format!(
                    "{}{rest}",
                    home.to_string_lossy()
                )))
            } else {
                Some(PathBuf::from(t))
            }
        })
        .collect()
}

/// Runs downloads and owns the single active-job slot.
///
/// One job at a time: `start` refuses while a prior job has not reached a
/// terminal event. The frontend additionally disables its trigger control
/// until it observes `Finished`/`Failed`.
pub struct DownloadCoordinator {
    config: DownloadConfig,
    db: Arc<Mutex<Db>>,
    event_tx: mpsc::Sender<JobEvent>,
    active: Arc<RwLock<Option<Uuid>>>,
    thumbnail_attempts: u32,
}

impl DownloadCoordinator {
    pub fn new(
        config: DownloadConfig,
        db: Arc<Mutex<Db>>,
        event_tx: mpsc::Sender<JobEvent>,
        thumbnail_attempts: u32,
    ) -> Self {
        Self {
            config,
            db,
            event_tx,
            active: Arc::new(RwLock::new(None)),
            thumbnail_attempts,
        }
    }

    /// Accept a request and hand it to a background task. Returns the job id;
    /// all further signals arrive on the event channel, ending with exactly
    /// one terminal event.
    pub async fn start(&self, request: DownloadRequest, media: MediaSummary) -> Result<Uuid> {
        let id = Uuid::new_v4();
        {
            let mut active = self.active.write().await;
            if let Some(existing) = *active {
                return Err(anyhow!("download {existing} is still in progress"));
            }
            *active = Some(id);
        }

        let _ = self
            .event_tx
            .send(JobEvent::Queued {
                id,
                url: request.source_url.clone(),
            })
            .await;

        let config = self.config.clone();
        let db = self.db.clone();
        let event_tx = self.event_tx.clone();
        let active = self.active.clone();
        let thumbnail_attempts = self.thumbnail_attempts;

        tokio::spawn(async move {
            let result = execute_download(id, &request, &config, event_tx.clone()).await;

            match result {
                Ok(final_path) => {
                    finish_job(
                        id,
                        &request,
                        media,
                        final_path,
                        db,
                        event_tx,
                        thumbnail_attempts,
                    )
                    .await;
                }
                Err(failure) => {
                    log::error!("download {id} failed: {failure}");
                    let _ = event_tx.send(JobEvent::Failed { id, error: failure }).await;
                }
            }

            *active.write().await = None;
        });

        Ok(id)
    }

    /// Whether a job is currently between `Queued` and its terminal event.
    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    pub async fn active_job(&self) -> Option<Uuid> {
        *self.active.read().await
    }
}

/// Persist the completed job, cache its thumbnail, then report completion.
/// The history insert happens-before the `Finished` event; the thumbnail is
/// best-effort and its failure only logs.
async fn finish_job(
    id: Uuid,
    request: &DownloadRequest,
    media: MediaSummary,
    final_path: Option<String>,
    db: Arc<Mutex<Db>>,
    event_tx: mpsc::Sender<JobEvent>,
    thumbnail_attempts: u32,
) {
    // Recorded path contract: the resolved output file when we saw one in
    // yt-dlp's output, else the destination directory.
    let path = final_path.unwrap_or_else(|| request.dest_dir.display().to_string());

    let record = NewHistoryRecord {
        name: media
            .title
            .clone()
            .unwrap_or_else(|| request.source_url.clone()),
        channel: media.channel.clone().unwrap_or_default(),
        duration: media.duration.clone().unwrap_or_default(),
        url: request.source_url.clone(),
        path: path.clone(),
        quality: request.quality_label.clone(),
    };

    let inserted = {
        let mut db = db.lock().await;
        db.insert_history(&record)
    };

    let history_id = match inserted {
        Ok(history_id) => history_id,
        Err(e) => {
            log::error!("download {id} succeeded but history insert failed: {e}");
            let _ = event_tx
                .send(JobEvent::Failed {
                    id,
                    error: DownloadFailure::new(
                        ErrorCode::OutputWriteFailed,
                        format!("Downloaded, but failed to record history: {e}"),
                    ),
                })
                .await;
            return;
        }
    };

    if let Some(thumb_url) = media.thumbnail_url.as_deref() {
        match thumbs::fetch_thumbnail(thumb_url, thumbnail_attempts).await {
            Ok(bytes) => {
                let ext = thumbs::extension_for_url(thumb_url);
                let db = db.lock().await;
                if let Err(e) = db.cache_thumbnail(history_id, ext, &bytes) {
                    log::warn!("thumbnail cache write failed for history {history_id}: {e}");
                }
            }
            Err(e) => {
                log::warn!("leaving thumbnail unset for history {history_id}: {e}");
            }
        }
    }

    let _ = event_tx
        .send(JobEvent::Finished {
            id,
            path,
            history_id,
        })
        .await;
}

/// Run yt-dlp for one request, relaying progress events. Returns the final
/// saved path when one was observed in the output.
async fn execute_download(
    id: Uuid,
    request: &DownloadRequest,
    config: &DownloadConfig,
    event_tx: mpsc::Sender<JobEvent>,
) -> Result<Option<String>, DownloadFailure> {
    let output_template = request.dest_dir.join(&config.filename_template);

    let mut args = vec![
        "--newline".to_string(),
        "--no-warnings".to_string(),
        "--no-playlist".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{PROGRESS_TAG} %(progress._percent_str)s %(progress._speed_str)s %(progress._eta_str)s"
        ),
        "-f".to_string(),
        request.format_expr.clone(),
        "-o".to_string(),
        output_template.to_string_lossy().to_string(),
    ];

    if let Some(container) = &request.merge_container {
        args.push("--merge-output-format".to_string());
        args.push(container.clone());
    }

    if let Some(audio_format) = &request.audio_format {
        args.push("-x".to_string());
        args.push("--audio-format".to_string());
        args.push(audio_format.clone());
    }

    if let Some(ffmpeg_path) = &config.ffmpeg_path {
        args.push("--ffmpeg-location".to_string());
        args.push(ffmpeg_path.to_string_lossy().to_string());
    }

    args.push(request.source_url.clone());

    log::info!("starting download {id} with args: {args:?}");

    let mut cmd = Command::new(&config.yt_dlp_path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Hide console window on Windows
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn().map_err(|e| {
        DownloadFailure::new(ErrorCode::ToolMissing, format!("Failed to start yt-dlp: {e}"))
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        DownloadFailure::unknown("Failed to capture yt-dlp stdout")
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        DownloadFailure::unknown("Failed to capture yt-dlp stderr")
    })?;

    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();

    const MAX_STDERR_LINES: usize = 2_000;
    let mut stderr_lines: Vec<String> = Vec::new();
    let mut scanner = LineScanner::new();

    loop {
        tokio::select! {
            line = stdout_reader.next_line() => {
                match line {
                    Ok(Some(l)) => {
                        log::debug!("yt-dlp stdout: {l}");
                        match scanner.observe(&l) {
                            Some(LineSignal::Progress(progress)) => {
                                let _ = event_tx
                                    .send(JobEvent::Progress { id, progress })
                                    .await;
                            }
                            Some(LineSignal::Processing(step)) => {
                                let _ = event_tx
                                    .send(JobEvent::Processing { id, step })
                                    .await;
                            }
                            None => {}
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("error reading yt-dlp stdout: {e}");
                        break;
                    }
                }
            }
            line = stderr_reader.next_line() => {
                match line {
                    Ok(Some(l)) => {
                        log::debug!("yt-dlp stderr: {l}");
                        if stderr_lines.len() < MAX_STDERR_LINES {
                            stderr_lines.push(l);
                        }
                    }
                    Ok(None) => {
                        // stdout might still have data; break when it closes.
                    }
                    Err(e) => {
                        log::error!("error reading yt-dlp stderr: {e}");
                    }
                }
            }
        }
    }

    let status = child.wait().await.map_err(|e| {
        DownloadFailure::unknown(format!("Failed to wait for yt-dlp: {e}"))
    })?;

    if !status.success() {
        return Err(classify_error(&stderr_lines.join("\n")));
    }

    Ok(scanner.into_final_path())
}

/// What one stdout line means for the job, if anything.
#[derive(Debug, Clone, PartialEq)]
enum LineSignal {
    Progress(ProgressSnapshot),
    Processing(String),
}

/// Per-job scanner over yt-dlp stdout. Tracks the resolved output path and
/// throttles progress so percent is non-decreasing and not spammy.
struct LineScanner {
    progress_re: Option<Regex>,
    fallback_re: Option<Regex>,
    fallback_simple_re: Option<Regex>,
    dest_re: Option<Regex>,
    merger_re: Option<Regex>,
    extract_re: Option<Regex>,
    already_re: Option<Regex>,

    final_path: Option<String>,
    last_percent: f64,
    last_step: Option<String>,
}

impl LineScanner {
    fn new() -> Self {
        Self {
            progress_re: Regex::new(r"\[vidvault\]\s+(\S+)\s+(\S+)\s+(\S+)").ok(),
            // Standard yt-dlp line: [download]  50.5% of ~100.00MiB at 1.50MiB/s ETA 00:30
            fallback_re: Regex::new(
                r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\S+\s+at\s+(\S+)\s+ETA\s+(\S+)",
            )
            .ok(),
            fallback_simple_re: Regex::new(r"\[download\]\s+(\d+\.?\d*)%").ok(),
            dest_re: Regex::new(r"\[download\] Destination: (.+)").ok(),
            merger_re: Regex::new(r#"\[Merger\] Merging formats into "(.+)""#).ok(),
            extract_re: Regex::new(r"\[ExtractAudio\] Destination: (.+)").ok(),
            already_re: Regex::new(r"\[download\] (.+) has already been downloaded").ok(),
            final_path: None,
            last_percent: 0.0,
            last_step: None,
        }
    }

    fn observe(&mut self, line: &str) -> Option<LineSignal> {
        // Output-path captures first; a merger line also signals processing.
        if let Some(caps) = self.merger_re.as_ref().and_then(|re| re.captures(line)) {
            self.final_path = caps.get(1).map(|m| m.as_str().to_string());
            return self.step_signal("Merging streams");
        }
        if let Some(caps) = self.extract_re.as_ref().and_then(|re| re.captures(line)) {
            self.final_path = caps.get(1).map(|m| m.as_str().to_string());
            return self.step_signal("Converting audio");
        }
        if let Some(caps) = self.dest_re.as_ref().and_then(|re| re.captures(line)) {
            self.final_path = caps.get(1).map(|m| m.as_str().to_string());
            return None;
        }
        if let Some(caps) = self.already_re.as_ref().and_then(|re| re.captures(line)) {
            self.final_path = caps.get(1).map(|m| m.as_str().to_string());
            return None;
        }

        // Our custom progress template.
        if let Some(caps) = self.progress_re.as_ref().and_then(|re| re.captures(line)) {
            let percent = caps.get(1).and_then(|m| parse_percent(m.as_str()));
            let speed = caps.get(2).and_then(|m| display_field(m.as_str()));
            let eta = caps.get(3).and_then(|m| parse_eta(m.as_str()));
            return self.progress_signal(percent, speed, eta);
        }

        // Standard yt-dlp progress output, full then percent-only.
        if let Some(caps) = self.fallback_re.as_ref().and_then(|re| re.captures(line)) {
            let percent = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let speed = caps.get(2).and_then(|m| display_field(m.as_str()));
            let eta = caps.get(3).and_then(|m| parse_eta(m.as_str()));
            return self.progress_signal(percent, speed, eta);
        }
        if let Some(caps) = self
            .fallback_simple_re
            .as_ref()
            .and_then(|re| re.captures(line))
        {
            let percent = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            return self.progress_signal(percent, None, None);
        }

        None
    }

    /// Throttled, monotonic progress. Retries inside one yt-dlp run can make
    /// raw percent jump backwards; those lines are dropped so the stream
    /// stays non-decreasing.
    fn progress_signal(
        &mut self,
        percent: Option<f64>,
        speed: Option<String>,
        eta_seconds: Option<u64>,
    ) -> Option<LineSignal> {
        let percent = percent?;
        if percent < self.last_percent {
            return None;
        }
        if percent - self.last_percent < 0.5 && percent < 99.9 {
            return None;
        }
        self.last_percent = percent;
        Some(LineSignal::Progress(ProgressSnapshot {
            percent: Some(percent),
            speed,
            eta_seconds,
        }))
    }

    fn step_signal(&mut self, step: &str) -> Option<LineSignal> {
        if self.last_step.as_deref() == Some(step) {
            return None;
        }
        self.last_step = Some(step.to_string());
        Some(LineSignal::Processing(step.to_string()))
    }

    fn into_final_path(self) -> Option<String> {
        self.final_path
    }
}

fn parse_percent(s: &str) -> Option<f64> {
    let cleaned = s.trim_end_matches('%').trim();
    cleaned.parse::<f64>().ok()
}

fn parse_eta(s: &str) -> Option<u64> {
    // Format: "00:05:30" or "05:30" or "30" or "N/A"
    let s = s.trim();
    if s == "N/A" || s.is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        1 => parts[0].parse::<u64>().ok(),
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            Some(mins * 60 + secs)
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            Some(hours * 3600 + mins * 60 + secs)
        }
        _ => None,
    }
}

/// Speed and similar values are passed through exactly as yt-dlp formats
/// them; placeholders become `None`.
fn display_field(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "Unknown" {
        return None;
    }
    Some(s.to_string())
}

/// Classify yt-dlp stderr into a user-facing failure.
fn classify_error(stderr: &str) -> DownloadFailure {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("sign in")
        || stderr_lower.contains("login")
        || stderr_lower.contains("cookies")
        || stderr_lower.contains("age-restricted")
        || stderr_lower.contains("captcha")
        || stderr_lower.contains("confirm you're not")
    {
        return DownloadFailure::new(
            ErrorCode::SignInRequired,
            "This content requires sign-in. Import cookies from your browser and retry.",
        );
    }

    if stderr_lower.contains("not available in your country")
        || stderr_lower.contains("geo")
        || stderr_lower.contains("blocked")
    {
        return DownloadFailure::new(
            ErrorCode::GeoRestricted,
            "This content is not available in your region.",
        );
    }

    if stderr_lower.contains("unsupported url")
        || stderr_lower.contains("no video formats")
        || stderr_lower.contains("extractor")
    {
        return DownloadFailure::new(
            ErrorCode::UnsupportedUrl,
            "This URL is not supported or the extractor is outdated.",
        );
    }

    if stderr_lower.contains("requested format") || stderr_lower.contains("format not available") {
        return DownloadFailure::new(
            ErrorCode::FormatUnavailable,
            "The requested format is not available for this content.",
        );
    }

    if stderr_lower.contains("network")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("timed out")
    {
        return DownloadFailure::new(
            ErrorCode::Network,
            "Network error occurred. Check your connection and retry.",
        );
    }

    if stderr_lower.contains("permission denied") || stderr_lower.contains("read-only") {
        return DownloadFailure::new(
            ErrorCode::OutputWriteFailed,
            "Could not write to the destination folder.",
        );
    }

    let message = if stderr.is_empty() {
        "Download failed with unknown error.".to_string()
    } else if stderr.len() > 200 {
        let cut = stderr
            .char_indices()
            .take_while(|(i, _)| *i < 200)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(stderr.len());
        format!("Download failed: {}…", &stderr[..cut])
    } else {
        format!("Download failed: {stderr}")
    };

    DownloadFailure::unknown(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("50.5%"), Some(50.5));
        assert_eq!(parse_percent("100%"), Some(100.0));
        assert_eq!(parse_percent("N/A"), None);
    }

    #[test]
    fn test_parse_eta() {
        assert_eq!(parse_eta("30"), Some(30));
        assert_eq!(parse_eta("05:30"), Some(330));
        assert_eq!(parse_eta("01:05:30"), Some(3930));
        assert_eq!(parse_eta("N/A"), None);
    }

    #[test]
    fn custom_template_line_parses() {
        let mut scanner = LineScanner::new();
        let signal = scanner.observe("[vidvault] 50.5% 1.52MiB/s 00:30");
        match signal {
            Some(LineSignal::Progress(p)) => {
                assert_eq!(p.percent, Some(50.5));
                assert_eq!(p.speed.as_deref(), Some("1.52MiB/s"));
                assert_eq!(p.eta_seconds, Some(30));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn standard_progress_line_parses() {
        let mut scanner = LineScanner::new();
        let signal =
            scanner.observe("[download]  42.0% of ~100.00MiB at 1.50MiB/s ETA 00:30");
        match signal {
            Some(LineSignal::Progress(p)) => {
                assert_eq!(p.percent, Some(42.0));
                assert_eq!(p.speed.as_deref(), Some("1.50MiB/s"));
                assert_eq!(p.eta_seconds, Some(30));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn progress_is_monotonic_and_throttled() {
        let mut scanner = LineScanner::new();
        assert!(scanner.observe("[vidvault] 10.0% 1MiB/s 10").is_some());
        // Backwards jump (fragment retry) is dropped.
        assert!(scanner.observe("[vidvault] 5.0% 1MiB/s 10").is_none());
        // Sub-threshold increase is dropped.
        assert!(scanner.observe("[vidvault] 10.2% 1MiB/s 10").is_none());
        assert!(scanner.observe("[vidvault] 11.0% 1MiB/s 10").is_some());
        // Near-complete always passes.
        assert!(scanner.observe("[vidvault] 100% 1MiB/s 00").is_some());
    }

    #[test]
    fn placeholder_speed_is_dropped() {
        let mut scanner = LineScanner::new();
        match scanner.observe("[vidvault] 25.0% N/A N/A") {
            Some(LineSignal::Progress(p)) => {
                assert_eq!(p.percent, Some(25.0));
                assert_eq!(p.speed, None);
                assert_eq!(p.eta_seconds, None);
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn destination_lines_resolve_final_path() {
        let mut scanner = LineScanner::new();
        scanner.observe("[download] Destination: /dl/video.f137.mp4");
        scanner.observe("[download] Destination: /dl/video.f140.m4a");
        let merge =
            scanner.observe(r#"[Merger] Merging formats into "/dl/video.mp4""#);
        assert_eq!(
            merge,
            Some(LineSignal::Processing("Merging streams".to_string()))
        );
        assert_eq!(scanner.into_final_path().as_deref(), Some("/dl/video.mp4"));
    }

    #[test]
    fn extract_audio_destination_wins() {
        let mut scanner = LineScanner::new();
        scanner.observe("[download] Destination: /dl/track.webm");
        let signal = scanner.observe("[ExtractAudio] Destination: /dl/track.mp3");
        assert_eq!(
            signal,
            Some(LineSignal::Processing("Converting audio".to_string()))
        );
        assert_eq!(scanner.into_final_path().as_deref(), Some("/dl/track.mp3"));
    }

    #[test]
    fn already_downloaded_line_resolves_path() {
        let mut scanner = LineScanner::new();
        scanner.observe("[download] /dl/video.mp4 has already been downloaded");
        assert_eq!(scanner.into_final_path().as_deref(), Some("/dl/video.mp4"));
    }

    #[test]
    fn processing_step_emitted_once() {
        let mut scanner = LineScanner::new();
        assert!(scanner
            .observe(r#"[Merger] Merging formats into "/dl/v.mp4""#)
            .is_some());
        assert!(scanner
            .observe(r#"[Merger] Merging formats into "/dl/v.mp4""#)
            .is_none());
    }

    #[test]
    fn test_classify_error_login() {
        let failure = classify_error("ERROR: Sign in to confirm your age");
        assert_eq!(failure.code, ErrorCode::SignInRequired);
    }

    #[test]
    fn test_classify_error_geo() {
        let failure = classify_error("ERROR: Video not available in your country");
        assert_eq!(failure.code, ErrorCode::GeoRestricted);
    }

    #[test]
    fn test_classify_error_format() {
        let failure = classify_error("ERROR: Requested format is not available");
        assert_eq!(failure.code, ErrorCode::FormatUnavailable);
    }

    #[test]
    fn test_classify_error_unknown() {
        let failure = classify_error("something nobody anticipated");
        assert_eq!(failure.code, ErrorCode::Unknown);
        assert!(failure.message.contains("something nobody anticipated"));
    }
}

/// End-to-end coordinator runs against a scripted stand-in for yt-dlp.
#[cfg(all(test, unix))]
mod script_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::events::EVENT_CHANNEL_CAPACITY;

    fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn request(dest: &Path) -> DownloadRequest {
        DownloadRequest {
            source_url: "https://example.com/watch?v=abc".to_string(),
            format_expr: "bestvideo[height=1080]+bestaudio/best".to_string(),
            quality_label: "1080p".to_string(),
            dest_dir: dest.to_path_buf(),
            merge_container: None,
            audio_format: None,
        }
    }

    fn summary() -> MediaSummary {
        MediaSummary {
            title: Some("Video".to_string()),
            channel: Some("Channel".to_string()),
            duration: Some("1:00".to_string()),
            thumbnail_url: None,
        }
    }

    struct Harness {
        _tmp: TempDir,
        db: Arc<Mutex<Db>>,
        coordinator: DownloadCoordinator,
        rx: mpsc::Receiver<JobEvent>,
        dest: PathBuf,
    }

    fn harness(script: &str) -> Harness {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Mutex::new(
            Db::open_at(&tmp.path().join("t.sqlite3"), &tmp.path().join("thumbs")).unwrap(),
        ));
        let config = DownloadConfig {
            yt_dlp_path: fake_ytdlp(tmp.path(), script),
            ffmpeg_path: None,
            filename_template: "%(title)s.%(ext)s".to_string(),
        };
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = DownloadCoordinator::new(config, db.clone(), tx, 1);
        let dest = tmp.path().to_path_buf();
        Harness {
            _tmp: tmp,
            db,
            coordinator,
            rx,
            dest,
        }
    }

    async fn drain_job(rx: &mut mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    async fn wait_idle(coordinator: &DownloadCoordinator) {
        for _ in 0..100 {
            if !coordinator.is_active().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("coordinator never went idle");
    }

    #[tokio::test]
    async fn successful_job_records_history_then_finishes() {
        let script = "#!/bin/sh\n\
            echo '[download] Destination: /dl/video.f137.mp4'\n\
            echo '[vidvault] 50.0% 1.00MiB/s 00:10'\n\
            echo '[download] 100% of 10.00MiB at 1.00MiB/s ETA 00:00'\n\
            echo '[Merger] Merging formats into \"/dl/video.mp4\"'\n\
            exit 0\n";
        let mut h = harness(script);

        let id = h
            .coordinator
            .start(request(&h.dest), summary())
            .await
            .unwrap();

        let events = drain_job(&mut h.rx).await;
        assert!(matches!(events.first(), Some(JobEvent::Queued { .. })));

        // Percent is non-decreasing across the stream.
        let mut last = 0.0;
        for event in &events {
            if let JobEvent::Progress { progress, .. } = event {
                let p = progress.percent.unwrap();
                assert!(p >= last, "percent went backwards: {p} < {last}");
                last = p;
            }
        }

        match events.last() {
            Some(JobEvent::Finished {
                id: event_id,
                path,
                history_id,
            }) => {
                assert_eq!(*event_id, id);
                assert_eq!(path, "/dl/video.mp4");

                let mut db = h.db.lock().await;
                let rows = db.list_history().unwrap();
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].id, *history_id);
                assert_eq!(rows[0].name, "Video");
                assert_eq!(rows[0].channel, "Channel");
                assert_eq!(rows[0].path, "/dl/video.mp4");
                assert_eq!(rows[0].quality, "1080p");
            }
            other => panic!("expected Finished, got {other:?}"),
        }

        wait_idle(&h.coordinator).await;
    }

    #[tokio::test]
    async fn failed_job_leaves_history_empty_and_reenables() {
        let script = "#!/bin/sh\n\
            echo 'ERROR: Requested format is not available' >&2\n\
            exit 1\n";
        let mut h = harness(script);

        h.coordinator
            .start(request(&h.dest), summary())
            .await
            .unwrap();

        let events = drain_job(&mut h.rx).await;
        match events.last() {
            Some(JobEvent::Failed { error, .. }) => {
                assert_eq!(error.code, ErrorCode::FormatUnavailable);
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        // No row was written.
        assert!(h.db.lock().await.list_history().unwrap().is_empty());

        // A new request is accepted once the slot clears.
        wait_idle(&h.coordinator).await;
        assert!(h
            .coordinator
            .start(request(&h.dest), summary())
            .await
            .is_ok());
        drain_job(&mut h.rx).await;
    }

    #[tokio::test]
    async fn second_start_refused_while_job_in_flight() {
        // Sleep keeps the first job in flight long enough to observe the refusal.
        let script = "#!/bin/sh\nsleep 1\nexit 0\n";
        let h = harness(script);

        h.coordinator
            .start(request(&h.dest), summary())
            .await
            .unwrap();
        assert!(h
            .coordinator
            .start(request(&h.dest), summary())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn missing_binary_reports_tool_missing() {
        let mut h = harness("#!/bin/sh\nexit 0\n");
        // Point at a path that does not exist.
        let config = DownloadConfig {
            yt_dlp_path: h.dest.join("no-such-binary"),
            ffmpeg_path: None,
            filename_template: "%(title)s.%(ext)s".to_string(),
        };
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        h.coordinator = DownloadCoordinator::new(config, h.db.clone(), tx, 1);

        h.coordinator
            .start(request(&h.dest), summary())
            .await
            .unwrap();
        let events = drain_job(&mut rx).await;
        match events.last() {
            Some(JobEvent::Failed { error, .. }) => {
                assert_eq!(error.code, ErrorCode::ToolMissing);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(h.db.lock().await.list_history().unwrap().is_empty());
    }
}
