//! Job events
//!
//! Backend -> frontend events for one download job, delivered over a bounded
//! `tokio::sync::mpsc` channel. The frontend should receive in a single task
//! and switch on the variant. Events for one job arrive in emission order and
//! end with exactly one terminal variant (`Finished` or `Failed`).

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Capacity of the job event channel. Progress emission is throttled in the
/// coordinator, so a small bound is plenty.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle status of a job as reflected to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Finished,
    Failed,
}

/// Stable error codes so the frontend can map failures to UX without string
/// matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unknown,
    Network,
    SignInRequired,
    GeoRestricted,
    UnsupportedUrl,
    FormatUnavailable,
    ToolMissing,
    OutputWriteFailed,
}

/// A user-facing download failure. `message` is short and actionable; detail
/// belongs in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct DownloadFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl DownloadFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }
}

/// Best-effort transfer progress. Any field may be `None` depending on what
/// yt-dlp reported for the line that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 0..=100, non-decreasing within one job.
    pub percent: Option<f64>,

    /// Transfer speed as formatted by yt-dlp, e.g. "1.52MiB/s".
    pub speed: Option<String>,

    pub eta_seconds: Option<u64>,
}

/// Events for one download job. `id` ties the stream together when the
/// frontend interleaves jobs from several coordinator instances.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum JobEvent {
    /// The job was accepted and handed to the background task.
    Queued { id: Uuid, url: String },

    /// Transfer progress while the job is downloading.
    Progress {
        id: Uuid,
        progress: ProgressSnapshot,
    },

    /// Post-download conversion/merge step started.
    Processing { id: Uuid, step: String },

    /// Terminal success. The history row exists before this is emitted.
    Finished {
        id: Uuid,
        path: String,
        history_id: i64,
    },

    /// Terminal failure. No history row was written.
    Failed { id: Uuid, error: DownloadFailure },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Queued { id, .. }
            | JobEvent::Progress { id, .. }
            | JobEvent::Processing { id, .. }
            | JobEvent::Finished { id, .. }
            | JobEvent::Failed { id, .. } => *id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobEvent::Queued { .. } => JobStatus::Queued,
            JobEvent::Progress { .. } => JobStatus::Downloading,
            JobEvent::Processing { .. } => JobStatus::Processing,
            JobEvent::Finished { .. } => JobStatus::Finished,
            JobEvent::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Finished { .. } | JobEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_variants() {
        let id = Uuid::new_v4();
        assert!(!JobEvent::Queued {
            id,
            url: "https://example.com".to_string()
        }
        .is_terminal());
        assert!(JobEvent::Finished {
            id,
            path: "/tmp/a.mp4".to_string(),
            history_id: 1
        }
        .is_terminal());
        assert!(JobEvent::Failed {
            id,
            error: DownloadFailure::unknown("boom")
        }
        .is_terminal());
    }

    #[test]
    fn failure_displays_its_message() {
        let err = DownloadFailure::new(ErrorCode::Network, "network error, check connection");
        assert_eq!(err.to_string(), "network error, check connection");
    }
}
