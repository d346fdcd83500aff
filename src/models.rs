use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// yt-dlp reports byte sizes as integers or floats depending on the
/// extractor; accept both (and null) without failing the whole entry.
fn de_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64))))
}

/// One concrete encoded stream as enumerated by yt-dlp for a single media URL.
///
/// Field names mirror the yt-dlp JSON so the struct can be deserialized
/// directly from one entry of the `formats` array. Every field except
/// `format_id` is best-effort; absence means the extractor did not report it,
/// not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatOption {
    /// Opaque token understood by yt-dlp's `-f` flag. Unique within one
    /// `MediaInfo`'s format list.
    pub format_id: String,

    /// Container extension, e.g. "mp4", "webm", "m4a".
    #[serde(default)]
    pub ext: Option<String>,

    /// Resolution label as reported, e.g. "1920x1080" or "audio only".
    #[serde(default)]
    pub resolution: Option<String>,

    #[serde(default)]
    pub fps: Option<f64>,

    /// Exact size in bytes when known.
    #[serde(default, deserialize_with = "de_size")]
    pub filesize: Option<u64>,

    /// Estimated size in bytes when the exact size is unknown.
    #[serde(default, deserialize_with = "de_size")]
    pub filesize_approx: Option<u64>,

    /// Total / video / audio bitrate in kbit/s.
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub vbr: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,

    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,

    #[serde(default)]
    pub audio_channels: Option<u32>,

    /// Audio sample rate in Hz.
    #[serde(default)]
    pub asr: Option<u32>,

    /// Human-readable quality note, e.g. "1080p", "medium". Quality labels
    /// for the simplified selector are derived from notes with a trailing "p".
    #[serde(default)]
    pub format_note: Option<String>,

    /// Video height in pixels; used to synthesize a quality label when no
    /// trailing-"p" note exists.
    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub dynamic_range: Option<String>,

    /// Direct media URL. Informational only; downloads go through yt-dlp.
    #[serde(default)]
    pub url: Option<String>,
}

impl FormatOption {
    /// Best available size estimate: exact if present, else approximate.
    pub fn size_bytes(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// Metadata for one media URL as returned by the fetcher.
///
/// Created per fetch call and replaced wholesale on the next one; never
/// persisted. Optional fields are "unknown" when `None` — a missing comment
/// count is not zero comments.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub webpage_url: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub channel_url: Option<String>,
    pub channel_follower_count: Option<u64>,
    pub channel_is_verified: Option<bool>,
    pub comment_count: Option<u64>,
    pub like_count: Option<u64>,
    pub view_count: Option<u64>,

    /// Raw yt-dlp upload date, `YYYYMMDD`.
    pub upload_date: Option<String>,

    /// Pre-formatted duration, e.g. "12:34".
    pub duration_string: Option<String>,

    pub thumbnail_url: Option<String>,
    pub description: Option<String>,

    /// Ordered as enumerated by yt-dlp (worst to best).
    pub formats: Vec<FormatOption>,
}

impl MediaInfo {
    /// Upload date parsed into a calendar date, if the raw value is valid.
    pub fn upload_date_parsed(&self) -> Option<NaiveDate> {
        self.upload_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y%m%d").ok())
    }
}

/// The slice of `MediaInfo` a finished download needs for its history row
/// and thumbnail cache. Captured at start time so the job owns its snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MediaSummary {
    pub title: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl From<&MediaInfo> for MediaSummary {
    fn from(info: &MediaInfo) -> Self {
        Self {
            title: info.title.clone(),
            channel: info.channel.clone(),
            duration: info.duration_string.clone(),
            thumbnail_url: info.thumbnail_url.clone(),
        }
    }
}

/// Everything the coordinator needs to run one download. Constructed from the
/// current selection state, consumed once, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub source_url: String,

    /// Resolved yt-dlp format expression, e.g.
    /// `bestvideo[height=1080]+bestaudio/best` or a raw format id.
    pub format_expr: String,

    /// User-chosen quality label recorded in history, e.g. "1080p".
    pub quality_label: String,

    pub dest_dir: PathBuf,

    /// Merge container override passed as `--merge-output-format`.
    #[serde(default)]
    pub merge_container: Option<String>,

    /// Audio conversion target passed as `-x --audio-format`.
    #[serde(default)]
    pub audio_format: Option<String>,
}

/// A history row before the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub name: String,
    pub channel: String,
    pub duration: String,
    pub url: String,
    pub path: String,
    pub quality: String,
}

/// A durable log entry for one completed download. Immutable once written;
/// the id is store-assigned and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub name: String,
    pub channel: String,
    pub duration: String,
    pub url: String,
    pub path: String,
    pub quality: String,
}

impl HistoryRecord {
    pub fn from_new(id: i64, new: NewHistoryRecord) -> Self {
        Self {
            id,
            name: new.name,
            channel: new.channel,
            duration: new.duration,
            url: new.url,
            path: new.path,
            quality: new.quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_date_parses_ytdlp_format() {
        let info = MediaInfo {
            webpage_url: "https://example.com/v".to_string(),
            title: None,
            channel: None,
            channel_url: None,
            channel_follower_count: None,
            channel_is_verified: None,
            comment_count: None,
            like_count: None,
            view_count: None,
            upload_date: Some("20240131".to_string()),
            duration_string: None,
            thumbnail_url: None,
            description: None,
            formats: vec![],
        };
        let date = info.upload_date_parsed().unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    }

    #[test]
    fn upload_date_rejects_garbage() {
        let info = MediaInfo {
            webpage_url: "https://example.com/v".to_string(),
            title: None,
            channel: None,
            channel_url: None,
            channel_follower_count: None,
            channel_is_verified: None,
            comment_count: None,
            like_count: None,
            view_count: None,
            upload_date: Some("not-a-date".to_string()),
            duration_string: None,
            thumbnail_url: None,
            description: None,
            formats: vec![],
        };
        assert!(info.upload_date_parsed().is_none());
    }

    #[test]
    fn size_prefers_exact_over_approx() {
        let mut f = FormatOption {
            format_id: "137".to_string(),
            filesize_approx: Some(2_000),
            ..Default::default()
        };
        assert_eq!(f.size_bytes(), Some(2_000));
        f.filesize = Some(1_500);
        assert_eq!(f.size_bytes(), Some(1_500));
    }
}
