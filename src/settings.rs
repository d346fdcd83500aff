//! Settings
//!
//! User preferences persisted as one JSON value in the database's `settings`
//! key/value table. Missing or unreadable values fall back to defaults so a
//! fresh profile always works.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::history::Db;
use crate::thumbs;

const SETTINGS_KEY: &str = "user_settings";

/// All configurable options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Where downloads land unless the caller overrides per request.
    #[serde(default = "default_download_folder")]
    pub download_folder: PathBuf,

    /// yt-dlp output template appended to the destination directory.
    #[serde(default = "default_filename_template")]
    pub filename_template: String,

    /// Explicit yt-dlp binary path; discovered automatically when unset.
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Explicit ffmpeg binary path; discovered automatically when unset.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Thumbnail fetch attempts before giving up (no backoff).
    #[serde(default = "default_thumbnail_retries")]
    pub thumbnail_retry_attempts: u32,

    /// Container passed as `--merge-output-format` when merging streams.
    #[serde(default)]
    pub merge_container: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
            filename_template: default_filename_template(),
            yt_dlp_path: None,
            ffmpeg_path: None,
            thumbnail_retry_attempts: default_thumbnail_retries(),
            merge_container: None,
        }
    }
}

impl Settings {
    /// Load settings from the database, falling back to defaults when the
    /// stored value is absent or no longer parses.
    pub fn load(db: &Db) -> Self {
        match db.get_setting_json(SETTINGS_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("stored settings unreadable, using defaults: {e}");
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("failed to read settings, using defaults: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, db: &mut Db) -> Result<()> {
        let json = serde_json::to_string(self)?;
        db.set_setting_json(SETTINGS_KEY, &json)?;
        Ok(())
    }
}

fn default_download_folder() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_filename_template() -> String {
    "%(title)s [%(id)s].%(ext)s".to_string()
}

fn default_thumbnail_retries() -> u32 {
    thumbs::DEFAULT_RETRY_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.thumbnail_retry_attempts, 3);
        assert_eq!(s.filename_template, "%(title)s [%(id)s].%(ext)s");
        assert!(s.yt_dlp_path.is_none());
    }

    #[test]
    fn round_trips_through_db() {
        let tmp = TempDir::new().unwrap();
        let mut db =
            Db::open_at(&tmp.path().join("s.sqlite3"), &tmp.path().join("thumbs")).unwrap();

        let mut s = Settings::default();
        s.thumbnail_retry_attempts = 5;
        s.merge_container = Some("mp4".to_string());
        s.save(&mut db).unwrap();

        let loaded = Settings::load(&db);
        assert_eq!(loaded.thumbnail_retry_attempts, 5);
        assert_eq!(loaded.merge_container.as_deref(), Some("mp4"));
    }

    #[test]
    fn missing_value_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_at(&tmp.path().join("s.sqlite3"), &tmp.path().join("thumbs")).unwrap();
        let loaded = Settings::load(&db);
        assert_eq!(loaded.thumbnail_retry_attempts, 3);
    }

    #[test]
    fn unreadable_value_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let mut db =
            Db::open_at(&tmp.path().join("s.sqlite3"), &tmp.path().join("thumbs")).unwrap();
        db.set_setting_json(SETTINGS_KEY, "{not json").unwrap();
        let loaded = Settings::load(&db);
        assert_eq!(loaded.thumbnail_retry_attempts, 3);
    }
}
