//! Vidvault — core engine of a desktop media downloader.
//!
//! A frontend hands this crate a pasted URL; the crate resolves metadata and
//! formats through yt-dlp, derives quality labels for a simple selector, runs
//! the chosen download on a background task with an ordered progress-event
//! stream, and records every completed download in a local SQLite history
//! with an on-disk thumbnail cache.
//!
//! Rendering, user-intent dispatch and anything widget-shaped stay outside;
//! the [`App`] facade is the entire surface a frontend needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub mod coordinator;
pub mod events;
pub mod formats;
pub mod history;
pub mod models;
pub mod settings;
pub mod thumbs;
pub mod url_utils;
pub mod ytdlp;

pub use coordinator::{find_ffmpeg_binary, find_ytdlp_binary, DownloadConfig, DownloadCoordinator};
pub use events::{DownloadFailure, ErrorCode, JobEvent, JobStatus, ProgressSnapshot};
pub use formats::{
    derive_quality_labels, resolve_selection, FormatSelection, SelectionError, SoundMode,
};
pub use history::Db;
pub use models::{
    DownloadRequest, FormatOption, HistoryRecord, MediaInfo, MediaSummary, NewHistoryRecord,
};
pub use settings::Settings;
pub use url_utils::FetchInput;
pub use ytdlp::{FetchError, YtDlpConfig, YtDlpRunner};

/// Per-download knobs a frontend may override. Everything unset falls back to
/// the persisted [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Destination directory; defaults to the settings download folder.
    pub dest_dir: Option<PathBuf>,

    /// Merge container override, e.g. "mp4".
    pub merge_container: Option<String>,

    /// Post-download audio conversion target, e.g. "mp3".
    pub audio_format: Option<String>,
}

/// A history row ready for rendering: the record plus its cached thumbnail
/// path, if the cache write succeeded back when the row was created.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub record: HistoryRecord,
    pub thumbnail: Option<PathBuf>,
}

/// Wires the fetcher, coordinator and history store together and owns the
/// single event channel.
///
/// Binary paths and the filename template are fixed at construction; edits to
/// those settings apply the next time an `App` is built. The download folder,
/// merge container and thumbnail retry count are read per call.
pub struct App {
    db: Arc<Mutex<Db>>,
    settings: Settings,
    runner: YtDlpRunner,
    coordinator: DownloadCoordinator,
    event_rx: Option<mpsc::Receiver<JobEvent>>,
}

impl App {
    /// Open the per-user database and build the full stack.
    pub fn new() -> Result<Self> {
        let db = Db::open()?;
        Self::with_db(db)
    }

    /// Build the stack on an already opened database (used by tests and by
    /// embedders with a custom profile location).
    pub fn with_db(db: Db) -> Result<Self> {
        let settings = Settings::load(&db);

        let yt_dlp_path = settings
            .yt_dlp_path
            .clone()
            .unwrap_or_else(find_ytdlp_binary);
        let ffmpeg_path = settings.ffmpeg_path.clone().or_else(find_ffmpeg_binary);

        let runner = YtDlpRunner::new(YtDlpConfig::new(yt_dlp_path.clone()));

        let (event_tx, event_rx) = mpsc::channel(events::EVENT_CHANNEL_CAPACITY);
        let db = Arc::new(Mutex::new(db));

        let config = DownloadConfig {
            yt_dlp_path,
            ffmpeg_path,
            filename_template: settings.filename_template.clone(),
        };
        let coordinator = DownloadCoordinator::new(
            config,
            db.clone(),
            event_tx,
            settings.thumbnail_retry_attempts,
        );

        Ok(Self {
            db,
            settings,
            runner,
            coordinator,
            event_rx: Some(event_rx),
        })
    }

    /// The receiving end of the job event channel. The frontend takes this
    /// once and drains it from its own event loop; events per job arrive in
    /// order and end with exactly one terminal event.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<JobEvent>> {
        self.event_rx.take()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Persist new settings. See the type-level note on which fields apply
    /// immediately.
    pub async fn update_settings(&mut self, settings: Settings) -> Result<()> {
        {
            let mut db = self.db.lock().await;
            settings.save(&mut db)?;
        }
        self.settings = settings;
        Ok(())
    }

    /// Resolve metadata for pasted input (URL or search text). On error the
    /// caller keeps whatever it was previously displaying.
    pub async fn fetch_media(&self, raw_input: &str) -> Result<MediaInfo, FetchError> {
        let input = url_utils::prepare_input(raw_input).ok_or(FetchError::EmptyInput)?;
        self.runner.fetch_media(input.as_str()).await
    }

    /// Quality labels for the simple selector, worst to best; the UI selects
    /// the last entry by default.
    pub fn quality_labels(&self, info: &MediaInfo) -> Vec<String> {
        derive_quality_labels(&info.formats)
    }

    /// Validate the selection and hand one download to the coordinator.
    ///
    /// Selection problems (no row highlighted on the expert tab) fail here,
    /// before anything reaches the background task. While a job is in flight
    /// further calls are refused; the frontend should disable its download
    /// control until it observes a terminal event.
    pub async fn start_download(
        &self,
        info: &MediaInfo,
        selection: &FormatSelection,
        opts: StartOptions,
    ) -> Result<Uuid> {
        if self.coordinator.is_active().await {
            return Err(anyhow!("a download is already in progress"));
        }

        let format_expr = resolve_selection(selection)?;
        let quality_label = formats::selection_quality_label(selection)?;

        let request = DownloadRequest {
            source_url: info.webpage_url.clone(),
            format_expr,
            quality_label,
            dest_dir: opts
                .dest_dir
                .unwrap_or_else(|| self.settings.download_folder.clone()),
            merge_container: opts
                .merge_container
                .or_else(|| self.settings.merge_container.clone()),
            audio_format: opts.audio_format,
        };

        self.coordinator.start(request, MediaSummary::from(info)).await
    }

    pub async fn is_downloading(&self) -> bool {
        self.coordinator.is_active().await
    }

    /// Full download history, newest first.
    pub async fn history(&self) -> Result<Vec<HistoryRecord>> {
        let mut db = self.db.lock().await;
        db.list_history()
    }

    /// History joined with cached thumbnail paths, ready for a list view.
    /// Rows whose thumbnail never made it to disk get `None`; the frontend
    /// renders a placeholder.
    pub async fn history_rows(&self) -> Result<Vec<HistoryRow>> {
        let mut db = self.db.lock().await;
        let records = db.list_history()?;
        Ok(records
            .into_iter()
            .map(|record| {
                let thumbnail = db.thumbnail_path(record.id);
                HistoryRow { record, thumbnail }
            })
            .collect())
    }

    pub async fn thumbnail_path(&self, history_id: i64) -> Option<PathBuf> {
        let db = self.db.lock().await;
        db.thumbnail_path(history_id)
    }

    /// Open a downloaded file or folder with the OS default handler.
    pub fn open_path(path: &Path) -> Result<()> {
        open::that(path).with_context(|| format!("open {}", path.display()))
    }
}
