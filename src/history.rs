//! History Store
//!
//! Append-only log of completed downloads in a single SQLite table, plus an
//! on-disk thumbnail cache keyed by the store-assigned row id. The store owns
//! the table and the cache directory; nothing else touches them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{HistoryRecord, NewHistoryRecord};

/// Database schema version.
///
/// Bump this when introducing a new migration.
const SCHEMA_VERSION: i64 = 1;

/// Extensions probed when looking up a cached thumbnail.
const THUMBNAIL_EXTS: [&str; 4] = ["jpg", "png", "webp", "gif"];

/// Database handle wrapper.
///
/// Notes:
/// - `rusqlite::Connection` is not `Sync`; keep access on a single task
///   (the app facade wraps this in `Arc<tokio::sync::Mutex<..>>`).
pub struct Db {
    conn: Connection,
    path: PathBuf,
    thumb_dir: PathBuf,
}

/// Determines the per-user app data directory and returns its path.
///
/// macOS:  ~/Library/Application Support/Vidvault
/// Windows: %APPDATA%\\Vidvault
/// Linux:  ~/.local/share/vidvault (depending on XDG)
pub fn app_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "vidvault", "Vidvault")
        .ok_or_else(|| anyhow!("failed to resolve per-user app data directory"))
}

/// Returns the directory where Vidvault stores its state (db, thumbnails).
pub fn app_data_dir() -> Result<PathBuf> {
    Ok(app_project_dirs()?.data_dir().to_path_buf())
}

/// Create required directories for state storage: data dir and thumbnail cache.
pub fn ensure_app_dirs() -> Result<AppDirs> {
    let data = app_data_dir()?;
    let thumbnails = data.join("thumbnails");

    fs::create_dir_all(&data).with_context(|| format!("create data dir: {}", data.display()))?;
    fs::create_dir_all(&thumbnails)
        .with_context(|| format!("create thumbnail dir: {}", thumbnails.display()))?;

    Ok(AppDirs { data, thumbnails })
}

#[derive(Debug, Clone)]
pub struct AppDirs {
    pub data: PathBuf,
    pub thumbnails: PathBuf,
}

impl Db {
    /// Open the database at the per-user location and apply migrations.
    pub fn open() -> Result<Self> {
        let dirs = ensure_app_dirs()?;
        let path = dirs.data.join("vidvault.sqlite3");
        Self::open_at(&path, &dirs.thumbnails)
    }

    /// Open a database at an explicit location. The thumbnail directory is
    /// created if missing.
    pub fn open_at(path: &Path, thumb_dir: &Path) -> Result<Self> {
        fs::create_dir_all(thumb_dir)
            .with_context(|| format!("create thumbnail dir: {}", thumb_dir.display()))?;

        let mut conn = Connection::open(path)
            .with_context(|| format!("open sqlite db: {}", path.display()))?;

        // pragmatic defaults for a desktop app:
        // - WAL for concurrency
        // - foreign keys ON
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&mut conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            thumb_dir: thumb_dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn thumbnail_dir(&self) -> &Path {
        &self.thumb_dir
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Append one completed download and return its store-assigned id.
    ///
    /// Rows are immutable; there is no update or delete path.
    pub fn insert_history(&mut self, record: &NewHistoryRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO history (name, channel, duration, url, path, quality)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.name,
                record.channel,
                record.duration,
                record.url,
                record.path,
                record.quality
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Full history, newest first (descending id).
    pub fn list_history(&mut self) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, channel, duration, url, path, quality
            FROM history
            ORDER BY id DESC
            "#,
        )?;

        let rows = stmt.query_map([], |row| Self::row_to_record(row))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn history_count(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Write raw thumbnail bytes to `<thumb_dir>/<id>.<ext>`.
    ///
    /// Best-effort cache: the caller logs and ignores the error; the history
    /// row is the durable source of truth and is never rolled back when this
    /// fails.
    pub fn cache_thumbnail(&self, id: i64, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.thumb_dir.join(format!("{id}.{ext}"));
        fs::write(&path, bytes)
            .with_context(|| format!("write thumbnail: {}", path.display()))?;
        Ok(path)
    }

    /// Cached thumbnail for a history id, if one was written.
    pub fn thumbnail_path(&self, id: i64) -> Option<PathBuf> {
        THUMBNAIL_EXTS
            .iter()
            .map(|ext| self.thumb_dir.join(format!("{id}.{ext}")))
            .find(|p| p.exists())
    }

    /// Read one persisted setting as raw JSON, if present.
    pub fn get_setting_json(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert one persisted setting as raw JSON.
    pub fn set_setting_json(&mut self, key: &str, value_json: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO settings(key, value_json) VALUES(?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json
            "#,
            params![key, value_json],
        )?;
        Ok(())
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<HistoryRecord> {
        Ok(HistoryRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            channel: row.get(2)?,
            duration: row.get(3)?,
            url: row.get(4)?,
            path: row.get(5)?,
            quality: row.get(6)?,
        })
    }
}

/// Apply migrations to bring the database to the current schema.
fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            r#"SELECT value FROM meta WHERE key = 'schema_version'"#,
            [],
            |r| r.get(0),
        )
        .optional()?;

    let current_version: i64 = existing
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(anyhow!(
            "db schema version {} is newer than app supports {}",
            current_version,
            SCHEMA_VERSION
        ));
    }

    if current_version == 0 {
        migration_v1(conn)?;
        set_schema_version(conn, 1)?;
    }

    // Future:
    // if current_version < 2 { migration_v2(conn)?; set_schema_version(conn, 2)?; }

    Ok(())
}

fn set_schema_version(conn: &mut Connection, v: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO meta(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![v.to_string()],
    )?;
    Ok(())
}

fn migration_v1(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS history (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          channel TEXT NOT NULL,
          duration TEXT NOT NULL,
          url TEXT NOT NULL,
          path TEXT NOT NULL,
          quality TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
          key TEXT PRIMARY KEY,
          value_json TEXT NOT NULL
        );
        "#,
    )?;

    Ok(())
}
