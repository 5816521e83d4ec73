use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::Mutex;

use super::error::LibraryError;
use crate::config::{Config, LibraryBackend};

/// Where a reader last stopped in a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub series_id: String,
    pub series_title: String,
    pub address: String,
    pub chapter_label: String,
    /// Unix seconds
    pub timestamp: i64,
}

/// Per-series bookkeeping, touched only when a chapter is opened or the
/// reader exits.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn last_position(&self, series_id: &str) -> Result<Option<ReadingPosition>, LibraryError>;

    async fn record_position(&self, position: &ReadingPosition) -> Result<(), LibraryError>;

    /// Most recently read first.
    async fn recent(&self, limit: usize) -> Result<Vec<ReadingPosition>, LibraryError>;

    async fn thumbnail(&self, series_id: &str) -> Result<Option<String>, LibraryError>;

    async fn set_thumbnail(&self, series_id: &str, url: &str) -> Result<(), LibraryError>;
}

pub async fn open_library(config: &Config) -> Result<Box<dyn LibraryStore>, LibraryError> {
    Ok(match config.library {
        LibraryBackend::Memory => Box::new(MemoryLibrary::default()),
        LibraryBackend::Json => Box::new(JsonLibrary::load(config.library_path()).await?),
        LibraryBackend::Sqlite => Box::new(SqliteLibrary::connect(&config.database_url()).await?),
    })
}

/// Like [`open_library`], but a store that cannot be opened is replaced by
/// an in-memory one. The broken store is left untouched on disk.
pub async fn open_library_or_memory(config: &Config) -> Box<dyn LibraryStore> {
    match open_library(config).await {
        Ok(library) => library,
        Err(e) => {
            error!(
                "Could not open the {:?} library, history will not be saved: {}",
                config.library, e
            );
            Box::new(MemoryLibrary::default())
        }
    }
}

/// One row of the library menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub position: ReadingPosition,
    pub thumbnail: Option<String>,
}

impl LibraryEntry {
    pub fn display_title(&self) -> String {
        self.position.series_title.replace('-', " ")
    }

    pub fn display_label(&self) -> String {
        self.position.chapter_label.replace('_', " ")
    }

    /// Local time of the last read, e.g. `21:07 (03-02-24)`.
    pub fn last_read(&self) -> String {
        DateTime::from_timestamp(self.position.timestamp, 0)
            .map(|time| time.with_timezone(&Local).format("%H:%M (%d-%m-%y)").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// The `limit` most recently read series together with their thumbnails.
pub async fn library_entries(
    library: &dyn LibraryStore,
    limit: usize,
) -> Result<Vec<LibraryEntry>, LibraryError> {
    let mut entries = Vec::new();
    for position in library.recent(limit).await? {
        let thumbnail = library.thumbnail(&position.series_id).await?;
        entries.push(LibraryEntry {
            position,
            thumbnail,
        });
    }
    Ok(entries)
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LibraryData {
    #[serde(default)]
    positions: HashMap<String, ReadingPosition>,
    #[serde(default)]
    thumbnails: HashMap<String, String>,
}

impl LibraryData {
    fn recent(&self, limit: usize) -> Vec<ReadingPosition> {
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.series_id.cmp(&b.series_id))
        });
        positions.truncate(limit);
        positions
    }
}

/// Keeps everything in memory; nothing survives the process.
#[derive(Default)]
pub struct MemoryLibrary {
    data: Mutex<LibraryData>,
}

#[async_trait]
impl LibraryStore for MemoryLibrary {
    async fn last_position(&self, series_id: &str) -> Result<Option<ReadingPosition>, LibraryError> {
        Ok(self.data.lock().await.positions.get(series_id).cloned())
    }

    async fn record_position(&self, position: &ReadingPosition) -> Result<(), LibraryError> {
        let mut data = self.data.lock().await;
        data.positions
            .insert(position.series_id.clone(), position.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ReadingPosition>, LibraryError> {
        Ok(self.data.lock().await.recent(limit))
    }

    async fn thumbnail(&self, series_id: &str) -> Result<Option<String>, LibraryError> {
        Ok(self.data.lock().await.thumbnails.get(series_id).cloned())
    }

    async fn set_thumbnail(&self, series_id: &str, url: &str) -> Result<(), LibraryError> {
        let mut data = self.data.lock().await;
        data.thumbnails.insert(series_id.to_string(), url.to_string());
        Ok(())
    }
}

/// A single JSON file, rewritten after every change.
pub struct JsonLibrary {
    path: PathBuf,
    data: Mutex<LibraryData>,
}

impl JsonLibrary {
    /// A missing file is an empty library; a corrupt one is an error so it
    /// does not get silently overwritten.
    pub async fn load(path: PathBuf) -> Result<Self, LibraryError> {
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LibraryData::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Writes a sibling `.tmp` file, then renames it over the library.
    async fn save(&self, data: &LibraryData) -> Result<(), LibraryError> {
        let content = serde_json::to_string_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.staging_path();
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LibraryStore for JsonLibrary {
    async fn last_position(&self, series_id: &str) -> Result<Option<ReadingPosition>, LibraryError> {
        Ok(self.data.lock().await.positions.get(series_id).cloned())
    }

    async fn record_position(&self, position: &ReadingPosition) -> Result<(), LibraryError> {
        let mut data = self.data.lock().await;
        data.positions
            .insert(position.series_id.clone(), position.clone());
        self.save(&data).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ReadingPosition>, LibraryError> {
        Ok(self.data.lock().await.recent(limit))
    }

    async fn thumbnail(&self, series_id: &str) -> Result<Option<String>, LibraryError> {
        Ok(self.data.lock().await.thumbnails.get(series_id).cloned())
    }

    async fn set_thumbnail(&self, series_id: &str, url: &str) -> Result<(), LibraryError> {
        let mut data = self.data.lock().await;
        data.thumbnails.insert(series_id.to_string(), url.to_string());
        self.save(&data).await
    }
}

const CREATE_TABLES: &str = "CREATE TABLE IF NOT EXISTS reading_position (
    series_id     TEXT PRIMARY KEY,
    series_title  TEXT NOT NULL,
    address       TEXT NOT NULL,
    chapter_label TEXT NOT NULL,
    timestamp     INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS series_thumbnail (
    series_id TEXT PRIMARY KEY,
    url       TEXT NOT NULL
);";

type PositionRow = (String, String, String, String, i64);

fn position_from_row(row: PositionRow) -> ReadingPosition {
    let (series_id, series_title, address, chapter_label, timestamp) = row;
    ReadingPosition {
        series_id,
        series_title,
        address,
        chapter_label,
        timestamp,
    }
}

pub struct SqliteLibrary {
    pool: SqlitePool,
}

impl SqliteLibrary {
    pub async fn connect(database_url: &str) -> Result<Self, LibraryError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection, so `sqlite::memory:` keeps a single database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(CREATE_TABLES).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl LibraryStore for SqliteLibrary {
    async fn last_position(&self, series_id: &str) -> Result<Option<ReadingPosition>, LibraryError> {
        let row: Option<PositionRow> = sqlx::query_as(
            "SELECT series_id, series_title, address, chapter_label, timestamp
             FROM reading_position WHERE series_id = ?",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(position_from_row))
    }

    async fn record_position(&self, position: &ReadingPosition) -> Result<(), LibraryError> {
        sqlx::query(
            "INSERT INTO reading_position (series_id, series_title, address, chapter_label, timestamp)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(series_id) DO UPDATE SET
                series_title = excluded.series_title,
                address = excluded.address,
                chapter_label = excluded.chapter_label,
                timestamp = excluded.timestamp",
        )
        .bind(position.series_id.as_str())
        .bind(position.series_title.as_str())
        .bind(position.address.as_str())
        .bind(position.chapter_label.as_str())
        .bind(position.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ReadingPosition>, LibraryError> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            "SELECT series_id, series_title, address, chapter_label, timestamp
             FROM reading_position ORDER BY timestamp DESC, series_id ASC LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(position_from_row).collect())
    }

    async fn thumbnail(&self, series_id: &str) -> Result<Option<String>, LibraryError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT url FROM series_thumbnail WHERE series_id = ?")
                .bind(series_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(url,)| url))
    }

    async fn set_thumbnail(&self, series_id: &str, url: &str) -> Result<(), LibraryError> {
        sqlx::query(
            "INSERT INTO series_thumbnail (series_id, url) VALUES (?, ?)
             ON CONFLICT(series_id) DO UPDATE SET url = excluded.url",
        )
        .bind(series_id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(series_id: &str, chapter: u32, timestamp: i64) -> ReadingPosition {
        ReadingPosition {
            series_id: series_id.to_string(),
            series_title: format!("series-{series_id}"),
            address: format!("/title/{series_id}-series/{chapter}-ch_{chapter}"),
            chapter_label: format!("ch_{chapter}"),
            timestamp,
        }
    }

    async fn exercise(library: &dyn LibraryStore) {
        assert_eq!(library.last_position("7").await.unwrap(), None);

        library.record_position(&position("7", 1, 100)).await.unwrap();
        library.record_position(&position("7", 2, 200)).await.unwrap();
        library.record_position(&position("8", 5, 150)).await.unwrap();

        let last = library.last_position("7").await.unwrap().unwrap();
        assert_eq!(last.chapter_label, "ch_2");
        assert_eq!(last.timestamp, 200);

        let recent: Vec<_> = library
            .recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.series_id)
            .collect();
        assert_eq!(recent, vec!["7", "8"]);
        assert_eq!(library.recent(1).await.unwrap().len(), 1);

        assert_eq!(library.thumbnail("7").await.unwrap(), None);
        library.set_thumbnail("7", "https://cdn.example/7.webp").await.unwrap();
        library.set_thumbnail("7", "https://cdn.example/7b.webp").await.unwrap();
        assert_eq!(
            library.thumbnail("7").await.unwrap().as_deref(),
            Some("https://cdn.example/7b.webp")
        );
    }

    #[tokio::test]
    async fn memory_library_round_trip() {
        exercise(&MemoryLibrary::default()).await;
    }

    #[tokio::test]
    async fn sqlite_library_round_trip() {
        let library = SqliteLibrary::connect("sqlite::memory:").await.unwrap();
        exercise(&library).await;
    }

    #[tokio::test]
    async fn json_library_persists_between_loads() {
        let path = std::env::temp_dir().join(format!(
            "manga-window-library-{}/library.json",
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let library = JsonLibrary::load(path.clone()).await.unwrap();
        exercise(&library).await;

        let reloaded = JsonLibrary::load(path.clone()).await.unwrap();
        assert_eq!(
            reloaded.last_position("8").await.unwrap(),
            Some(position("8", 5, 150))
        );
        assert!(reloaded.thumbnail("7").await.unwrap().is_some());
        assert!(!reloaded.staging_path().exists());

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn corrupt_json_library_is_an_error() {
        let dir = std::env::temp_dir().join(format!("manga-window-corrupt-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("library.json");
        tokio::fs::write(&path, "[not a library").await.unwrap();

        let result = JsonLibrary::load(path).await;
        assert!(matches!(result, Err(LibraryError::Json(_))));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn corrupt_json_library_falls_back_to_memory() {
        let dir = std::env::temp_dir().join(format!("manga-window-fallback-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("library.json");
        let truncated = r#"{"positions": {"7": {"series_id""#;
        tokio::fs::write(&path, truncated).await.unwrap();

        let config = Config {
            library: LibraryBackend::Json,
            library_path: Some(path.clone()),
            ..Config::default()
        };
        assert!(open_library(&config).await.is_err());

        let library = open_library_or_memory(&config).await;
        library.record_position(&position("7", 3, 300)).await.unwrap();
        assert_eq!(library.recent(5).await.unwrap().len(), 1);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), truncated);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn entries_carry_thumbnails_and_display_text() {
        let library = MemoryLibrary::default();
        library
            .record_position(&ReadingPosition {
                series_id: "7".into(),
                series_title: "solo-leveling".into(),
                address: "/title/7-solo-leveling/70-ch_12".into(),
                chapter_label: "ch_12".into(),
                timestamp: 1_700_000_000,
            })
            .await
            .unwrap();
        library.record_position(&position("8", 1, i64::MAX)).await.unwrap();
        library.set_thumbnail("7", "https://cdn.example/7.webp").await.unwrap();

        let entries = library_entries(&library, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].position.series_id, "8");
        assert_eq!(entries[0].thumbnail, None);
        assert_eq!(entries[0].last_read(), "-");

        let solo = &entries[1];
        assert_eq!(solo.display_title(), "solo leveling");
        assert_eq!(solo.display_label(), "ch 12");
        assert_eq!(solo.thumbnail.as_deref(), Some("https://cdn.example/7.webp"));
        let last_read = solo.last_read();
        assert_eq!(last_read.len(), "21:07 (03-02-24)".len());
        assert!(last_read.ends_with("-23)"), "{last_read}");
    }
}
