// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Screenshot store: records, FTS5 search index and perceptual-hash table

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::classifier::Category;
use crate::{Result, SnapsortError};

/// Store handle (thread-safe, cheap to clone)
#[derive(Clone)]
pub struct ScreenshotStore {
    conn: Arc<Mutex<Option<Connection>>>,
}

/// A processed screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub filepath: String,
    pub original_name: String,
    pub new_name: String,
    pub category: Category,
    pub description: String,
    pub ocr_text: String,
    pub ocr_confidence: f64,
    pub ai_confidence: f64,
    pub tags: Vec<String>,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
}

/// One row of the append-only `duplicates` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateHashEntry {
    pub screenshot_id: i64,
    pub perceptual_hash: String,
    pub duplicate_of: Option<i64>,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub total_size: i64,
    pub duplicates: i64,
    pub by_category: BTreeMap<String, i64>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS screenshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filepath TEXT NOT NULL UNIQUE,
        original_name TEXT NOT NULL,
        new_name TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL,
        ocr_text TEXT NOT NULL DEFAULT '',
        ocr_confidence REAL NOT NULL DEFAULT 0.0,
        ai_confidence REAL NOT NULL DEFAULT 0.0,
        tags TEXT NOT NULL DEFAULT '[]',
        file_size INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        processed_at TEXT NOT NULL,
        is_duplicate INTEGER NOT NULL DEFAULT 0,
        duplicate_of INTEGER REFERENCES screenshots(id)
    );

    CREATE INDEX IF NOT EXISTS idx_screenshots_filepath ON screenshots(filepath);
    CREATE INDEX IF NOT EXISTS idx_screenshots_category ON screenshots(category);
    CREATE INDEX IF NOT EXISTS idx_screenshots_created ON screenshots(created_at);

    CREATE VIRTUAL TABLE IF NOT EXISTS screenshots_fts USING fts5(
        filepath, new_name, ocr_text, tags,
        content = 'screenshots',
        content_rowid = 'id'
    );

    CREATE TRIGGER IF NOT EXISTS screenshots_fts_insert AFTER INSERT ON screenshots BEGIN
        INSERT INTO screenshots_fts(rowid, filepath, new_name, ocr_text, tags)
        VALUES (new.id, new.filepath, new.new_name, new.ocr_text, new.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS screenshots_fts_delete AFTER DELETE ON screenshots BEGIN
        INSERT INTO screenshots_fts(screenshots_fts, rowid, filepath, new_name, ocr_text, tags)
        VALUES ('delete', old.id, old.filepath, old.new_name, old.ocr_text, old.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS screenshots_fts_update AFTER UPDATE ON screenshots BEGIN
        INSERT INTO screenshots_fts(screenshots_fts, rowid, filepath, new_name, ocr_text, tags)
        VALUES ('delete', old.id, old.filepath, old.new_name, old.ocr_text, old.tags);
        INSERT INTO screenshots_fts(rowid, filepath, new_name, ocr_text, tags)
        VALUES (new.id, new.filepath, new.new_name, new.ocr_text, new.tags);
    END;

    CREATE TABLE IF NOT EXISTS duplicates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        screenshot_id INTEGER NOT NULL REFERENCES screenshots(id),
        perceptual_hash TEXT NOT NULL,
        duplicate_of INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_duplicates_hash ON duplicates(perceptual_hash);
"#;

const RECORD_COLUMNS: &str = "s.id, s.filepath, s.original_name, s.new_name, s.category, s.description, \
     s.ocr_text, s.ocr_confidence, s.ai_confidence, s.tags, s.file_size, s.created_at, \
     s.processed_at, s.is_duplicate, s.duplicate_of";

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ScreenshotRecord> {
    let category: String = row.get(4)?;
    let tags: String = row.get(9)?;
    let file_size: i64 = row.get(10)?;
    let created_at: String = row.get(11)?;
    let processed_at: String = row.get(12)?;

    Ok(ScreenshotRecord {
        id: Some(row.get(0)?),
        filepath: row.get(1)?,
        original_name: row.get(2)?,
        new_name: row.get(3)?,
        category: Category::parse(&category),
        description: row.get(5)?,
        ocr_text: row.get(6)?,
        ocr_confidence: row.get(7)?,
        ai_confidence: row.get(8)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        file_size: u64::try_from(file_size).unwrap_or(0),
        created_at: parse_timestamp(11, &created_at)?,
        processed_at: parse_timestamp(12, &processed_at)?,
        is_duplicate: row.get(13)?,
        duplicate_of: row.get(14)?,
    })
}

impl ScreenshotStore {
    /// Open or create the database file, creating its parent directory if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        info!("Opened screenshot store at {:?}", path);
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| SnapsortError::Config("Database lock poisoned".to_string()))?;
        let conn = guard.as_ref().ok_or(SnapsortError::StoreClosed)?;
        f(conn)
    }

    /// Release the connection. Every clone of this handle sees the store as closed.
    pub fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SnapsortError::Config("Database lock poisoned".to_string()))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| SnapsortError::Database(e))?;
            debug!("Screenshot store closed");
        }
        Ok(())
    }

    /// Insert a record and return its new id. Fails if `filepath` is already stored.
    pub fn insert(&self, record: &ScreenshotRecord) -> Result<i64> {
        let tags = serde_json::to_string(&record.tags)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO screenshots (
                       filepath, original_name, new_name, category, description,
                       ocr_text, ocr_confidence, ai_confidence, tags, file_size,
                       created_at, processed_at, is_duplicate, duplicate_of
                   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
                params![
                    record.filepath,
                    record.original_name,
                    record.new_name,
                    record.category.as_str(),
                    record.description,
                    record.ocr_text,
                    record.ocr_confidence,
                    record.ai_confidence,
                    tags,
                    i64::try_from(record.file_size).unwrap_or(i64::MAX),
                    format_timestamp(&record.created_at),
                    format_timestamp(&record.processed_at),
                    record.is_duplicate,
                    record.duplicate_of,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ScreenshotRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM screenshots s WHERE s.id = ?1", RECORD_COLUMNS);
            Ok(conn.query_row(&sql, params![id], row_to_record).optional()?)
        })
    }

    /// Full-text search ranked by relevance. `query` uses FTS5 MATCH syntax.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ScreenshotRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                r#"SELECT {} FROM screenshots s
                   JOIN screenshots_fts ON s.id = screenshots_fts.rowid
                   WHERE screenshots_fts MATCH ?1
                   ORDER BY screenshots_fts.rank
                   LIMIT ?2"#,
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![query, limit as i64], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    /// Most recently processed first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<ScreenshotRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM screenshots s ORDER BY s.processed_at DESC, s.id DESC LIMIT ?1",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![limit as i64], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let (total, total_size, duplicates) = conn.query_row(
                r#"SELECT COUNT(*), COALESCE(SUM(file_size), 0), COALESCE(SUM(is_duplicate), 0)
                   FROM screenshots"#,
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM screenshots GROUP BY category")?;
            let by_category = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

            Ok(StoreStats { total, total_size, duplicates, by_category })
        })
    }

    /// Flag a record as a duplicate, optionally linking the original
    pub fn mark_duplicate(&self, id: i64, duplicate_of: Option<i64>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE screenshots SET is_duplicate = 1, duplicate_of = ?2 WHERE id = ?1",
                params![id, duplicate_of],
            )?;
            if changed == 0 {
                return Err(SnapsortError::Database(rusqlite::Error::QueryReturnedNoRows));
            }
            Ok(())
        })
    }

    /// Append a perceptual hash entry
    pub fn insert_hash(&self, screenshot_id: i64, hash: &str, duplicate_of: Option<i64>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO duplicates (screenshot_id, perceptual_hash, duplicate_of) VALUES (?1, ?2, ?3)",
                params![screenshot_id, hash, duplicate_of],
            )?;
            Ok(())
        })
    }

    /// Every stored hash, in insertion order
    pub fn all_hashes(&self) -> Result<Vec<DuplicateHashEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT screenshot_id, perceptual_hash, duplicate_of FROM duplicates ORDER BY id",
            )?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(DuplicateHashEntry {
                        screenshot_id: row.get(0)?,
                        perceptual_hash: row.get(1)?,
                        duplicate_of: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_record(filepath: &str, text: &str) -> ScreenshotRecord {
        let created = Utc.with_ymd_and_hms(2025, 12, 6, 9, 15, 0).unwrap();
        ScreenshotRecord {
            id: None,
            filepath: filepath.to_string(),
            original_name: "Screen Shot 2025-12-06.png".to_string(),
            new_name: "Screenshot_2025_Dec_6_errors_content.png".to_string(),
            category: Category::Errors,
            description: "errors_content".to_string(),
            ocr_text: text.to_string(),
            ocr_confidence: 85.25,
            ai_confidence: 0.3,
            tags: vec!["errors".to_string()],
            file_size: 48_213,
            created_at: created,
            processed_at: created + Duration::milliseconds(1234),
            is_duplicate: false,
            duplicate_of: None,
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = ScreenshotStore::in_memory().unwrap();
        let record = sample_record("/shots/a.png", "Traceback (most recent call last)");
        let id = store.insert(&record).unwrap();

        let fetched = store.get_by_id(id).unwrap().unwrap();
        assert_eq!(fetched.id, Some(id));
        assert_eq!(ScreenshotRecord { id: None, ..fetched.clone() }, record);
        assert!((fetched.ocr_confidence - 85.25).abs() < 1e-9);
    }

    #[test]
    fn test_get_missing_id() {
        let store = ScreenshotStore::in_memory().unwrap();
        assert!(store.get_by_id(42).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_filepath_rejected() {
        let store = ScreenshotStore::in_memory().unwrap();
        store.insert(&sample_record("/shots/a.png", "one")).unwrap();
        let err = store.insert(&sample_record("/shots/a.png", "two")).unwrap_err();
        assert!(matches!(err, SnapsortError::Database(_)));
    }

    #[test]
    fn test_search_sees_fresh_insert() {
        let store = ScreenshotStore::in_memory().unwrap();
        store.insert(&sample_record("/shots/a.png", "nothing to see")).unwrap();
        let id = store.insert(&sample_record("/shots/b.png", "the zebra42 token")).unwrap();

        let hits = store.search("zebra42", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, Some(id));

        let by_path = store.search("b", 10).unwrap();
        assert!(by_path.iter().any(|r| r.id == Some(id)));

        let mut record = sample_record("/shots/c.png", "");
        record.new_name = "Screenshot_quokka_name.png".to_string();
        store.insert(&record).unwrap();
        assert_eq!(store.search("quokka", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_search_reflects_update() {
        let store = ScreenshotStore::in_memory().unwrap();
        let id = store.insert(&sample_record("/shots/a.png", "alpha")).unwrap();
        store.with_conn(|conn| {
            conn.execute("UPDATE screenshots SET ocr_text = 'omega' WHERE id = ?1", params![id])?;
            Ok(())
        }).unwrap();

        assert!(store.search("alpha", 10).unwrap().is_empty());
        assert_eq!(store.search("omega", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_and_mark_duplicate() {
        let store = ScreenshotStore::in_memory().unwrap();
        let first = store.insert(&sample_record("/shots/a.png", "a")).unwrap();
        let mut other = sample_record("/shots/b.png", "b");
        other.category = Category::Code;
        other.file_size = 1000;
        let second = store.insert(&other).unwrap();

        store.mark_duplicate(second, Some(first)).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.total_size, 49_213);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.by_category.get("Errors"), Some(&1));
        assert_eq!(stats.by_category.get("Code"), Some(&1));

        let marked = store.get_by_id(second).unwrap().unwrap();
        assert!(marked.is_duplicate);
        assert_eq!(marked.duplicate_of, Some(first));
        assert_eq!(marked.ocr_text, "b");
    }

    #[test]
    fn test_mark_missing_record_fails() {
        let store = ScreenshotStore::in_memory().unwrap();
        assert!(store.mark_duplicate(7, None).is_err());
    }

    #[test]
    fn test_recent_ordering() {
        let store = ScreenshotStore::in_memory().unwrap();
        for i in 0..3 {
            let mut record = sample_record(&format!("/shots/{}.png", i), "x");
            record.processed_at = record.processed_at + Duration::minutes(i);
            store.insert(&record).unwrap();
        }

        let recent = store.get_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].filepath, "/shots/2.png");
        assert_eq!(recent[1].filepath, "/shots/1.png");
    }

    #[test]
    fn test_hashes_append_in_order() {
        let store = ScreenshotStore::in_memory().unwrap();
        let a = store.insert(&sample_record("/shots/a.png", "a")).unwrap();
        let b = store.insert(&sample_record("/shots/b.png", "b")).unwrap();
        store.insert_hash(a, "hash-a", None).unwrap();
        store.insert_hash(b, "hash-a", Some(a)).unwrap();

        let hashes = store.all_hashes().unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].screenshot_id, a);
        assert_eq!(hashes[1].duplicate_of, Some(a));
    }

    #[test]
    fn test_reopen_existing_file_and_close() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("screenshots.db");

        let store = ScreenshotStore::open(&path).unwrap();
        store.insert(&sample_record("/shots/a.png", "persisted")).unwrap();
        store.close().unwrap();
        assert!(matches!(store.get_stats(), Err(SnapsortError::StoreClosed)));

        let reopened = ScreenshotStore::open(&path).unwrap();
        assert_eq!(reopened.get_stats().unwrap().total, 1);
        assert_eq!(reopened.search("persisted", 5).unwrap().len(), 1);
    }
}
