use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::extract::PageDocument;
use crate::index::{IndexRecord, IndexStore, RecordKey, Watermark};

pub const DEFAULT_DB_PATH: &str = "data/site_index.sqlite";

const RECORD_COLUMNS: &str = "hostname, path, title, h1, h2, h3, h4, code, content, watermark";

/// SQLite-backed index. One row per `(hostname, path)`; list fields are
/// stored as JSON arrays.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn get(&self, key: &RecordKey) -> Result<Option<IndexRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM pages WHERE hostname = ?1 AND path = ?2");
        let raw = self
            .conn
            .query_row(&sql, params![key.hostname, key.path], RawRecord::from_row)
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// All records of one site, ordered by path.
    pub fn records(&self, hostname: &str) -> Result<Vec<IndexRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM pages WHERE hostname = ?1 ORDER BY path");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![hostname], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    pub fn stats(&self) -> Result<Vec<HostStats>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, COUNT(*), MIN(watermark), MAX(watermark)
             FROM pages
             GROUP BY hostname
             ORDER BY hostname",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(HostStats {
                    hostname: row.get(0)?,
                    pages: row.get(1)?,
                    oldest: row.get::<_, Option<i64>>(2)?.and_then(Watermark::from_micros),
                    newest: row.get::<_, Option<i64>>(3)?.and_then(Watermark::from_micros),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl IndexStore for SqliteStore {
    fn delete(&mut self, key: &RecordKey) -> Result<(), StoreError> {
        delete_row(&self.conn, key)
    }

    fn create(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
        insert_row(&self.conn, record)
    }

    fn delete_stale(&mut self, hostname: &str, watermark: Watermark) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM pages
             WHERE hostname = ?1 AND (watermark IS NULL OR watermark < ?2)",
            params![hostname, watermark.as_micros()],
        )?;
        Ok(removed)
    }

    /// Delete and create in one transaction, so readers never see the key
    /// missing.
    fn replace(&mut self, record: &IndexRecord) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        delete_row(&tx, &record.key)?;
        insert_row(&tx, record)?;
        tx.commit()?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            hostname   TEXT NOT NULL,
            path       TEXT NOT NULL,
            title      TEXT NOT NULL,
            h1         TEXT NOT NULL,
            h2         TEXT NOT NULL,
            h3         TEXT NOT NULL,
            h4         TEXT NOT NULL,
            code       TEXT NOT NULL,
            content    TEXT NOT NULL,
            watermark  INTEGER,
            PRIMARY KEY (hostname, path)
        );
        CREATE INDEX IF NOT EXISTS idx_pages_watermark ON pages(hostname, watermark);
        ",
    )?;
    Ok(())
}

fn delete_row(conn: &Connection, key: &RecordKey) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM pages WHERE hostname = ?1 AND path = ?2",
        params![key.hostname, key.path],
    )?;
    Ok(())
}

fn insert_row(conn: &Connection, record: &IndexRecord) -> Result<(), StoreError> {
    let doc = &record.document;
    conn.execute(
        "INSERT INTO pages (hostname, path, title, h1, h2, h3, h4, code, content, watermark)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.key.hostname,
            record.key.path,
            doc.title,
            serde_json::to_string(&doc.h1)?,
            serde_json::to_string(&doc.h2)?,
            serde_json::to_string(&doc.h3)?,
            serde_json::to_string(&doc.h4)?,
            serde_json::to_string(&doc.code)?,
            serde_json::to_string(&doc.content)?,
            record.watermark.map(|w| w.as_micros()),
        ],
    )?;
    Ok(())
}

/// Row as stored, before the JSON columns are decoded.
struct RawRecord {
    hostname: String,
    path: String,
    title: String,
    lists: [String; 6],
    watermark: Option<i64>,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRecord {
            hostname: row.get(0)?,
            path: row.get(1)?,
            title: row.get(2)?,
            lists: [
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ],
            watermark: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<IndexRecord, StoreError> {
        let [h1, h2, h3, h4, code, content] = self.lists;
        Ok(IndexRecord {
            key: RecordKey::new(self.hostname, self.path),
            document: PageDocument {
                title: self.title,
                h1: serde_json::from_str(&h1)?,
                h2: serde_json::from_str(&h2)?,
                h3: serde_json::from_str(&h3)?,
                h4: serde_json::from_str(&h4)?,
                code: serde_json::from_str(&code)?,
                content: serde_json::from_str(&content)?,
            },
            watermark: self.watermark.and_then(Watermark::from_micros),
        })
    }
}

// ── Stats ──

pub struct HostStats {
    pub hostname: String,
    pub pages: usize,
    pub oldest: Option<Watermark>,
    pub newest: Option<Watermark>,
}
