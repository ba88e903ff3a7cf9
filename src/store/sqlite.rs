use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{GleanerError, Result};
use crate::domain::{
    CrawlErrorRecord, CrawlSession, CrawledItem, ErrorKind, SessionContent, SessionSnapshot,
};
use crate::store::SessionStore;

/// Batch size for IN (...) lookups, kept under SQLite's parameter limit.
const URL_BATCH_SIZE: usize = 900;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| GleanerError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            GleanerError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<CrawlSession> {
        Ok(CrawlSession {
            id: row.get(0)?,
            source_id: row.get(1)?,
            source_name: row.get(2)?,
            start_time: row
                .get::<_, String>(3)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
            end_time: row
                .get::<_, Option<String>>(4)?
                .and_then(|s| Self::parse_datetime(&s)),
            snapshot: row
                .get::<_, String>(5)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
        })
    }

    fn serialize_snapshot(snapshot: &SessionSnapshot) -> Result<String> {
        serde_json::to_string(snapshot)
            .map_err(|e| GleanerError::Other(format!("snapshot serialization failed: {}", e)))
    }
}

impl SessionStore for SqliteStore {
    fn create_session(&self, session: &CrawlSession) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, source_id, source_name, start_time, end_time, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.source_id,
                session.source_name,
                session.start_time.to_rfc3339(),
                session.end_time.map(|t| t.to_rfc3339()),
                Self::serialize_snapshot(&session.snapshot)?,
            ],
        )?;
        Ok(())
    }

    fn update_session(&self, id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET metadata = ?1 WHERE id = ?2",
            params![Self::serialize_snapshot(snapshot)?, id],
        )?;

        if changed == 0 {
            return Err(GleanerError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<CrawlSession>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT id, source_id, source_name, start_time, end_time, metadata
                 FROM sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(result)
    }

    fn end_session(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET end_time = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;

        if changed == 0 {
            return Err(GleanerError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    fn get_sessions(&self, source_id: Option<&str>) -> Result<Vec<CrawlSession>> {
        let conn = self.conn()?;
        let mut sessions = Vec::new();

        match source_id {
            Some(source_id) => {
                let mut stmt = conn.prepare(
                    "SELECT id, source_id, source_name, start_time, end_time, metadata
                     FROM sessions WHERE source_id = ?1 ORDER BY start_time DESC",
                )?;
                let rows = stmt.query_map(params![source_id], Self::row_to_session)?;
                for row in rows {
                    sessions.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, source_id, source_name, start_time, end_time, metadata
                     FROM sessions ORDER BY start_time DESC",
                )?;
                let rows = stmt.query_map([], Self::row_to_session)?;
                for row in rows {
                    sessions.push(row?);
                }
            }
        }

        Ok(sessions)
    }

    fn add_session_errors(
        &self,
        session_id: &str,
        kind: ErrorKind,
        errors: &[CrawlErrorRecord],
    ) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let raw: String = tx
            .query_row(
                "SELECT metadata FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| GleanerError::SessionNotFound(session_id.to_string()))?;

        let mut snapshot: SessionSnapshot = serde_json::from_str(&raw).unwrap_or_default();
        match kind {
            ErrorKind::Listing => snapshot.errors.listing.extend_from_slice(errors),
            ErrorKind::Content => snapshot.errors.content.extend_from_slice(errors),
        }

        tx.execute(
            "UPDATE sessions SET metadata = ?1 WHERE id = ?2",
            params![Self::serialize_snapshot(&snapshot)?, session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn add_content(&self, source_id: &str, item: &CrawledItem) -> Result<String> {
        let conn = self.conn()?;
        let content_id = item.content_id();

        conn.execute(
            "INSERT OR IGNORE INTO contents
                 (id, url, source_id, title, content, author, published_at, image_url, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                content_id,
                item.url,
                source_id,
                item.field("title"),
                item.field("content"),
                item.field("author"),
                item.field("published"),
                item.field("image"),
                item.fetched_at.to_rfc3339(),
            ],
        )?;

        Ok(content_id)
    }

    fn link_content_to_session(
        &self,
        session_id: &str,
        content_id: &str,
        processed_order: i64,
        had_error: bool,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO session_contents
                 (session_id, content_id, processed_order, had_error)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, content_id, processed_order, had_error as i32],
        )?;
        Ok(())
    }

    fn get_session_contents(&self, session_id: &str) -> Result<Vec<SessionContent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT content_id, processed_order, had_error
             FROM session_contents WHERE session_id = ?1 ORDER BY processed_order",
        )?;

        let contents = stmt
            .query_map(params![session_id], |row| {
                Ok(SessionContent {
                    content_id: row.get(0)?,
                    processed_order: row.get(1)?,
                    had_error: row.get::<_, i32>(2)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(contents)
    }

    fn get_existing_urls(&self, urls: &[String]) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut existing = HashSet::new();

        for chunk in urls.chunks(URL_BATCH_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT url FROM contents WHERE url IN ({})", placeholders);
            let mut stmt = conn.prepare(&sql)?;

            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                existing.insert(row?);
            }
        }

        Ok(existing)
    }

    fn checkpoint(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}
