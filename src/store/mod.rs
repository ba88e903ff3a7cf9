pub mod sqlite;

use std::collections::HashSet;

use crate::app::Result;
use crate::domain::{
    CrawlErrorRecord, CrawlSession, CrawledItem, ErrorKind, SessionContent, SessionSnapshot,
};

pub use sqlite::SqliteStore;

/// Durable session/content bookkeeping.
///
/// The crawl engine treats this as a best-effort observability sink for
/// session snapshots; content rows are the source of truth for the
/// persisted-store dedup tier and for externally reconstructed summaries.
pub trait SessionStore: Send + Sync {
    // Session operations
    fn create_session(&self, session: &CrawlSession) -> Result<()>;
    /// Fails when the session does not exist.
    fn update_session(&self, id: &str, snapshot: &SessionSnapshot) -> Result<()>;
    fn get_session(&self, id: &str) -> Result<Option<CrawlSession>>;
    fn end_session(&self, id: &str) -> Result<()>;
    fn get_sessions(&self, source_id: Option<&str>) -> Result<Vec<CrawlSession>>;

    /// Atomic, additive merge of error records into the stored snapshot.
    fn add_session_errors(
        &self,
        session_id: &str,
        kind: ErrorKind,
        errors: &[CrawlErrorRecord],
    ) -> Result<()>;

    // Content operations
    fn add_content(&self, source_id: &str, item: &CrawledItem) -> Result<String>;
    fn link_content_to_session(
        &self,
        session_id: &str,
        content_id: &str,
        processed_order: i64,
        had_error: bool,
    ) -> Result<()>;
    fn get_session_contents(&self, session_id: &str) -> Result<Vec<SessionContent>>;

    /// Which of the given URLs are already recorded, batched to respect
    /// backend parameter-count limits.
    fn get_existing_urls(&self, urls: &[String]) -> Result<HashSet<String>>;

    /// Flush the write-ahead log to bound its growth on long runs.
    fn checkpoint(&self) -> Result<()>;
}
