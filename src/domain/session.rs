use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::metadata::CrawlMetadata;

/// Why a run ended. At most one reason is ever set; absence means the run
/// is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxPages,
    NoNextButton,
    AllDuplicates,
    ProcessInterrupted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::MaxPages => "max_pages",
            StopReason::NoNextButton => "no_next_button",
            StopReason::AllDuplicates => "all_duplicates",
            StopReason::ProcessInterrupted => "process_interrupted",
        };
        f.write_str(s)
    }
}

/// Which error list a batch of error records belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Listing,
    Content,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Listing => "listing",
            ErrorKind::Content => "content",
        }
    }
}

/// One recoverable error captured during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlErrorRecord {
    pub url: Option<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl CrawlErrorRecord {
    pub fn new(url: Option<String>, message: impl Into<String>) -> Self {
        Self {
            url,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Accumulated error lists, persisted only inside the session snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionErrors {
    pub listing: Vec<CrawlErrorRecord>,
    pub content: Vec<CrawlErrorRecord>,
}

/// The serialized form of a session's progress: the metadata aggregate plus
/// the additive error lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub metadata: CrawlMetadata,

    #[serde(default)]
    pub errors: SessionErrors,
}

/// The persisted record of one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlSession {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub snapshot: SessionSnapshot,
}

/// Link record associating persisted content with a session.
///
/// `processed_order` is the only externally meaningful sequencing.
#[derive(Debug, Clone)]
pub struct SessionContent {
    pub content_id: String,
    pub processed_order: i64,
    pub had_error: bool,
}

/// Derive a session id from the run's start time at second resolution.
pub fn derive_session_id(start_time: DateTime<Utc>) -> String {
    start_time.format("%Y%m%d%H%M%S").to_string()
}
