//! The crawl orchestration engine.
//!
//! One run drives a single shared listing page through its result pages,
//! fanning each page's new items out to a bounded pool of content pages:
//!
//! ```text
//! listing page → extract → dedup → pool → callback → tracker → paginate
//! ```
//!
//! - [`Paginator`]: advances the shared listing page, with retries
//! - [`DedupPipeline`]: exclusion → in-run → persisted-store filters
//! - [`ExtractionPool`]: bounded-concurrency content-page enrichment
//! - [`SessionTracker`]: the aggregate run state, snapshotted best-effort
//! - [`Crawler`]: the top-level per-page loop and stop conditions

pub mod dedup;
pub mod orchestrator;
pub mod pagination;
pub mod pool;
pub mod tracker;

pub use dedup::{DedupOutcome, DedupPipeline};
pub use orchestrator::{CrawlResult, Crawler};
pub use pagination::{Clock, Paginator, TokioClock};
pub use pool::ExtractionPool;
pub use tracker::SessionTracker;

use futures::future::BoxFuture;

use crate::app::Result;
use crate::domain::{CrawlMetadata, CrawledItem, SessionErrors};

/// Caller-supplied page-completion callback.
///
/// Invoked once per page with the session id and the final enriched
/// batch; owns durable content storage and is responsible for linking
/// stored ids into the session.
pub type PageCallback =
    Box<dyn for<'a> Fn(&'a str, &'a [CrawledItem]) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Final run summary. Items themselves were already handed off through the
/// page-completion callback, so [`CrawlResult::data`] is always empty.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub session_id: String,
    pub source_id: String,
    pub metadata: CrawlMetadata,

    /// Error lists re-read from the persisted session record
    pub errors: SessionErrors,

    /// Recomputed from the session's content-link records
    pub items_with_content_errors: u64,
}

impl CrawlSummary {
    pub fn items_found(&self) -> u64 {
        self.metadata.items_found()
    }
}
