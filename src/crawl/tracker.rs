use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::app::{GleanerError, Result};
use crate::crawl::{CrawlResult, CrawlSummary};
use crate::domain::{
    derive_session_id, CrawlErrorRecord, CrawlMetadata, CrawlSession, ErrorKind,
    FieldExtractionStats, SessionSnapshot, StopReason,
};
use crate::store::SessionStore;

/// The aggregate run state. Every component reports into it; it persists
/// incremental snapshots so progress stays observable across crashes.
///
/// Memory is updated first; each snapshot write is best effort — the
/// session record is a secondary observability artifact, never the source
/// of truth for crawled content, so persistence failures are logged and
/// swallowed. Error batches bypass memory entirely and are appended
/// straight to the stored record, keeping long runs bounded.
pub struct SessionTracker {
    session_id: String,
    source_id: String,
    store: Arc<dyn SessionStore>,
    metadata: CrawlMetadata,
}

impl SessionTracker {
    /// Create the session record and the in-memory aggregate.
    ///
    /// Session creation itself is fatal when it fails: without the record
    /// there is nothing to track into.
    pub fn start(
        store: Arc<dyn SessionStore>,
        source_id: &str,
        source_name: &str,
    ) -> Result<Self> {
        let start_time = Utc::now();
        let session = CrawlSession {
            id: derive_session_id(start_time),
            source_id: source_id.to_string(),
            source_name: source_name.to_string(),
            start_time,
            end_time: None,
            snapshot: SessionSnapshot::default(),
        };
        store.create_session(&session)?;

        debug!("Started session {} for source {}", session.id, source_id);
        Ok(Self {
            session_id: session.id,
            source_id: source_id.to_string(),
            store,
            metadata: CrawlMetadata::default(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn metadata(&self) -> &CrawlMetadata {
        &self.metadata
    }

    pub fn increment_pages_processed(&mut self) {
        self.metadata.pages_processed += 1;
        self.persist();
    }

    pub fn add_items(&mut self, count: u64) {
        self.metadata.items_processed += count;
        self.persist();
    }

    pub fn add_duplicates_skipped(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.metadata.duplicates_skipped += count;
        self.persist();
    }

    /// Excluded URLs count into the filtered total as well, so that
    /// found = processed + duplicates + filtered always reconciles.
    pub fn add_urls_excluded(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.metadata.urls_excluded += count;
        self.metadata.total_filtered_items += count;
        self.persist();
    }

    pub fn add_filtered_items(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        self.metadata.total_filtered_items += count;
        self.persist();
    }

    pub fn add_contents_crawled(&mut self, count: u64) {
        self.metadata.contents_crawled += count;
        self.persist();
    }

    pub fn set_stopped_reason(&mut self, reason: StopReason) {
        if let Some(existing) = self.metadata.stopped_reason {
            debug!(
                "Stop reason already set to {}, ignoring {}",
                existing, reason
            );
            return;
        }
        self.metadata.stopped_reason = Some(reason);
        self.persist();
    }

    /// Replace the running field-stats arrays with the orchestrator's
    /// accumulated view.
    pub fn update_field_stats(
        &mut self,
        listing: &[FieldExtractionStats],
        content: &[FieldExtractionStats],
    ) {
        self.metadata.listing_field_stats = listing.to_vec();
        self.metadata.content_field_stats = content.to_vec();
        self.persist();
    }

    pub fn add_listing_errors(&self, errors: &[CrawlErrorRecord]) {
        self.append_errors(ErrorKind::Listing, errors);
    }

    pub fn add_content_errors(&self, errors: &[CrawlErrorRecord]) {
        self.append_errors(ErrorKind::Content, errors);
    }

    /// Ask the store to flush its write-ahead log; called about once per
    /// page to bound log growth on long runs.
    pub fn checkpoint(&self) {
        if let Err(e) = self.store.checkpoint() {
            warn!("Checkpoint failed: {}", e);
        }
    }

    /// Close the session and assemble the final summary.
    ///
    /// Error lists are re-read from the stored record and the
    /// content-error count is recomputed from the authoritative
    /// content-link records, so the summary matches what an external
    /// reader would reconstruct.
    pub fn build_result(self) -> Result<CrawlResult> {
        let session = self
            .store
            .get_session(&self.session_id)?
            .ok_or_else(|| GleanerError::SessionNotFound(self.session_id.clone()))?;

        let contents = self.store.get_session_contents(&self.session_id)?;
        let items_with_content_errors = contents.iter().filter(|c| c.had_error).count() as u64;

        self.store.end_session(&self.session_id)?;
        debug!("Ended session {}", self.session_id);

        Ok(CrawlResult {
            data: Vec::new(),
            summary: CrawlSummary {
                session_id: self.session_id,
                source_id: self.source_id,
                metadata: self.metadata,
                errors: session.snapshot.errors,
                items_with_content_errors,
            },
        })
    }

    fn append_errors(&self, kind: ErrorKind, errors: &[CrawlErrorRecord]) {
        if errors.is_empty() {
            return;
        }
        if let Err(e) = self.store.add_session_errors(&self.session_id, kind, errors) {
            warn!(
                "Failed to append {} {} errors to session {}: {}",
                errors.len(),
                kind.as_str(),
                self.session_id,
                e
            );
        }
    }

    /// Best-effort snapshot write, preserving the stored error lists.
    fn persist(&self) {
        let errors = match self.store.get_session(&self.session_id) {
            Ok(Some(session)) => session.snapshot.errors,
            _ => Default::default(),
        };
        let snapshot = SessionSnapshot {
            metadata: self.metadata.clone(),
            errors,
        };
        if let Err(e) = self.store.update_session(&self.session_id, &snapshot) {
            warn!(
                "Failed to persist snapshot for session {}: {}",
                self.session_id, e
            );
        }
    }
}
