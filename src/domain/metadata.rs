use serde::{Deserialize, Serialize};

use crate::domain::session::StopReason;

/// Per-field success/failure counters accumulated across a run.
///
/// `missing_items` holds 1-based item indices, absolute across the whole run
/// (page 2 indices are offset by the item count of page 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldExtractionStats {
    pub field_name: String,
    pub success_count: u64,
    pub total_attempts: u64,
    pub is_optional: bool,
    pub missing_items: Vec<u64>,
}

impl FieldExtractionStats {
    pub fn new(field_name: impl Into<String>, is_optional: bool) -> Self {
        Self {
            field_name: field_name.into(),
            success_count: 0,
            total_attempts: 0,
            is_optional,
            missing_items: Vec::new(),
        }
    }

    /// Record one attempt for the item at the given absolute 1-based index.
    pub fn record(&mut self, success: bool, item_index: u64) {
        self.total_attempts += 1;
        if success {
            self.success_count += 1;
        } else {
            self.missing_items.push(item_index);
        }
    }
}

/// Record one field attempt in a running stats array, creating the entry on
/// first sight of the field name.
pub fn record_field(
    stats: &mut Vec<FieldExtractionStats>,
    field_name: &str,
    is_optional: bool,
    success: bool,
    item_index: u64,
) {
    match stats.iter_mut().find(|s| s.field_name == field_name) {
        Some(entry) => entry.record(success, item_index),
        None => {
            let mut entry = FieldExtractionStats::new(field_name, is_optional);
            entry.record(success, item_index);
            stats.push(entry);
        }
    }
}

/// The tracker's in-memory aggregate, mirrored into the session snapshot.
///
/// All counters are monotonically non-decreasing within a run. Error lists
/// are deliberately absent: error batches go straight to the persisted
/// session record so memory stays bounded on long runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlMetadata {
    pub pages_processed: u64,
    pub items_processed: u64,
    pub duplicates_skipped: u64,
    pub urls_excluded: u64,
    pub total_filtered_items: u64,
    pub contents_crawled: u64,
    pub listing_field_stats: Vec<FieldExtractionStats>,
    pub content_field_stats: Vec<FieldExtractionStats>,
    pub stopped_reason: Option<StopReason>,
}

impl CrawlMetadata {
    /// Total raw items seen on listing pages, reconstructed from the
    /// per-tier counters: found = processed + duplicates + filtered.
    pub fn items_found(&self) -> u64 {
        self.items_processed + self.duplicates_skipped + self.total_filtered_items
    }
}
