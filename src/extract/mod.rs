//! Field extraction boundary.
//!
//! Turns a rendered page plus a declarative field configuration into raw
//! field values. The crawl engine depends only on the [`FieldExtractor`]
//! trait; [`DomFieldExtractor`] is the default selector-driven
//! implementation running generated JavaScript inside the page.

mod dom;

pub use dom::DomFieldExtractor;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::app::Result;
use crate::browser::Page;
use crate::config::SourceConfig;
use crate::domain::{CrawledItem, FieldExtractionStats};

/// Outcome of extracting one listing page.
#[derive(Debug, Default)]
pub struct ListingExtraction {
    /// Items in listing order, each carrying its listing-derived fields
    pub items: Vec<CrawledItem>,

    /// Rows dropped before they became items (e.g. no URL)
    pub filtered_count: u64,

    /// Diagnostic reasons for the dropped rows
    pub filtered_reasons: Vec<String>,
}

/// Outcome of extracting one item's content page.
///
/// Every configured content field appears in `fields`; `None` means the
/// field was attempted and not found.
#[derive(Debug, Default)]
pub struct ContentExtraction {
    pub fields: BTreeMap<String, Option<String>>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Extract raw items from the current listing page, recording one
    /// attempt per listing field per kept item into `stats`. Item indices
    /// are 1-based and offset by `item_offset` so they stay absolute
    /// across pages.
    async fn extract_listing_items(
        &self,
        page: &dyn Page,
        config: &SourceConfig,
        stats: &mut Vec<FieldExtractionStats>,
        item_offset: u64,
    ) -> Result<ListingExtraction>;

    /// Navigate `page` to `url` and extract the configured content fields.
    async fn extract_content_fields(
        &self,
        page: &dyn Page,
        url: &str,
        config: &SourceConfig,
    ) -> Result<ContentExtraction>;
}
