use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which extraction stage produced a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStage {
    Listing,
    Content,
}

/// Per-item extraction diagnostics: which fields came from which stage
/// and which failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMeta {
    /// Field name → the stage that produced its current value
    pub field_stages: BTreeMap<String, FieldStage>,

    /// Content-page fields that failed to extract
    pub failed_fields: Vec<String>,

    /// Set when the item's content page could not be processed at all
    pub content_error: Option<String>,
}

/// One listed item, enriched in place as it moves through the pipeline.
///
/// The URL is the item's sole identity: two items with the same URL are the
/// same entity across dedup tiers and persistence, regardless of other
/// field differences. Items are ephemeral — they are handed off through the
/// page-completion callback and never persisted by the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledItem {
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub meta: ItemMeta,
    pub fetched_at: DateTime<Utc>,
}

impl CrawledItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fields: BTreeMap::new(),
            meta: ItemMeta::default(),
            fetched_at: Utc::now(),
        }
    }

    /// Deterministic content id for this item's URL.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record a field extracted from the listing page.
    pub fn set_listing_field(&mut self, name: &str, value: String) {
        self.fields.insert(name.to_string(), value);
        self.meta
            .field_stages
            .insert(name.to_string(), FieldStage::Listing);
    }

    /// Apply a content-page extraction outcome for one field.
    ///
    /// A present value overwrites any listing-derived value; an absent one
    /// leaves the listing value in place and records the failure.
    pub fn apply_content_field(&mut self, name: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.fields.insert(name.to_string(), v);
                self.meta
                    .field_stages
                    .insert(name.to_string(), FieldStage::Content);
            }
            None => {
                self.meta.failed_fields.push(name.to_string());
            }
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_deterministic() {
        let a = CrawledItem::new("https://example.com/a");
        let b = CrawledItem::new("https://example.com/a");
        assert_eq!(a.content_id(), b.content_id());
        assert_eq!(a.content_id().len(), 64);
    }

    #[test]
    fn test_content_id_differs_by_url() {
        let a = CrawledItem::new("https://example.com/a");
        let b = CrawledItem::new("https://example.com/b");
        assert_ne!(a.content_id(), b.content_id());
    }

    #[test]
    fn test_content_field_overwrites_listing() {
        let mut item = CrawledItem::new("https://example.com/a");
        item.set_listing_field("title", "Listing Title".into());
        item.apply_content_field("title", Some("Full Title".into()));

        assert_eq!(item.field("title"), Some("Full Title"));
        assert_eq!(
            item.meta.field_stages.get("title"),
            Some(&FieldStage::Content)
        );
    }

    #[test]
    fn test_failed_content_field_keeps_listing_value() {
        let mut item = CrawledItem::new("https://example.com/a");
        item.set_listing_field("title", "Listing Title".into());
        item.apply_content_field("title", None);

        assert_eq!(item.field("title"), Some("Listing Title"));
        assert_eq!(
            item.meta.field_stages.get("title"),
            Some(&FieldStage::Listing)
        );
        assert_eq!(item.meta.failed_fields, vec!["title".to_string()]);
    }
}
