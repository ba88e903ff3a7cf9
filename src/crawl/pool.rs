use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::app::Result;
use crate::browser::{Page, PageProvider};
use crate::config::SourceConfig;
use crate::domain::{record_field, CrawlErrorRecord, CrawledItem, FieldExtractionStats};
use crate::extract::{ContentExtraction, FieldExtractor};

/// Bounded-concurrency content-page enrichment for one page's batch.
///
/// Pages are acquired up front and reused across items through free slots;
/// the shared listing page is never touched. All acquired pages are closed
/// before `extract` returns, whatever the individual tasks did.
pub struct ExtractionPool<'a> {
    provider: &'a dyn PageProvider,
    extractor: &'a dyn FieldExtractor,
}

impl<'a> ExtractionPool<'a> {
    pub fn new(provider: &'a dyn PageProvider, extractor: &'a dyn FieldExtractor) -> Self {
        Self {
            provider,
            extractor,
        }
    }

    /// Enrich `items` in place with content-page fields.
    ///
    /// `item_offset` keeps stats indices absolute across pages; results are
    /// applied by each item's original position, never by completion order.
    /// A single item's failure is recorded into its own metadata and
    /// `errors`, and does not cancel sibling tasks.
    pub async fn extract(
        &self,
        items: &mut [CrawledItem],
        config: &SourceConfig,
        item_offset: u64,
        concurrency_limit: usize,
        content_stats: &mut Vec<FieldExtractionStats>,
        errors: &mut Vec<CrawlErrorRecord>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let slots = concurrency_limit.max(1).min(items.len());
        let mut pages: Vec<Box<dyn Page>> = Vec::with_capacity(slots);
        for _ in 0..slots {
            match self.provider.acquire_page().await {
                Ok(page) => pages.push(page),
                Err(e) => {
                    close_all(&pages).await;
                    return Err(e);
                }
            }
        }

        debug!("Extracting {} items across {} pages", items.len(), slots);

        let mut free: Vec<usize> = (0..slots).collect();
        let mut in_flight: FuturesUnordered<
            BoxFuture<'_, (usize, usize, Result<ContentExtraction>)>,
        > = FuturesUnordered::new();
        let mut next_item = 0;

        loop {
            while next_item < items.len() {
                let Some(slot) = free.pop() else { break };
                let index = next_item;
                next_item += 1;

                let url = items[index].url.clone();
                let page: &dyn Page = &*pages[slot];
                in_flight.push(Box::pin(async move {
                    let outcome = self.extractor.extract_content_fields(page, &url, config).await;
                    (slot, index, outcome)
                }));
            }

            let Some((slot, index, outcome)) = in_flight.next().await else {
                break;
            };
            free.push(slot);
            apply_outcome(
                &mut items[index],
                outcome,
                config,
                item_offset + index as u64 + 1,
                content_stats,
                errors,
            );
        }

        close_all(&pages).await;
        Ok(())
    }
}

async fn close_all(pages: &[Box<dyn Page>]) {
    for page in pages {
        if let Err(e) = page.close().await {
            warn!("Failed to close content page: {}", e);
        }
    }
}

/// Fold one task's outcome into its item, by original position.
fn apply_outcome(
    item: &mut CrawledItem,
    outcome: Result<ContentExtraction>,
    config: &SourceConfig,
    item_index: u64,
    content_stats: &mut Vec<FieldExtractionStats>,
    errors: &mut Vec<CrawlErrorRecord>,
) {
    match outcome {
        Ok(extraction) => {
            for (name, field) in &config.content.fields {
                let value = extraction.fields.get(name).cloned().flatten();
                record_field(content_stats, name, field.optional, value.is_some(), item_index);
                item.apply_content_field(name, value);
            }
            for message in extraction.errors {
                errors.push(CrawlErrorRecord::new(Some(item.url.clone()), message));
            }
        }
        Err(e) => {
            warn!("Content extraction failed for {}: {}", item.url, e);
            // Every field still counts one failed attempt so totals stay
            // aligned across the stats array.
            for (name, field) in &config.content.fields {
                record_field(content_stats, name, field.optional, false, item_index);
                item.apply_content_field(name, None);
            }
            item.meta.content_error = Some(e.to_string());
            errors.push(CrawlErrorRecord::new(Some(item.url.clone()), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::app::GleanerError;
    use crate::domain::FieldExtractionStats;
    use crate::extract::ListingExtraction;

    /// Provider whose pages track how many are open at once.
    struct CountingProvider {
        open: Arc<AtomicUsize>,
        max_open: Arc<AtomicUsize>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                open: Arc::new(AtomicUsize::new(0)),
                max_open: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct CountingPage {
        open: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageProvider for CountingProvider {
        async fn acquire_page(&self) -> Result<Box<dyn Page>> {
            let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now_open, Ordering::SeqCst);
            Ok(Box::new(CountingPage {
                open: self.open.clone(),
            }))
        }
    }

    #[async_trait]
    impl Page for CountingPage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
        async fn url(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(&self) -> Result<()> {
            self.open.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Extractor fake: yields a title per URL, fails for URLs listed in
    /// `failing`, and records how many extractions ran at once.
    struct FakeContentExtractor {
        failing: Vec<String>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl FakeContentExtractor {
        fn new(failing: Vec<String>) -> Self {
            Self {
                failing,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FieldExtractor for FakeContentExtractor {
        async fn extract_listing_items(
            &self,
            _page: &dyn Page,
            _config: &SourceConfig,
            _stats: &mut Vec<FieldExtractionStats>,
            _item_offset: u64,
        ) -> Result<ListingExtraction> {
            unreachable!("pool never extracts listings")
        }

        async fn extract_content_fields(
            &self,
            _page: &dyn Page,
            url: &str,
            _config: &SourceConfig,
        ) -> Result<ContentExtraction> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(url.to_string());

            if self.failing.iter().any(|f| f == url) {
                return Err(GleanerError::Browser(format!("nav timeout for {}", url)));
            }

            let mut extraction = ContentExtraction::default();
            extraction
                .fields
                .insert("title".into(), Some(format!("title of {}", url)));
            Ok(extraction)
        }
    }

    fn pool_config() -> SourceConfig {
        let mut config: SourceConfig = toml::from_str(
            r#"
            id = "t"
            name = "T"
            listing_url = "https://t.example.com/"

            [listing]
            container = "li"

            [listing.fields.url]
            selector = "a"
            attribute = "href"
            "#,
        )
        .unwrap();
        config.content.fields.insert(
            "title".into(),
            crate::config::FieldConfig {
                selector: "h1".into(),
                attribute: None,
                optional: false,
            },
        );
        config
    }

    fn batch(n: usize) -> Vec<CrawledItem> {
        (0..n)
            .map(|i| CrawledItem::new(format!("https://t.example.com/item/{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_bound_and_all_pages_closed() {
        let provider = CountingProvider::new();
        let extractor = FakeContentExtractor::new(vec![]);
        let pool = ExtractionPool::new(&provider, &extractor);

        let mut items = batch(12);
        let mut stats = Vec::new();
        let mut errors = Vec::new();
        pool.extract(&mut items, &pool_config(), 0, 3, &mut stats, &mut errors)
            .await
            .unwrap();

        assert!(provider.max_open.load(Ordering::SeqCst) <= 3);
        assert_eq!(provider.open.load(Ordering::SeqCst), 0);
        assert!(extractor.max_running.load(Ordering::SeqCst) <= 3);
        assert!(errors.is_empty());
        for item in &items {
            assert!(item.field("title").is_some());
        }
    }

    #[tokio::test]
    async fn test_acquires_only_as_many_pages_as_items() {
        let provider = CountingProvider::new();
        let extractor = FakeContentExtractor::new(vec![]);
        let pool = ExtractionPool::new(&provider, &extractor);

        let mut items = batch(2);
        let mut stats = Vec::new();
        let mut errors = Vec::new();
        pool.extract(&mut items, &pool_config(), 0, 8, &mut stats, &mut errors)
            .await
            .unwrap();

        assert!(provider.max_open.load(Ordering::SeqCst) <= 2);
        assert_eq!(provider.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_item_recorded_without_cancelling_siblings() {
        let provider = CountingProvider::new();
        let extractor =
            FakeContentExtractor::new(vec!["https://t.example.com/item/1".to_string()]);
        let pool = ExtractionPool::new(&provider, &extractor);

        let mut items = batch(4);
        let mut stats = Vec::new();
        let mut errors = Vec::new();
        pool.extract(&mut items, &pool_config(), 0, 2, &mut stats, &mut errors)
            .await
            .unwrap();

        // Siblings still enriched
        assert!(items[0].field("title").is_some());
        assert!(items[2].field("title").is_some());
        assert!(items[3].field("title").is_some());

        // The failing item keeps its metadata trail and the shared list entry
        assert!(items[1].field("title").is_none());
        assert!(items[1].meta.content_error.is_some());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].url.as_deref(), Some("https://t.example.com/item/1"));

        // All pages closed despite the failure
        assert_eq!(provider.open.load(Ordering::SeqCst), 0);

        // Stats indexed by original position: item 2 (1-based) missing
        let title = stats.iter().find(|s| s.field_name == "title").unwrap();
        assert_eq!(title.total_attempts, 4);
        assert_eq!(title.success_count, 3);
        assert_eq!(title.missing_items, vec![2]);
    }

    #[tokio::test]
    async fn test_stats_use_absolute_offsets() {
        let provider = CountingProvider::new();
        let extractor =
            FakeContentExtractor::new(vec!["https://t.example.com/item/0".to_string()]);
        let pool = ExtractionPool::new(&provider, &extractor);

        let mut items = batch(2);
        let mut stats = Vec::new();
        let mut errors = Vec::new();
        pool.extract(&mut items, &pool_config(), 7, 2, &mut stats, &mut errors)
            .await
            .unwrap();

        let title = stats.iter().find(|s| s.field_name == "title").unwrap();
        assert_eq!(title.missing_items, vec![8]);
    }
}
