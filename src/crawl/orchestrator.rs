use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::{GleanerError, Result};
use crate::browser::{Page, PageProvider};
use crate::config::SourceConfig;
use crate::crawl::{
    CrawlSummary, DedupPipeline, ExtractionPool, PageCallback, Paginator, SessionTracker,
};
use crate::domain::{CrawlErrorRecord, CrawledItem, FieldExtractionStats, StopReason};
use crate::extract::FieldExtractor;
use crate::store::SessionStore;

/// Outcome of one full run. Items were delivered incrementally through the
/// page callback, so `data` stays empty and `summary` carries the totals.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub data: Vec<CrawledItem>,
    pub summary: CrawlSummary,
}

/// The top-level crawl loop for one configured source.
///
/// Owns the page lifecycle: each listing page is extracted, deduplicated,
/// enriched through the content pool, handed to the callback, and only
/// then advanced past. Exactly one stop reason terminates the loop.
pub struct Crawler<'a> {
    config: &'a SourceConfig,
    store: Arc<dyn SessionStore>,
    provider: &'a dyn PageProvider,
    extractor: &'a dyn FieldExtractor,
    paginator: Paginator,
    interrupted: Arc<AtomicBool>,
    on_page_complete: Option<PageCallback>,
}

impl<'a> Crawler<'a> {
    pub fn new(
        config: &'a SourceConfig,
        store: Arc<dyn SessionStore>,
        provider: &'a dyn PageProvider,
        extractor: &'a dyn FieldExtractor,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            extractor,
            paginator: Paginator::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            on_page_complete: None,
        }
    }

    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = paginator;
        self
    }

    /// Register the per-page delivery callback. A callback error aborts
    /// the run rather than silently dropping a page's items.
    pub fn on_page_complete(mut self, callback: PageCallback) -> Self {
        self.on_page_complete = Some(callback);
        self
    }

    /// Shared flag a signal handler can set to request a clean stop; it is
    /// checked between pages, never mid-page.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Drive the run over an already-navigated listing page.
    ///
    /// The session is always closed, on both the normal and the error
    /// path; a structural failure still leaves a finished session record
    /// behind for inspection.
    pub async fn run(&self, listing_page: &dyn Page) -> Result<CrawlResult> {
        let mut tracker = SessionTracker::start(
            self.store.clone(),
            &self.config.id,
            &self.config.name,
        )?;
        let session_id = tracker.session_id().to_string();
        info!(
            "Starting crawl of {} (session {})",
            self.config.id, session_id
        );

        match self.run_loop(listing_page, &mut tracker).await {
            Ok(()) => {
                let result = tracker.build_result()?;
                info!(
                    "Crawl of {} finished: {} pages, {} items, stopped by {}",
                    self.config.id,
                    result.summary.metadata.pages_processed,
                    result.summary.metadata.items_processed,
                    result
                        .summary
                        .metadata
                        .stopped_reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".into()),
                );
                Ok(result)
            }
            Err(e) => {
                error!("Crawl of {} failed: {}", self.config.id, e);
                if let Err(close_err) = tracker.build_result() {
                    warn!("Failed to close session {}: {}", session_id, close_err);
                }
                Err(GleanerError::for_source(&self.config.id, e))
            }
        }
    }

    async fn run_loop(
        &self,
        listing_page: &dyn Page,
        tracker: &mut SessionTracker,
    ) -> Result<()> {
        let options = &self.config.crawl;
        let mut dedup = DedupPipeline::new(options)?;
        let pool = ExtractionPool::new(self.provider, self.extractor);

        let mut listing_stats: Vec<FieldExtractionStats> = Vec::new();
        let mut content_stats: Vec<FieldExtractionStats> = Vec::new();
        let mut item_offset: u64 = 0;

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                tracker.set_stopped_reason(StopReason::ProcessInterrupted);
                return Ok(());
            }
            if let Some(max) = options.max_pages {
                if tracker.metadata().pages_processed >= u64::from(max) {
                    tracker.set_stopped_reason(StopReason::MaxPages);
                    return Ok(());
                }
            }

            tracker.increment_pages_processed();
            let page_number = tracker.metadata().pages_processed;
            debug!("Processing listing page {}", page_number);

            let listing = self
                .extractor
                .extract_listing_items(listing_page, self.config, &mut listing_stats, item_offset)
                .await?;
            if listing.filtered_count > 0 {
                tracker.add_filtered_items(listing.filtered_count);
                let records: Vec<CrawlErrorRecord> = listing
                    .filtered_reasons
                    .iter()
                    .map(|reason| CrawlErrorRecord::new(None, reason.clone()))
                    .collect();
                tracker.add_listing_errors(&records);
            }

            let (mut items, outcome) =
                dedup.apply(listing.items, self.store.as_ref(), options.skip_existing_urls)?;
            tracker.add_urls_excluded(outcome.excluded);
            tracker.add_duplicates_skipped(outcome.duplicates());

            if items.is_empty() {
                if options.stop_on_all_duplicates && outcome.non_excluded() > 0 {
                    debug!(
                        "Page {} yielded no new items out of {}, stopping",
                        page_number, outcome.raw_count
                    );
                    tracker.set_stopped_reason(StopReason::AllDuplicates);
                    return Ok(());
                }
            } else {
                let mut content_errors = Vec::new();
                pool.extract(
                    &mut items,
                    self.config,
                    item_offset,
                    options.content_concurrency,
                    &mut content_stats,
                    &mut content_errors,
                )
                .await?;
                tracker.add_content_errors(&content_errors);

                if let Some(callback) = &self.on_page_complete {
                    callback(tracker.session_id(), &items).await?;
                }

                let crawled = items
                    .iter()
                    .filter(|i| i.meta.content_error.is_none())
                    .count() as u64;
                tracker.add_items(items.len() as u64);
                tracker.add_contents_crawled(crawled);
                item_offset += items.len() as u64;
            }

            tracker.update_field_stats(&listing_stats, &content_stats);
            tracker.checkpoint();

            if !self.paginator.advance(listing_page, &self.config.pagination).await {
                tracker.set_stopped_reason(StopReason::NoNextButton);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::domain::record_field;
    use crate::extract::{ContentExtraction, ListingExtraction};
    use crate::store::SqliteStore;

    /// Listing page whose pagination control is scripted per page index.
    struct ScriptedSite {
        has_next: Vec<bool>,
        endless: bool,
        current: AtomicUsize,
    }

    impl ScriptedSite {
        fn with_pages(has_next: Vec<bool>) -> Self {
            Self {
                has_next,
                endless: false,
                current: AtomicUsize::new(0),
            }
        }

        fn endless() -> Self {
            Self {
                has_next: Vec::new(),
                endless: true,
                current: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Page for ScriptedSite {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<Value> {
            let index = self.current.load(Ordering::SeqCst);
            let found = self.endless || self.has_next.get(index).copied().unwrap_or(false);
            Ok(json!({ "found": found, "disabled": false }))
        }

        async fn click(&self, _selector: &str) -> Result<()> {
            self.current.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_for_navigation(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }

        async fn url(&self) -> Result<String> {
            Ok(format!(
                "https://news.example.com/archive/{}",
                self.current.load(Ordering::SeqCst)
            ))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubPage;

    #[async_trait]
    impl Page for StubPage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> Result<Value> {
            Ok(Value::Null)
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
            Ok("about:blank".into())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubProvider;

    #[async_trait]
    impl PageProvider for StubProvider {
        async fn acquire_page(&self) -> Result<Box<dyn Page>> {
            Ok(Box::new(StubPage))
        }
    }

    /// What one listing call should yield.
    #[derive(Clone, Default)]
    struct PageFixture {
        urls: Vec<String>,
        missing_title: Vec<String>,
        filtered_reasons: Vec<String>,
    }

    impl PageFixture {
        fn with_urls(urls: &[&str]) -> Self {
            Self {
                urls: urls.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    /// Extractor replaying scripted listing pages; unscripted pages yield
    /// two fresh unique items each.
    struct ScriptedExtractor {
        pages: Vec<PageFixture>,
        calls: AtomicUsize,
        failing_content: Vec<String>,
    }

    impl ScriptedExtractor {
        fn new(pages: Vec<PageFixture>) -> Self {
            Self {
                pages,
                calls: AtomicUsize::new(0),
                failing_content: Vec::new(),
            }
        }

        fn failing_content(mut self, urls: &[&str]) -> Self {
            self.failing_content = urls.iter().map(|u| u.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl FieldExtractor for ScriptedExtractor {
        async fn extract_listing_items(
            &self,
            _page: &dyn Page,
            _config: &SourceConfig,
            stats: &mut Vec<FieldExtractionStats>,
            item_offset: u64,
        ) -> Result<ListingExtraction> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fixture = self.pages.get(call).cloned().unwrap_or_else(|| PageFixture {
                urls: vec![
                    format!("https://news.example.com/p{}/1", call),
                    format!("https://news.example.com/p{}/2", call),
                ],
                ..Default::default()
            });

            let mut extraction = ListingExtraction {
                filtered_count: fixture.filtered_reasons.len() as u64,
                filtered_reasons: fixture.filtered_reasons.clone(),
                ..Default::default()
            };
            for (i, url) in fixture.urls.iter().enumerate() {
                let mut item = CrawledItem::new(url.clone());
                let has_title = !fixture.missing_title.contains(url);
                record_field(stats, "title", false, has_title, item_offset + i as u64 + 1);
                if has_title {
                    item.set_listing_field("title", format!("Title {}", i + 1));
                }
                extraction.items.push(item);
            }
            Ok(extraction)
        }

        async fn extract_content_fields(
            &self,
            _page: &dyn Page,
            url: &str,
            _config: &SourceConfig,
        ) -> Result<ContentExtraction> {
            if self.failing_content.iter().any(|u| u == url) {
                return Err(GleanerError::Extraction(format!("timeout loading {}", url)));
            }
            let mut extraction = ContentExtraction::default();
            extraction
                .fields
                .insert("content".into(), Some(format!("body of {}", url)));
            Ok(extraction)
        }
    }

    fn test_config() -> SourceConfig {
        toml::from_str(
            r#"
            id = "example-news"
            name = "Example News"
            listing_url = "https://news.example.com/archive"

            [listing]
            container = "ul.results li"

            [listing.fields.url]
            selector = "a"
            attribute = "href"

            [listing.fields.title]
            selector = "h3"

            [content.fields.content]
            selector = "article"

            [pagination]
            next_selector = ".pager .next"
            results_selector = "ul.results"
            "#,
        )
        .unwrap()
    }

    fn persisting_callback(store: Arc<dyn SessionStore>, source_id: &str) -> PageCallback {
        let source_id = source_id.to_string();
        let order = Arc::new(AtomicUsize::new(0));
        Box::new(move |session_id, items| {
            let store = store.clone();
            let source_id = source_id.clone();
            let order = order.clone();
            Box::pin(async move {
                for item in items {
                    let content_id = store.add_content(&source_id, item)?;
                    let n = order.fetch_add(1, Ordering::SeqCst) as i64 + 1;
                    store.link_content_to_session(
                        session_id,
                        &content_id,
                        n,
                        item.meta.content_error.is_some(),
                    )?;
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_run_reconciles_counters_and_persists() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        // Content recorded by a prior run
        store
            .add_content("example-news", &CrawledItem::new("https://news.example.com/old"))
            .unwrap();

        let mut config = test_config();
        config.crawl.exclude_patterns = vec!["/sponsored/".into()];

        // Page 1: two new, one excluded, one known from the prior run, one
        // filtered row. Page 2: one repeat, one new, then no next control.
        let mut page1 = PageFixture::with_urls(&[
            "https://news.example.com/a",
            "https://news.example.com/b",
            "https://news.example.com/sponsored/x",
            "https://news.example.com/old",
        ]);
        page1.filtered_reasons = vec!["row has no url".into()];
        let page2 = PageFixture::with_urls(&[
            "https://news.example.com/a",
            "https://news.example.com/c",
        ]);

        let extractor = ScriptedExtractor::new(vec![page1, page2])
            .failing_content(&["https://news.example.com/b"]);
        let site = ScriptedSite::with_pages(vec![true, false]);
        let provider = StubProvider;
        let store_dyn: Arc<dyn SessionStore> = store.clone();

        let crawler = Crawler::new(&config, store_dyn.clone(), &provider, &extractor)
            .on_page_complete(persisting_callback(store_dyn, "example-news"));
        let result = crawler.run(&site).await.unwrap();

        let metadata = &result.summary.metadata;
        assert_eq!(metadata.pages_processed, 2);
        assert_eq!(metadata.items_processed, 3);
        assert_eq!(metadata.duplicates_skipped, 2);
        assert_eq!(metadata.urls_excluded, 1);
        assert_eq!(metadata.total_filtered_items, 2);
        assert_eq!(result.summary.items_found(), 7);
        assert_eq!(metadata.contents_crawled, 2);
        assert_eq!(metadata.stopped_reason, Some(StopReason::NoNextButton));
        assert_eq!(result.summary.items_with_content_errors, 1);
        assert_eq!(result.summary.errors.content.len(), 1);
        assert_eq!(result.summary.errors.listing.len(), 1);

        let session = store.get_session(&result.summary.session_id).unwrap().unwrap();
        assert!(session.end_time.is_some());

        let contents = store.get_session_contents(&result.summary.session_id).unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(
            contents.iter().map(|c| c.processed_order).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(contents.iter().filter(|c| c.had_error).count(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_max_pages() {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let mut config = test_config();
        config.crawl.max_pages = Some(5);
        config.crawl.skip_existing_urls = false;

        let extractor = ScriptedExtractor::new(Vec::new());
        let site = ScriptedSite::endless();
        let provider = StubProvider;

        let crawler = Crawler::new(&config, store, &provider, &extractor);
        let result = crawler.run(&site).await.unwrap();

        assert_eq!(result.summary.metadata.pages_processed, 5);
        assert_eq!(result.summary.metadata.items_processed, 10);
        assert_eq!(
            result.summary.metadata.stopped_reason,
            Some(StopReason::MaxPages)
        );
    }

    #[tokio::test]
    async fn test_all_duplicates_ignores_excluded_only_pages() {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let mut config = test_config();
        config.crawl.stop_on_all_duplicates = true;
        config.crawl.exclude_patterns = vec!["/sponsored/".into()];

        // Page 2 is entirely excluded items; only page 3's all-seen batch
        // may stop the run.
        let pages = vec![
            PageFixture::with_urls(&["https://news.example.com/a", "https://news.example.com/b"]),
            PageFixture::with_urls(&["https://news.example.com/sponsored/1"]),
            PageFixture::with_urls(&["https://news.example.com/a", "https://news.example.com/b"]),
        ];
        let extractor = ScriptedExtractor::new(pages);
        let site = ScriptedSite::endless();
        let provider = StubProvider;

        let crawler = Crawler::new(&config, store, &provider, &extractor);
        let result = crawler.run(&site).await.unwrap();

        assert_eq!(result.summary.metadata.pages_processed, 3);
        assert_eq!(result.summary.metadata.items_processed, 2);
        assert_eq!(result.summary.metadata.urls_excluded, 1);
        assert_eq!(
            result.summary.metadata.stopped_reason,
            Some(StopReason::AllDuplicates)
        );
    }

    #[tokio::test]
    async fn test_interrupt_flag_stops_before_any_page() {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let config = test_config();
        let extractor = ScriptedExtractor::new(Vec::new());
        let site = ScriptedSite::endless();
        let provider = StubProvider;

        let crawler = Crawler::new(&config, store.clone(), &provider, &extractor);
        crawler.interrupt_flag().store(true, Ordering::SeqCst);
        let result = crawler.run(&site).await.unwrap();

        assert_eq!(result.summary.metadata.pages_processed, 0);
        assert_eq!(
            result.summary.metadata.stopped_reason,
            Some(StopReason::ProcessInterrupted)
        );
        let session = store.get_session(&result.summary.session_id).unwrap().unwrap();
        assert!(session.end_time.is_some());
    }

    #[tokio::test]
    async fn test_field_stats_use_absolute_indices() {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let config = test_config();

        let mut page2 = PageFixture::with_urls(&[
            "https://news.example.com/c",
            "https://news.example.com/d",
        ]);
        page2.missing_title = vec!["https://news.example.com/d".into()];
        let pages = vec![
            PageFixture::with_urls(&["https://news.example.com/a", "https://news.example.com/b"]),
            page2,
        ];
        let extractor = ScriptedExtractor::new(pages);
        let site = ScriptedSite::with_pages(vec![true, false]);
        let provider = StubProvider;

        let crawler = Crawler::new(&config, store, &provider, &extractor);
        let result = crawler.run(&site).await.unwrap();

        let listing = &result.summary.metadata.listing_field_stats;
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].field_name, "title");
        assert_eq!(listing[0].total_attempts, 4);
        assert_eq!(listing[0].success_count, 3);
        // Second item of the second page, counted across pages
        assert_eq!(listing[0].missing_items, vec![4]);

        let content = &result.summary.metadata.content_field_stats;
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].total_attempts, 4);
        assert_eq!(content[0].success_count, 4);
    }

    #[tokio::test]
    async fn test_callback_error_aborts_and_closes_session() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let config = test_config();
        let extractor = ScriptedExtractor::new(Vec::new());
        let site = ScriptedSite::endless();
        let provider = StubProvider;
        let store_dyn: Arc<dyn SessionStore> = store.clone();

        let crawler = Crawler::new(&config, store_dyn, &provider, &extractor)
            .on_page_complete(Box::new(|_session_id, _items| {
                Box::pin(async { Err(GleanerError::Other("sink failed".into())) })
            }));
        let err = crawler.run(&site).await.unwrap_err();

        match err {
            GleanerError::Crawl { source, .. } => assert_eq!(source, "example-news"),
            other => panic!("unexpected error: {}", other),
        }

        let sessions = store.get_sessions(Some("example-news")).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].end_time.is_some());
        assert!(sessions[0].snapshot.metadata.stopped_reason.is_none());
    }
}
