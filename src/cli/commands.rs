use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::app::{AppContext, GleanerError, Result};
use crate::browser::{ChromeBrowser, PageProvider};
use crate::config::SourceConfig;
use crate::crawl::{Crawler, PageCallback};
use crate::domain::{CrawlErrorRecord, CrawlSession, FieldExtractionStats};
use crate::extract::DomFieldExtractor;
use crate::store::SessionStore;

pub async fn crawl(
    ctx: &AppContext,
    config_path: &Path,
    max_pages: Option<u32>,
    headed: bool,
) -> Result<()> {
    let mut config = SourceConfig::load(config_path)?;
    if max_pages.is_some() {
        config.crawl.max_pages = max_pages;
    }

    let browser = ChromeBrowser::launch(!headed).await?;
    let listing_page = browser.acquire_page().await?;
    listing_page
        .navigate(&config.listing_url, config.pagination.nav_timeout())
        .await?;

    let extractor = DomFieldExtractor::new();
    let store: Arc<dyn SessionStore> = ctx.store.clone();

    let crawler = Crawler::new(&config, store.clone(), &browser, &extractor)
        .on_page_complete(store_page_contents(store, config.id.clone()));

    let interrupted = crawler.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Interrupt received, finishing current page...");
            interrupted.store(true, Ordering::SeqCst);
        }
    });

    let result = crawler.run(listing_page.as_ref()).await;
    if let Err(e) = listing_page.close().await {
        eprintln!("Failed to close listing page: {}", e);
    }
    let result = result?;

    let summary = &result.summary;
    let metadata = &summary.metadata;
    println!("Session {} ({})", summary.session_id, summary.source_id);
    println!("  Pages processed:    {}", metadata.pages_processed);
    println!("  Items found:        {}", summary.items_found());
    println!("  Items processed:    {}", metadata.items_processed);
    println!("  Duplicates skipped: {}", metadata.duplicates_skipped);
    println!("  URLs excluded:      {}", metadata.urls_excluded);
    println!("  Filtered items:     {}", metadata.total_filtered_items);
    println!("  Contents crawled:   {}", metadata.contents_crawled);
    if summary.items_with_content_errors > 0 {
        println!(
            "  Content errors:     {} item(s), see `gleaner show {}`",
            summary.items_with_content_errors, summary.session_id
        );
    }
    if let Some(reason) = metadata.stopped_reason {
        println!("  Stopped by:         {}", reason);
    }

    Ok(())
}

/// Build the page-completion callback: persist each item's content and
/// link it into the session in crawl order.
fn store_page_contents(store: Arc<dyn SessionStore>, source_id: String) -> PageCallback {
    let order = Arc::new(AtomicI64::new(0));
    Box::new(move |session_id, items| {
        let store = store.clone();
        let source_id = source_id.clone();
        let order = order.clone();
        Box::pin(async move {
            for item in items {
                let content_id = store.add_content(&source_id, item)?;
                let processed_order = order.fetch_add(1, Ordering::SeqCst) + 1;
                store.link_content_to_session(
                    session_id,
                    &content_id,
                    processed_order,
                    item.meta.content_error.is_some(),
                )?;
            }
            Ok(())
        })
    })
}

pub fn list_sessions(ctx: &AppContext, source: Option<&str>) -> Result<()> {
    let sessions = ctx.store.get_sessions(source)?;

    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    for session in sessions {
        print_session_line(&session);
    }
    Ok(())
}

pub fn show_session(ctx: &AppContext, session_id: &str) -> Result<()> {
    let session = ctx
        .store
        .get_session(session_id)?
        .ok_or_else(|| GleanerError::SessionNotFound(session_id.to_string()))?;

    print_session_line(&session);

    let metadata = &session.snapshot.metadata;
    println!("  Items found:        {}", metadata.items_found());
    println!("  Items processed:    {}", metadata.items_processed);
    println!("  Duplicates skipped: {}", metadata.duplicates_skipped);
    println!("  URLs excluded:      {}", metadata.urls_excluded);
    println!("  Filtered items:     {}", metadata.total_filtered_items);
    println!("  Contents crawled:   {}", metadata.contents_crawled);

    print_field_stats("Listing fields", &metadata.listing_field_stats);
    print_field_stats("Content fields", &metadata.content_field_stats);

    let errors = &session.snapshot.errors;
    print_errors("Listing errors", &errors.listing);
    print_errors("Content errors", &errors.content);

    Ok(())
}

fn print_session_line(session: &CrawlSession) {
    let status = match session.end_time {
        Some(end) => format!("ended {}", end.format("%Y-%m-%d %H:%M:%S")),
        None => "running".to_string(),
    };
    let reason = session
        .snapshot
        .metadata
        .stopped_reason
        .map(|r| format!(", {}", r))
        .unwrap_or_default();
    println!(
        "{}  {}  started {}  {} pages  ({}{})",
        session.id,
        session.source_id,
        session.start_time.format("%Y-%m-%d %H:%M:%S"),
        session.snapshot.metadata.pages_processed,
        status,
        reason,
    );
}

fn print_field_stats(label: &str, stats: &[FieldExtractionStats]) {
    if stats.is_empty() {
        return;
    }
    println!("  {}:", label);
    for stat in stats {
        let marker = if stat.is_optional { " (optional)" } else { "" };
        println!(
            "    {}{}: {}/{}",
            stat.field_name, marker, stat.success_count, stat.total_attempts
        );
        if !stat.missing_items.is_empty() && !stat.is_optional {
            println!("      missing at items: {:?}", stat.missing_items);
        }
    }
}

fn print_errors(label: &str, errors: &[CrawlErrorRecord]) {
    if errors.is_empty() {
        return;
    }
    println!("  {} ({}):", label, errors.len());
    for error in errors {
        match &error.url {
            Some(url) => println!("    {}: {}", url, error.message),
            None => println!("    {}", error.message),
        }
    }
}
