//! Browser-automation boundary.
//!
//! The crawl engine only ever talks to [`Page`] and [`PageProvider`]; the
//! chromiumoxide implementation lives in [`chrome`] and tests substitute
//! fakes. A page is exclusively owned by whoever acquired it and must be
//! closed by that owner.

mod chrome;

pub use chrome::{ChromeBrowser, ChromePage};

use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;

/// One rendered browser page.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to a URL and wait for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Click the first element matching the selector.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Wait for the next navigation to complete.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()>;

    /// Wait until the selector matches something; Ok(false) on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Current page URL.
    async fn url(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// Source of independently owned pages.
#[async_trait]
pub trait PageProvider: Send + Sync {
    async fn acquire_page(&self) -> Result<Box<dyn Page>>;
}
