use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;

use crate::app::{GleanerError, Result};
use crate::browser::{Page, PageProvider};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Chromium-backed page provider using chromiumoxide.
pub struct ChromeBrowser {
    browser: Arc<Browser>,
    user_agent: Option<String>,
}

impl ChromeBrowser {
    /// Launch a browser instance.
    pub async fn launch(headless: bool) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer");

        if !headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| GleanerError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            GleanerError::Browser(format!(
                "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
                e
            ))
        })?;

        // Drive the CDP event loop for the lifetime of the browser
        tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        Ok(Self {
            browser: Arc::new(browser),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
        })
    }
}

#[async_trait]
impl PageProvider for ChromeBrowser {
    async fn acquire_page(&self) -> Result<Box<dyn Page>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| GleanerError::Browser(format!("Failed to create page: {}", e)))?;

        if let Some(ref ua) = self.user_agent {
            page.set_user_agent(ua)
                .await
                .map_err(|e| GleanerError::Browser(format!("Failed to set user agent: {}", e)))?;
        }

        Ok(Box::new(ChromePage { page }))
    }
}

/// A single chromiumoxide page behind the [`Page`] trait.
pub struct ChromePage {
    page: chromiumoxide::Page,
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let goto = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| GleanerError::Browser(format!("Failed to open {}: {}", url, e)))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| GleanerError::Browser(format!("Navigation failed: {}", e)))?;
            Ok(())
        };

        tokio::time::timeout(timeout, goto)
            .await
            .map_err(|_| GleanerError::Browser(format!("Navigation to {} timed out", url)))?
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| GleanerError::Browser(format!("Script execution failed: {}", e)))?
            .into_value()
            .map_err(|e| GleanerError::Browser(format!("Failed to parse result: {:?}", e)))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) return false; el.click(); return true; }})()",
            sel = js_string(selector)
        );
        let clicked = self.evaluate(&script).await?;
        if clicked.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(GleanerError::Browser(format!(
                "No element matching '{}' to click",
                selector
            )))
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| GleanerError::Browser("Navigation timed out".to_string()))?
            .map_err(|e| GleanerError::Browser(format!("Navigation failed: {}", e)))?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let script = format!(
            "!!document.querySelector({sel})",
            sel = js_string(selector)
        );
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.evaluate(&script).await?.as_bool() == Some(true) {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| GleanerError::Browser(format!("Failed to read page URL: {}", e)))?;
        Ok(url.unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| GleanerError::Browser(format!("Failed to close page: {}", e)))
    }
}
