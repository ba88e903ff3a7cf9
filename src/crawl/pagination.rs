use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{select_all, BoxFuture};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::app::Result;
use crate::browser::Page;
use crate::config::PaginationConfig;

/// Total attempts per advance, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Poll interval for the URL-change signal.
const URL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Injectable sleep so retry tests never wait for real.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
enum Attempt {
    /// No next control on the page — terminal
    NoControl,
    /// Control present but disabled — terminal
    Disabled,
    /// The listing page moved on
    Advanced,
    /// Click happened but no success signal arrived
    Failed,
}

#[derive(Debug, Deserialize)]
struct NextControlState {
    found: bool,
    disabled: bool,
}

/// Advances the shared listing page to the next results page.
///
/// `advance` only ever answers "is there another page", so every internal
/// failure degrades to `false` after retries instead of propagating.
pub struct Paginator {
    clock: Arc<dyn Clock>,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new()
    }
}

impl Paginator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Try to move the listing page to the next results page.
    ///
    /// Returns `false` when there is no further page: control absent or
    /// disabled, or all attempts exhausted. Never an error.
    pub async fn advance(&self, page: &dyn Page, config: &PaginationConfig) -> bool {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_advance(page, config).await {
                Ok(Attempt::NoControl) => {
                    debug!("No pagination control matching '{}'", config.next_selector);
                    return false;
                }
                Ok(Attempt::Disabled) => {
                    debug!("Pagination control is disabled");
                    return false;
                }
                Ok(Attempt::Advanced) => return true,
                Ok(Attempt::Failed) => {
                    warn!("Pagination attempt {}/{} saw no page turn", attempt, MAX_ATTEMPTS);
                }
                Err(e) => {
                    warn!("Pagination attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                }
            }

            if attempt < MAX_ATTEMPTS {
                self.clock.sleep(config.retry_delay()).await;
            }
        }

        false
    }

    async fn try_advance(&self, page: &dyn Page, config: &PaginationConfig) -> Result<Attempt> {
        let state = self.control_state(page, &config.next_selector).await?;
        if !state.found {
            return Ok(Attempt::NoControl);
        }
        if state.disabled {
            return Ok(Attempt::Disabled);
        }

        let url_before = page.url().await?;
        page.click(&config.next_selector).await?;

        // Race the three success signals; any one of them counts.
        let mut waits: Vec<BoxFuture<'_, bool>> = vec![Box::pin(async {
            page.wait_for_navigation(config.nav_timeout()).await.is_ok()
        })];
        if !config.results_selector.is_empty() {
            waits.push(Box::pin(async {
                page.wait_for_selector(&config.results_selector, config.selector_timeout())
                    .await
                    .unwrap_or(false)
            }));
        }
        waits.push(Box::pin(self.url_changed(page, url_before, config.selector_timeout())));

        loop {
            let (succeeded, _index, rest) = select_all(waits).await;
            if succeeded {
                return Ok(Attempt::Advanced);
            }
            if rest.is_empty() {
                return Ok(Attempt::Failed);
            }
            waits = rest;
        }
    }

    async fn control_state(&self, page: &dyn Page, selector: &str) -> Result<NextControlState> {
        let sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
        let script = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                if (!el) return {{ found: false, disabled: false }};
                const style = window.getComputedStyle(el);
                const hidden = style.display === 'none'
                    || style.visibility === 'hidden'
                    || el.offsetParent === null;
                const disabled = el.disabled === true
                    || hidden
                    || el.getAttribute('aria-disabled') === 'true'
                    || el.classList.contains('disabled')
                    || el.classList.contains('is-disabled');
                return {{ found: true, disabled }};
            }})()
            "#
        );

        let raw = page.evaluate(&script).await?;
        serde_json::from_value(raw).map_err(|e| {
            crate::app::GleanerError::Browser(format!("bad pagination control state: {}", e))
        })
    }

    /// Poll for a URL change, bounded by poll count so a fake clock
    /// cannot spin forever.
    async fn url_changed(&self, page: &dyn Page, url_before: String, timeout: Duration) -> bool {
        let polls = (timeout.as_millis() / URL_POLL_INTERVAL.as_millis()).max(1);
        for _ in 0..polls {
            self.clock.sleep(URL_POLL_INTERVAL).await;
            match page.url().await {
                Ok(url) if url != url_before => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    }
}
