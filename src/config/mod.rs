use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app::{GleanerError, Result};

/// A declarative source definition, loaded from TOML.
///
/// Describes one paginated listing source: where the listing lives, which
/// fields to pull from listing rows and from each item's own content page,
/// how to advance pagination, and the run-level crawl options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stable identifier for this source (used in session records)
    pub id: String,

    /// Human-readable source name
    pub name: String,

    /// URL of the first listing page
    pub listing_url: String,

    pub listing: ListingConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub crawl: CrawlOptions,
}

/// Field extraction config for the listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// Selector matching one listing row per item
    pub container: String,

    /// Field name → selector config, evaluated relative to each row.
    /// Must include a `url` field; its value is each item's identity.
    pub fields: BTreeMap<String, FieldConfig>,
}

/// Field extraction config for an item's own content page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Field name → selector config, evaluated against the whole page.
    /// Content-page values overwrite listing values of the same name.
    pub fields: BTreeMap<String, FieldConfig>,

    /// Page load timeout in milliseconds (default: 30000)
    pub nav_timeout_ms: u64,

    /// Wait after load for dynamic content in milliseconds (default: 1000)
    pub wait_after_load_ms: u64,
}

/// One extractable field: a CSS selector plus an optional attribute.
///
/// When `attribute` is unset the element's text content is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub selector: String,

    #[serde(default)]
    pub attribute: Option<String>,

    /// Optional fields that fail extraction are recorded in stats only,
    /// never as errors
    #[serde(default)]
    pub optional: bool,
}

/// How to advance the shared listing page to the next results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Selector for the "next page" control
    pub next_selector: String,

    /// Selector for the results container; its reappearance after a click
    /// counts as a successful page turn
    pub results_selector: String,

    /// Timeout for the navigation-completed signal in milliseconds
    pub nav_timeout_ms: u64,

    /// Timeout for the results-container signal in milliseconds
    pub selector_timeout_ms: u64,

    /// Fixed delay between retry attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            next_selector: ".pagination .next".to_string(),
            results_selector: String::new(),
            nav_timeout_ms: 10_000,
            selector_timeout_ms: 5_000,
            retry_delay_ms: 1_000,
        }
    }
}

impl PaginationConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            nav_timeout_ms: 30_000,
            wait_after_load_ms: 1_000,
        }
    }
}

impl ContentConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn wait_after_load(&self) -> Duration {
        Duration::from_millis(self.wait_after_load_ms)
    }
}

/// Run-level crawl options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlOptions {
    /// Stop after this many listing pages (None = unbounded)
    pub max_pages: Option<u32>,

    /// Maximum concurrent content pages (default: 5)
    pub content_concurrency: usize,

    /// Skip URLs already recorded by any prior run (default: true)
    pub skip_existing_urls: bool,

    /// Stop the run when a page yields zero new, non-excluded items
    pub stop_on_all_duplicates: bool,

    /// Regex patterns; matching URLs are excluded before dedup
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            content_concurrency: 5,
            skip_existing_urls: true,
            stop_on_all_duplicates: false,
            exclude_patterns: Vec::new(),
        }
    }
}

impl CrawlOptions {
    /// Compile the exclusion patterns, failing on the first invalid one.
    pub fn compiled_exclusions(&self) -> Result<Vec<Regex>> {
        self.exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    GleanerError::Config(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect()
    }
}

impl SourceConfig {
    /// Load and validate a source definition from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SourceConfig = toml::from_str(&raw)
            .map_err(|e| GleanerError::Config(format!("invalid source config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(GleanerError::Config("source id must not be empty".into()));
        }
        url::Url::parse(&self.listing_url)?;
        if self.listing.container.is_empty() {
            return Err(GleanerError::Config(
                "listing.container must not be empty".into(),
            ));
        }
        if !self.listing.fields.contains_key("url") {
            return Err(GleanerError::Config(
                "listing.fields must define a 'url' field".into(),
            ));
        }
        if self.crawl.content_concurrency == 0 {
            return Err(GleanerError::Config(
                "crawl.content_concurrency must be at least 1".into(),
            ));
        }
        self.crawl.compiled_exclusions()?;
        Ok(())
    }
}
