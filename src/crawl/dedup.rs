use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::app::Result;
use crate::config::CrawlOptions;
use crate::domain::CrawledItem;
use crate::store::SessionStore;

/// Per-page removal counts, one per tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub raw_count: u64,
    pub excluded: u64,
    pub in_run_duplicates: u64,
    pub store_duplicates: u64,
}

impl DedupOutcome {
    pub fn duplicates(&self) -> u64 {
        self.in_run_duplicates + self.store_duplicates
    }

    /// Raw items that were not excluded — the population the
    /// all-duplicates stop condition is judged against.
    pub fn non_excluded(&self) -> u64 {
        self.raw_count - self.excluded
    }
}

/// Three ordered filters applied to each page's raw extracted items:
/// exclusion, in-run dedup, persisted-store dedup. The URL is the sole
/// identity at every tier.
pub struct DedupPipeline {
    exclusions: Vec<Regex>,
    seen: HashSet<String>,
}

impl DedupPipeline {
    pub fn new(options: &CrawlOptions) -> Result<Self> {
        Ok(Self {
            exclusions: options.compiled_exclusions()?,
            seen: HashSet::new(),
        })
    }

    /// Filter a page's raw items, counting each tier's removals separately.
    pub fn apply(
        &mut self,
        items: Vec<CrawledItem>,
        store: &dyn SessionStore,
        skip_existing_urls: bool,
    ) -> Result<(Vec<CrawledItem>, DedupOutcome)> {
        let mut outcome = DedupOutcome {
            raw_count: items.len() as u64,
            ..Default::default()
        };

        // Tier 1: configured exclusions remove items permanently; they are
        // not duplicates and never count toward the all-duplicates stop.
        let mut remaining = Vec::with_capacity(items.len());
        for item in items {
            if self.is_excluded(&item.url) {
                debug!("Excluding {}", item.url);
                outcome.excluded += 1;
            } else {
                remaining.push(item);
            }
        }

        // Tier 2: URLs already seen on an earlier page of this run.
        let mut new_this_run = Vec::with_capacity(remaining.len());
        for item in remaining {
            if self.seen.insert(item.url.clone()) {
                new_this_run.push(item);
            } else {
                outcome.in_run_duplicates += 1;
            }
        }

        // Tier 3: URLs recorded by any prior run, looked up in batches.
        if !skip_existing_urls || new_this_run.is_empty() {
            return Ok((new_this_run, outcome));
        }

        let urls: Vec<String> = new_this_run.iter().map(|i| i.url.clone()).collect();
        let existing = store.get_existing_urls(&urls)?;

        let mut survivors = Vec::with_capacity(new_this_run.len());
        for item in new_this_run {
            if existing.contains(&item.url) {
                outcome.store_duplicates += 1;
            } else {
                survivors.push(item);
            }
        }

        Ok((survivors, outcome))
    }

    fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.iter().any(|pattern| pattern.is_match(url))
    }
}
