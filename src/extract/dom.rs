use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::app::{GleanerError, Result};
use crate::browser::Page;
use crate::config::{FieldConfig, SourceConfig};
use crate::domain::{record_field, CrawledItem, FieldExtractionStats};
use crate::extract::{ContentExtraction, FieldExtractor, ListingExtraction};

/// Selector-driven extractor evaluating generated JavaScript in the page.
#[derive(Debug, Default)]
pub struct DomFieldExtractor;

impl DomFieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// JS fragment describing the configured fields, consumed by both
    /// generated scripts.
    fn field_table(fields: &BTreeMap<String, FieldConfig>) -> String {
        let entries: Vec<serde_json::Value> = fields
            .iter()
            .map(|(name, f)| {
                serde_json::json!({
                    "name": name,
                    "selector": f.selector,
                    "attribute": f.attribute,
                })
            })
            .collect();
        serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Script extracting all rows of the listing page.
    ///
    /// Rows without a usable `url` value are dropped with a diagnostic
    /// reason instead of becoming items.
    pub fn listing_script(config: &SourceConfig) -> String {
        let container = serde_json::to_string(&config.listing.container)
            .unwrap_or_else(|_| "\"\"".to_string());
        let fields = Self::field_table(&config.listing.fields);

        format!(
            r#"
            (() => {{
                const readField = (root, f) => {{
                    const el = root.querySelector(f.selector);
                    if (!el) return null;
                    if (!f.attribute || f.attribute === 'text') {{
                        const text = el.innerText || el.textContent || '';
                        return text.trim() || null;
                    }}
                    if (f.attribute === 'html') return el.innerHTML || null;
                    if (f.attribute === 'href' && el.href) return el.href;
                    return el.getAttribute(f.attribute);
                }};

                const fields = {fields};
                const rows = Array.from(document.querySelectorAll({container}));
                const items = [];
                const filteredReasons = [];

                for (const row of rows) {{
                    const values = {{}};
                    for (const f of fields) {{
                        const v = readField(row, f);
                        if (v !== null) values[f.name] = v;
                    }}
                    if (!values.url) {{
                        filteredReasons.push('row has no url');
                        continue;
                    }}
                    items.push(values);
                }}

                return {{ items, filteredReasons }};
            }})()
            "#
        )
    }

    /// Script extracting the configured content fields from the whole page.
    pub fn content_script(config: &SourceConfig) -> String {
        let fields = Self::field_table(&config.content.fields);

        format!(
            r#"
            (() => {{
                const readField = (root, f) => {{
                    const el = root.querySelector(f.selector);
                    if (!el) return null;
                    if (!f.attribute || f.attribute === 'text') {{
                        const text = el.innerText || el.textContent || '';
                        return text.trim() || null;
                    }}
                    if (f.attribute === 'html') return el.innerHTML || null;
                    if (f.attribute === 'href' && el.href) return el.href;
                    return el.getAttribute(f.attribute);
                }};

                const fields = {fields};
                const out = {{}};
                for (const f of fields) {{
                    out[f.name] = readField(document, f);
                }}
                return out;
            }})()
            "#
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    #[serde(default)]
    items: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    filtered_reasons: Vec<String>,
}

#[async_trait]
impl FieldExtractor for DomFieldExtractor {
    async fn extract_listing_items(
        &self,
        page: &dyn Page,
        config: &SourceConfig,
        stats: &mut Vec<FieldExtractionStats>,
        item_offset: u64,
    ) -> Result<ListingExtraction> {
        let raw = page.evaluate(&Self::listing_script(config)).await?;
        let raw: RawListing = serde_json::from_value(raw)
            .map_err(|e| GleanerError::Extraction(format!("bad listing payload: {}", e)))?;

        let mut items = Vec::with_capacity(raw.items.len());
        for (i, values) in raw.items.into_iter().enumerate() {
            let item_index = item_offset + i as u64 + 1;
            let url = match values.get("url") {
                Some(u) => u.clone(),
                None => continue, // the script guarantees this, but stay safe
            };

            let mut item = CrawledItem::new(url);
            for (name, field) in &config.listing.fields {
                let value = values.get(name);
                record_field(stats, name, field.optional, value.is_some(), item_index);
                if name == "url" {
                    continue;
                }
                if let Some(v) = value {
                    item.set_listing_field(name, v.clone());
                }
            }
            items.push(item);
        }

        Ok(ListingExtraction {
            filtered_count: raw.filtered_reasons.len() as u64,
            filtered_reasons: raw.filtered_reasons,
            items,
        })
    }

    async fn extract_content_fields(
        &self,
        page: &dyn Page,
        url: &str,
        config: &SourceConfig,
    ) -> Result<ContentExtraction> {
        page.navigate(url, config.content.nav_timeout()).await?;

        let wait = config.content.wait_after_load();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let raw = page.evaluate(&Self::content_script(config)).await?;
        let values: BTreeMap<String, Option<String>> = serde_json::from_value(raw)
            .map_err(|e| GleanerError::Extraction(format!("bad content payload: {}", e)))?;

        let mut extraction = ContentExtraction::default();
        for (name, field) in &config.content.fields {
            let value = values.get(name).cloned().flatten();
            if value.is_none() && !field.optional {
                extraction
                    .errors
                    .push(format!("required field '{}' not found at {}", name, url));
            }
            extraction.fields.insert(name.clone(), value);
        }

        Ok(extraction)
    }
}
