//! # Gleaner
//!
//! A browser-driven crawler for paginated listing sites.
//!
//! ## Architecture
//!
//! Gleaner follows a modular pipeline architecture:
//!
//! ```text
//! Browser → Extract → Dedup → Pool → Store
//! ```
//!
//! - [`browser`]: Headless Chrome via chromiumoxide, behind page traits
//! - [`extract`]: Selector-driven field extraction on rendered pages
//! - [`crawl`]: The orchestration engine (pagination, dedup, pool, tracker)
//! - [`store`]: SQLite persistence layer
//!
//! ## Quick Start
//!
//! ```bash
//! # Crawl a configured source
//! gleaner crawl sources/example-news.toml
//!
//! # List past sessions
//! gleaner sessions
//!
//! # Inspect one session's metadata and errors
//! gleaner show 20260314092653
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: Declarative source definitions (TOML)
//! - [`domain`]: Core domain models (CrawledItem, CrawlSession, metadata)

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store and
/// the components built on it.
pub mod app;

/// Browser-automation boundary.
///
/// - [`Page`](browser::Page): one rendered page
/// - [`PageProvider`](browser::PageProvider): acquires pages on demand
/// - [`ChromeBrowser`](browser::ChromeBrowser): chromiumoxide implementation
pub mod browser;

/// Command-line interface using clap.
///
/// Defines the CLI structure and subcommands:
/// - `crawl <config>` - Crawl a configured source
/// - `sessions [--source <id>]` - List past sessions
/// - `show <session-id>` - Inspect one session
pub mod cli;

/// Declarative source definitions.
///
/// A [`SourceConfig`](config::SourceConfig) describes a listing page, its
/// fields, pagination controls, and run-level crawl options.
pub mod config;

/// The crawl orchestration engine.
///
/// - [`Crawler`](crawl::Crawler): per-page loop and stop conditions
/// - [`Paginator`](crawl::Paginator): listing-page advancement with retries
/// - [`ExtractionPool`](crawl::ExtractionPool): bounded content concurrency
/// - [`SessionTracker`](crawl::SessionTracker): aggregate run state
pub mod crawl;

/// Core domain models.
///
/// - [`CrawledItem`](domain::CrawledItem): one listing item with SHA256 id
/// - [`CrawlSession`](domain::CrawlSession): the persisted run record
/// - [`CrawlMetadata`](domain::CrawlMetadata): per-run counters and stats
pub mod domain;

/// Field extraction on rendered pages.
///
/// - [`FieldExtractor`](extract::FieldExtractor): the extraction trait
/// - [`DomFieldExtractor`](extract::DomFieldExtractor): selector-driven default
pub mod extract;

/// SQLite persistence layer.
///
/// - [`SessionStore`](store::SessionStore): trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
