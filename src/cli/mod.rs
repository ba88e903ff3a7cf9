pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gleaner")]
#[command(about = "A browser-driven crawler for paginated listing sites", long_about = None)]
pub struct Cli {
    /// Database path (default: platform data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a configured source
    Crawl {
        /// Path to the source definition (TOML)
        config: PathBuf,

        /// Override the configured page limit
        #[arg(long)]
        max_pages: Option<u32>,

        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
    },
    /// List past crawl sessions
    Sessions {
        /// Only sessions for this source id
        #[arg(long)]
        source: Option<String>,
    },
    /// Show one session's metadata and errors
    Show {
        /// Session id, as printed by `sessions`
        session_id: String,
    },
}
