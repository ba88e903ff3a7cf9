use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gleaner::app::AppContext;
use gleaner::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::new(cli.db)?;

    match cli.command {
        Commands::Crawl {
            config,
            max_pages,
            headed,
        } => {
            commands::crawl(&ctx, &config, max_pages, headed).await?;
        }
        Commands::Sessions { source } => {
            commands::list_sessions(&ctx, source.as_deref())?;
        }
        Commands::Show { session_id } => {
            commands::show_session(&ctx, &session_id)?;
        }
    }

    Ok(())
}
