mod cli;
mod commands;
mod output;

use anyhow::{Result, anyhow};
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;
use querycache::config::loader::{self, load_config};
use querycache::observability;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let config = load_config(cli.config.as_deref()).map_err(|e| anyhow!(e))?;

    observability::init_from_config(&config.logging);
    if let Some(level) = cli.log_level.as_deref() {
        observability::apply_logging_level(level);
    }
    tracing::debug!(
        config = cli.config.as_deref().unwrap_or(loader::DEFAULT_CONFIG_FILE),
        redis_enabled = config.redis.enabled,
        "configuration loaded"
    );

    match &cli.command {
        Commands::Status => commands::inspect::status(&config, format).await?,
        Commands::Policies => commands::inspect::policies(&config, format)?,
        Commands::Key(args) => {
            commands::inspect::key(&config, &args.query_class, &args.params, format)?
        }
        Commands::Invalidate(args) => {
            commands::cache::invalidate(&config, &args.pattern, format).await?
        }
        Commands::InvalidateEntity(args) => {
            commands::cache::invalidate_entity(&config, &args.entity_id, format).await?
        }
        Commands::InvalidateClass(args) => {
            commands::cache::invalidate_class(&config, &args.query_class, format).await?
        }
        Commands::Clear(args) => commands::cache::clear(&config, args.yes, format).await?,
    }

    Ok(())
}
