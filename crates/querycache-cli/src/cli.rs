use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "querycache")]
#[command(about = "Inspect and invalidate the shared query cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file (defaults to ./querycache.toml if present)
    #[arg(short, long, global = true, env = "QUERYCACHE_CONFIG")]
    pub config: Option<String>,

    /// Log level (overrides logging.level from config)
    #[arg(long, global = true, env = "QUERYCACHE_LOG")]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show remote tier connectivity and effective settings
    Status,
    /// List query classes with their TTL and encoding policy
    Policies,
    /// Derive the cache key for a query class and parameters
    Key(KeyArgs),
    /// Remove entries whose key or descriptor contains a substring
    Invalidate(InvalidateArgs),
    /// Remove entries scoped to an entity (e.g. a company id)
    InvalidateEntity(InvalidateEntityArgs),
    /// Remove every entry of a query class
    InvalidateClass(InvalidateClassArgs),
    /// Remove every entry in the cache namespace
    Clear(ClearArgs),
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Query class (e.g. dashboard_metrics)
    pub query_class: String,
    /// Parameters as a JSON object (e.g. '{"companyId":42}')
    #[arg(long, default_value = "{}")]
    pub params: String,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Substring to match (e.g. '"companyId":42')
    pub pattern: String,
}

#[derive(clap::Args)]
pub struct InvalidateEntityArgs {
    /// Entity id as it appears in query parameters
    pub entity_id: String,
}

#[derive(clap::Args)]
pub struct InvalidateClassArgs {
    /// Query class (e.g. report_data)
    pub query_class: String,
}

#[derive(clap::Args)]
pub struct ClearArgs {
    /// Skip the confirmation check
    #[arg(long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_key_params_default_to_empty_object() {
        let cli = Cli::try_parse_from(["querycache", "key", "dashboard_metrics"]).unwrap();
        match cli.command {
            Commands::Key(args) => {
                assert_eq!(args.query_class, "dashboard_metrics");
                assert_eq!(args.params, "{}");
            }
            _ => panic!("expected key command"),
        }
    }

    #[test]
    fn test_clear_requires_flag_to_be_explicit() {
        let cli = Cli::try_parse_from(["querycache", "clear"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear(ClearArgs { yes: false })));
    }
}
