//! RecordQL CLI
//!
//! Runs a query document against a fixture file:
//! - `recordql query --file q.json --fixtures data.json [--dry-run]`
//! - `recordql config` prints a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use recordql::config::{generate_default_config, Config, ConfigOrigin, LoggingConfig};
use recordql::query::{ExecutionMode, QueryExecutor};
use recordql::source::MemorySource;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "recordql")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Structured query engine for paginated entity APIs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run or dry-run a query
    Query {
        /// Query document file
        #[arg(short, long, conflicts_with = "query")]
        file: Option<PathBuf>,
        /// Query document as inline JSON
        #[arg(short, long)]
        query: Option<String>,
        /// Fixture file: {"persons": [...], "companies": [...], ...}
        #[arg(long)]
        fixtures: PathBuf,
        /// Plan only, print estimated API calls
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, origin) = match &cli.config {
        Some(path) => (Config::load_with_env(path)?, ConfigOrigin::from_file(path)),
        None => Config::load_default(),
    };
    init_logging(&config.logging);
    origin.log();

    match cli.command {
        Commands::Query {
            file,
            query,
            fixtures,
            dry_run,
        } => {
            let input = match (file, query) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading query file {:?}", path))?,
                (None, Some(inline)) => inline,
                (None, None) => bail!("either --file or --query is required"),
            };

            let fixture_text = std::fs::read_to_string(&fixtures)
                .with_context(|| format!("reading fixtures {:?}", fixtures))?;
            let fixture: serde_json::Value = serde_json::from_str(&fixture_text)
                .with_context(|| format!("parsing fixtures {:?}", fixtures))?;
            let source = Arc::new(MemorySource::from_fixture(&fixture)?);

            let executor = QueryExecutor::new(source, config.engine)?;
            let mode = if dry_run {
                ExecutionMode::DryRun
            } else {
                ExecutionMode::Live
            };

            match executor.run_str(&input, mode).await {
                Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
                Err(e) => {
                    tracing::debug!(kind = e.kind(), "query failed");
                    println!("{}", serde_json::to_string_pretty(&e.to_response())?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing config to {:?}", path))?;
                    eprintln!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout carries only the result document
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("recordql={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
