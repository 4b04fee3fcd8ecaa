//! sfe-admin - filter registry administration
//!
//! Installs filter configuration files into the filter database, lists what
//! is stored, runs stored filters on sample input and removes filters and
//! groups.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sfe_core::config::TomlConfig;
use sfe_core::db::init_database;
use sfe_core::PersistableFilterRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

/// Command-line arguments for sfe-admin
#[derive(Parser, Debug)]
#[command(name = "sfe-admin")]
#[command(about = "Administer the typed filter registry")]
#[command(version)]
struct Args {
    /// Bootstrap configuration file
    #[arg(short, long, env = "SFE_CONFIG")]
    config: Option<PathBuf>,

    /// Filter database (overrides the configuration file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the groups and filters of a TOML installation file
    Install { file: PathBuf },

    /// List filter groups
    Groups,

    /// List top-level filters of a group or class
    Filters {
        #[arg(long)]
        group: Option<String>,

        #[arg(long)]
        class: Option<String>,

        #[arg(long)]
        context: Option<i64>,

        /// List templates instead of configured filters
        #[arg(long)]
        templates: bool,
    },

    /// Find filters by input/output type pattern (`*` is a wildcard)
    Find {
        input: String,
        output: String,

        /// JSON sample the filters must accept
        #[arg(long, conflicts_with = "produces")]
        accepts: Option<String>,

        /// JSON sample the filters must be able to produce
        #[arg(long)]
        produces: Option<String>,
    },

    /// Run a stored filter on a JSON input
    Run {
        id: i64,
        input: String,

        /// Input uses the tagged value encoding (needed for class instances)
        #[arg(long)]
        typed: bool,
    },

    /// Delete a filter and its sub-filters
    DeleteFilter { id: i64 },

    /// Delete a filter group no filter uses
    DeleteGroup { symbolic: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::resolve(args.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config)?;
    info!("Starting sfe-admin v{}", env!("CARGO_PKG_VERSION"));

    let db_path = args.database.clone().unwrap_or_else(|| config.database_path());
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let environment = config
        .environment
        .to_environment()
        .context("Invalid [environment] configuration")?;
    let registry = PersistableFilterRegistry::new(pool, environment);

    commands::dispatch(&registry, args.command).await
}

/// `RUST_LOG` wins over the configured level; logs go to the configured
/// file or stderr
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
