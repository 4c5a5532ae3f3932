//! # Registry Scrape CLI (`rgs`)
//!
//! ## Usage
//!
//! ```bash
//! rgs --config ./config/rgs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgs init` | Create the SQLite database and run schema migrations |
//! | `rgs seed <ids>...` | Queue overview pages for entities |
//! | `rgs run` | Scrape until the queue drains (Ctrl-C stops between items) |
//! | `rgs requeue` | Requeue retryable failures now, release expired claims |
//! | `rgs retry-failed` | Reset every failed item, terminal ones included |
//! | `rgs stats` | Queue and table counts |
//! | `rgs charges <id>` | Page states and stored charges for one entity |
//! | `rgs import-external <csv>` | Load the external dataset |
//! | `rgs match` | Match external records against the registry |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG`
//! (default `registry_scrape=info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use registry_scrape::pool::PoolOptions;
use registry_scrape::progress::ProgressMode;
use registry_scrape::{charges, config, matching, migrate, queue, scrape, stats};

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "registry_scrape=info";

/// Registry Scrape CLI — resumable registry scraping and company matching.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rgs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rgs",
    about = "Registry Scrape — resumable corporate registry scraping and company matching",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rgs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it again leaves existing data untouched.
    Init,

    /// Queue the overview page of each entity.
    ///
    /// Entities already queued are skipped.
    Seed {
        /// Registry entity ids.
        ids: Vec<String>,

        /// Read more ids from a file, one per line (`#` starts a comment).
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Process the queue with concurrent workers.
    Run {
        /// Worker count (default: `scrape.workers`).
        #[arg(long)]
        workers: Option<usize>,

        /// Stop after this many items.
        #[arg(long)]
        limit: Option<u64>,

        /// Progress on stderr: off, human or json (default: human on a TTY).
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Requeue retryable failed items without waiting for their retry time.
    Requeue {
        /// Treat every current claim as expired. Only use with no run active.
        #[arg(long)]
        release_claims: bool,
    },

    /// Reset failed items (terminal ones included) with a fresh attempt budget.
    RetryFailed {
        /// Only this entity.
        #[arg(long)]
        entity: Option<String>,
    },

    /// Show queue and table statistics.
    Stats,

    /// Show page states and stored charges for one entity.
    Charges {
        entity: String,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Import external records from a CSV with id, name and number columns.
    ImportExternal { path: PathBuf },

    /// Match external records against scraped registry companies.
    Match,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed { ids, file } => {
            queue::run_seed(&cfg, &ids, file.as_deref()).await?;
        }
        Commands::Run {
            workers,
            limit,
            progress,
        } => {
            let options = PoolOptions { workers, limit };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            scrape::run_scrape(&cfg, options, progress).await?;
        }
        Commands::Requeue { release_claims } => {
            queue::run_requeue(&cfg, release_claims).await?;
        }
        Commands::RetryFailed { entity } => {
            queue::run_retry_failed(&cfg, entity.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Charges { entity, json } => {
            charges::run_charges(&cfg, &entity, json).await?;
        }
        Commands::ImportExternal { path } => {
            matching::run_import_external(&cfg, &path).await?;
        }
        Commands::Match => {
            matching::run_match(&cfg).await?;
        }
    }

    Ok(())
}
