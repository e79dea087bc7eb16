//! # disclosure-nlq CLI (`nlq`)
//!
//! Resolves Hebrew/English questions about corporate disclosures into
//! structured filters and runs them against the announcement store.
//!
//! ## Usage
//!
//! ```bash
//! nlq --config ./config/nlq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlq init` | Create the SQLite database and its indexes |
//! | `nlq load <file>` | Upsert announcement items from a JSON file |
//! | `nlq filters "<query>"` | Print the compiled filters and diagnostics |
//! | `nlq run "<query>"` | Compile, plan, and execute a query |
//! | `nlq suggest <prefix>` | Print alias completions |
//! | `nlq serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! nlq init
//! nlq load ./data/announcements.json
//! nlq filters "דוחות רבעוניים של טבע מ-2025"
//! nlq run "last 3 reports of Teva" --max-items 3
//! nlq run "דוח שנתי לאומי" --dry-run
//! nlq suggest טב
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chrono::NaiveDate;
use disclosure_nlq::pipeline::{CompileRequest, RunMode, RunOptions};
use disclosure_nlq::{commands, config, load, logging, migrate, server};

/// Natural-language query resolver for corporate disclosures.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "nlq",
    about = "disclosure-nlq: resolve natural-language disclosure queries into store filters",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nlq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Upsert announcement items from a JSON file.
    ///
    /// Accepts a JSON array, an object with an `items` array, a single
    /// object, or JSON lines.
    Load {
        file: PathBuf,
    },

    /// Compile a query into filters and diagnostics without touching the store.
    Filters {
        query: String,

        /// Reference date (YYYY-MM-DD) for relative expressions.
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Do not expand aliases by prefix.
        #[arg(long)]
        no_expand: bool,

        /// Keep relative windows ("last 3 months") relative.
        #[arg(long)]
        relative: bool,
    },

    /// Compile, plan, and execute a query.
    Run {
        query: String,

        /// Upper bound on returned records.
        #[arg(long)]
        max_items: Option<usize>,

        /// Oldest first.
        #[arg(long)]
        ascending: bool,

        /// Print the plan without executing it.
        #[arg(long)]
        dry_run: bool,

        /// Store location override (`sqlite:` URL or file path).
        #[arg(long)]
        endpoint: Option<String>,

        /// Region label for logs and the plan description.
        #[arg(long)]
        region: Option<String>,

        /// Reference date (YYYY-MM-DD) for relative expressions.
        #[arg(long)]
        today: Option<NaiveDate>,

        /// Fail instead of serving the static dataset when the store is down.
        #[arg(long)]
        no_fallback: bool,
    },

    /// Print alias completions for a prefix.
    Suggest {
        prefix: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server.
    Serve {
        /// Bind address override (defaults to `[server].bind`).
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let cfg = config::load_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { file } => {
            load::run_load(&cfg, &file).await?;
        }
        Commands::Filters {
            query,
            today,
            no_expand,
            relative,
        } => {
            let request = CompileRequest {
                auto_expand_aliases: !no_expand && cfg.aliases.auto_expand,
                force_absolute_timeframe: !relative,
                today,
            };
            commands::run_filters(&cfg, &query, &request).await?;
        }
        Commands::Run {
            query,
            max_items,
            ascending,
            dry_run,
            endpoint,
            region,
            today,
            no_fallback,
        } => {
            let options = RunOptions {
                max_items,
                mode: if dry_run { RunMode::DryRun } else { RunMode::Live },
                region,
                endpoint,
                ascending,
                compile: CompileRequest {
                    auto_expand_aliases: cfg.aliases.auto_expand,
                    force_absolute_timeframe: true,
                    today,
                },
            };
            commands::run_query(&cfg, &query, &options, !no_fallback).await?;
        }
        Commands::Suggest { prefix, limit } => {
            commands::run_suggest(&cfg, &prefix, limit)?;
        }
        Commands::Serve { bind } => {
            server::run_server(&cfg, bind.as_deref()).await?;
        }
    }

    Ok(())
}
