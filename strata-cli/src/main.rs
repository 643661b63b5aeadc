//! Strata operational CLI

use clap::{Parser, Subcommand};
use strata_core::{PartitionLevel, ProgramId, SeriesKind};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Strata partitioned observation store CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations
    Migrate,

    /// Create program, site and month partitions ahead of ingestion
    Precreate {
        /// Program to provision; every program when omitted
        #[arg(long)]
        program: Option<ProgramId>,
    },

    /// Migrate flat rows into the partitioned store
    Backfill {
        /// Program to migrate; every program when omitted
        #[arg(long)]
        program: Option<ProgramId>,

        /// Rows per batch (overrides STRATA_BACKFILL_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<i64>,

        /// Pause between batches in milliseconds
        #[arg(long)]
        batch_delay_ms: Option<u64>,
    },

    /// Audit partitions and store parity; exits 1 when a check fails
    Audit {
        /// Report empty month partitions older than this many days
        #[arg(long)]
        max_empty_age_days: Option<i64>,

        /// Allowed row-count drift per program and series
        #[arg(long)]
        parity_tolerance: Option<i64>,
    },

    /// Inspect the partition registry
    Partitions {
        #[command(subcommand)]
        action: PartitionsAction,
    },
}

#[derive(Subcommand)]
enum PartitionsAction {
    /// List registry entries
    List {
        #[arg(long)]
        program: Option<ProgramId>,

        /// petri or gasifier
        #[arg(long)]
        series: Option<SeriesKind>,

        /// program, site, month or overflow
        #[arg(long)]
        level: Option<PartitionLevel>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_logging(cli.verbose, cli.log_json);

    let database_url = cli
        .database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not set"))?;

    match cli.command {
        Commands::Migrate => {
            commands::migrate::execute(&database_url).await?;
        }
        Commands::Precreate { program } => {
            commands::precreate::execute(&database_url, program).await?;
        }
        Commands::Backfill {
            program,
            batch_size,
            batch_delay_ms,
        } => {
            let clean =
                commands::backfill::execute(&database_url, program, batch_size, batch_delay_ms)
                    .await?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::Audit {
            max_empty_age_days,
            parity_tolerance,
        } => {
            let passed =
                commands::audit::execute(&database_url, max_empty_age_days, parity_tolerance)
                    .await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Partitions { action } => match action {
            PartitionsAction::List {
                program,
                series,
                level,
            } => {
                commands::partitions::list(&database_url, program, series, level).await?;
            }
        },
    }

    Ok(())
}
