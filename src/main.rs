use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use segmerge::MergeError;
use segmerge::config::MergeConfig;
use segmerge::ledger::BlockState;
use segmerge::pipeline::MergePipeline;

#[derive(Parser)]
#[command(name = "segmerge")]
#[command(about = "Block-wise segmentation merge pipeline", long_about = None)]
struct Cli {
    /// Path to a JSON config file; defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the global ID pool from block overlaps
    Pools {
        /// Rebuild from scratch, resetting applied blocks to pooled
        #[arg(long)]
        restart: bool,
    },
    /// Apply the persisted pool to every pooled block
    Apply,
    /// Show per-block merge progress
    Status,
    /// Discard merge state for one block, or everything
    Clean {
        /// Block index to clean; omit to clean all merge state
        #[arg(long)]
        block: Option<u32>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MergeError> {
    let config = MergeConfig::load_or_default(cli.config.as_deref())?;
    let pipeline = MergePipeline::open(config)?;

    match cli.command {
        Commands::Pools { restart } => {
            let summary = pipeline.build_pools(restart)?;
            println!(
                "Pool built over {} block(s): {} overlap pair(s), {} edge(s), {} merged label(s)",
                summary.blocks, summary.pairs, summary.edges, summary.merged_labels
            );
        }
        Commands::Apply => {
            let summary = pipeline.apply()?;
            println!(
                "Applied {} block(s), {} already applied, {} skipped (not pooled)",
                summary.applied.len(),
                summary.already_applied,
                summary.skipped_pending
            );
            if !summary.is_clean() {
                for (block, error) in &summary.failures {
                    eprintln!("block {}: {}", block, error);
                }
                return Err(MergeError::Other(format!(
                    "{} block(s) failed to apply",
                    summary.failures.len()
                )));
            }
        }
        Commands::Status => {
            let report = pipeline.status()?;
            if report.rows.is_empty() {
                println!("No completed blocks in store.");
                return Ok(());
            }
            if !report.pool_exists {
                println!("No pool built yet.");
            }
            println!("{:>6}  {:>8}  {:>6}  {:>6}", "block", "state", "pool", "output");
            for row in &report.rows {
                println!(
                    "{:>6}  {:>8}  {:>6}  {:>6}",
                    row.index,
                    row.state.to_string(),
                    if row.pooled_covered { "ok" } else { "-" },
                    if row.output_present { "ok" } else { "-" }
                );
            }
            println!(
                "{} pending, {} pooled, {} applied",
                report.count(BlockState::Pending),
                report.count(BlockState::Pooled),
                report.count(BlockState::Applied)
            );
        }
        Commands::Clean { block } => {
            pipeline.clean(block)?;
            match block {
                Some(index) => println!("Cleaned block {}", index),
                None => println!("Cleaned all merge state"),
            }
        }
    }
    Ok(())
}
