//! CLI entry point for the lotsizer rebalancing engine.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use lotsizer::config::Config;
use lotsizer::error::Error;
use lotsizer::orchestrator::{self, RunOptions};
use lotsizer::snapshot::Snapshot;

#[derive(Parser)]
#[command(name = "lotsizer")]
#[command(about = "Position discretization and greedy rebalancing engine")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one rebalancing cycle from a snapshot file
    Run {
        /// Path to the cycle snapshot JSON
        snapshot: PathBuf,

        /// Show the plan without writing the order list
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,
    },

    /// Validate config and snapshot without optimising
    Validate {
        /// Path to the cycle snapshot JSON
        snapshot: PathBuf,
    },

    /// Show the filtered universe for a snapshot
    Universe {
        /// Path to the cycle snapshot JSON
        snapshot: PathBuf,
    },
}

fn load_snapshot(path: &PathBuf) -> Snapshot {
    match Snapshot::load(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading snapshot: {e}");
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    match cli.command {
        Command::Run {
            snapshot,
            dry_run,
            force,
        } => {
            let snap = load_snapshot(&snapshot);
            let opts = RunOptions {
                dry_run,
                force,
                snapshot_file: snapshot.display().to_string(),
            };
            match orchestrator::run_cycle(&config, &snap, &opts) {
                Ok(outcome) if outcome.fell_back => process::exit(2),
                Ok(_) => {}
                Err(Error::Aborted(msg)) => {
                    eprintln!("{msg}");
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            }
        }
        Command::Validate { snapshot } => {
            let snap = load_snapshot(&snapshot);
            println!(
                "OK: {} instruments for {} on {}",
                snap.instruments.len(),
                snap.strategy,
                snap.date
            );
        }
        Command::Universe { snapshot } => {
            let snap = load_snapshot(&snapshot);
            if let Err(e) = orchestrator::show_universe(&config, &snap) {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
