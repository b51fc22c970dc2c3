//! CLI commands module.

use anyhow::Result;
use clap::Subcommand;

mod dump;
mod replay;
mod stats;

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a recorded event log into per-core trace files
    Replay(replay::ReplayArgs),
    /// Print the records of a trace file
    Dump(dump::DumpArgs),
    /// Summarize a trace file
    Stats(stats::StatsArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Replay(args) => replay::run(args),
        Commands::Dump(args) => dump::run(args),
        Commands::Stats(args) => stats::run(args),
    }
}
