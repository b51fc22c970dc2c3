//! Summarize a trace file.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use qtrace_core::TraceRecord;
use qtrace_encoder::open_trace_file;
use std::path::PathBuf;

#[derive(Args)]
pub struct StatsArgs {
    /// Trace file (zstd-compressed)
    file: PathBuf,
}

/// Aggregate counts over a trace.
#[derive(Debug, Default, PartialEq, Eq)]
struct TraceSummary {
    records: u64,
    branches: u64,
    taken: u64,
    loads: u64,
    split_loads: u64,
    stores: u64,
    fp: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl TraceSummary {
    fn add(&mut self, rec: &TraceRecord) {
        self.records += 1;
        if rec.is_branch() {
            self.branches += 1;
            if rec.actually_taken {
                self.taken += 1;
            }
        }
        if rec.num_load_ops > 0 {
            self.loads += 1;
            self.bytes_read += rec.read_size as u64;
        }
        if rec.num_load_ops > 1 {
            self.split_loads += 1;
        }
        if rec.has_store {
            self.stores += 1;
            self.bytes_written += rec.write_size as u64;
        }
        if rec.is_fp {
            self.fp += 1;
        }
    }

    fn percent(part: u64, whole: u64) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 * 100.0 / whole as f64
        }
    }
}

pub fn run(args: StatsArgs) -> Result<()> {
    let reader = open_trace_file(&args.file)
        .with_context(|| format!("Failed to open trace file: {:?}", args.file))?;

    let mut summary = TraceSummary::default();
    for record in reader {
        let record = record.with_context(|| {
            format!("Failed to read record {}", summary.records)
        })?;
        summary.add(&record);
    }

    let s = &summary;
    println!("{}", format!("{}", args.file.display()).bold().cyan());
    println!();
    println!("  Records:        {}", s.records);
    println!(
        "  Branches:       {} ({:.1}% taken)",
        s.branches,
        TraceSummary::percent(s.taken, s.branches)
    );
    println!(
        "  Loads:          {} ({} with two addresses, {} bytes)",
        s.loads, s.split_loads, s.bytes_read
    );
    println!("  Stores:         {} ({} bytes)", s.stores, s.bytes_written);
    println!(
        "  FP:             {} ({:.1}%)",
        s.fp,
        TraceSummary::percent(s.fp, s.records)
    );

    Ok(())
}
