//! Print trace records.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use qtrace_core::TraceRecord;
use qtrace_encoder::open_trace_file;
use std::path::PathBuf;

#[derive(Args)]
pub struct DumpArgs {
    /// Trace file (zstd-compressed)
    file: PathBuf,

    /// Print one JSON object per record
    #[arg(long, conflicts_with = "raw")]
    json: bool,

    /// Print the packed bytes of each record as hex
    #[arg(long)]
    raw: bool,

    /// Stop after this many records
    #[arg(short, long)]
    limit: Option<usize>,
}

pub fn run(args: DumpArgs) -> Result<()> {
    let reader = open_trace_file(&args.file)
        .with_context(|| format!("Failed to open trace file: {:?}", args.file))?;

    let limit = args.limit.unwrap_or(usize::MAX);
    for (i, record) in reader.take(limit).enumerate() {
        let record = record.with_context(|| format!("Failed to read record {}", i))?;
        if args.json {
            println!("{}", serde_json::to_string(&record)?);
        } else if args.raw {
            println!("{}", hex::encode(record.to_bytes()?));
        } else {
            println!("{:6}: {}", i, format_record(&record));
        }
    }

    Ok(())
}

/// Single-line description of a record.
fn format_record(rec: &TraceRecord) -> String {
    let mut line = format!(
        "{} op={:<5} size={}",
        format!("{:#010x}", rec.instruction_addr).bright_yellow(),
        rec.opcode,
        rec.size
    );

    if rec.is_branch() {
        let outcome = if rec.actually_taken {
            "taken".green()
        } else {
            "not-taken".red()
        };
        line.push_str(&format!(" branch->{:#x} {}", rec.branch_target, outcome));
    }
    if rec.num_load_ops >= 1 {
        line.push_str(&format!(" ld[{:#x}+{}]", rec.load_addr_1, rec.read_size));
    }
    if rec.num_load_ops >= 2 {
        line.push_str(&format!(" ld[{:#x}]", rec.load_addr_2));
    }
    if rec.has_store {
        line.push_str(&format!(" st[{:#x}+{}]", rec.store_addr, rec.write_size));
    } else if let Some(hint) = rec.aux_hint() {
        line.push_str(&format!(" aux={:#x}", hint));
    }

    let mut flags = Vec::new();
    if rec.has_immediate {
        flags.push("imm");
    }
    if rec.is_fp {
        flags.push("fp");
    }
    if rec.writeback {
        flags.push("wb");
    }
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(",")));
    }

    line.push_str(&format!(
        " src={:?} dst={:?}",
        rec.read_regs(),
        rec.write_regs()
    ));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use qtrace_core::ControlFlowType;

    #[derive(Parser)]
    struct DumpCli {
        #[command(flatten)]
        args: DumpArgs,
    }

    #[test]
    fn test_dump_flags() {
        let cli = DumpCli::try_parse_from(["dump", "trace_0-0.log.zst", "--json", "--limit", "3"])
            .unwrap();
        assert!(cli.args.json);
        assert!(!cli.args.raw);
        assert_eq!(cli.args.limit, Some(3));
        assert_eq!(cli.args.file, PathBuf::from("trace_0-0.log.zst"));

        let cli = DumpCli::try_parse_from(["dump", "t.zst", "--raw"]).unwrap();
        assert!(cli.args.raw);

        assert!(DumpCli::try_parse_from(["dump", "t.zst", "--json", "--raw"]).is_err());
    }

    #[test]
    fn test_format_record() {
        colored::control::set_override(false);

        let mut rec = TraceRecord {
            instruction_addr: 0x1000,
            opcode: 7,
            size: 4,
            control_flow_type: ControlFlowType::Branch,
            actually_taken: true,
            branch_target: 0x2000,
            num_load_ops: 2,
            load_addr_1: 0x4000,
            load_addr_2: 0x5000,
            read_size: 8,
            has_immediate: true,
            ..Default::default()
        };
        rec.set_read_regs(&[1, 2]);

        let line = format_record(&rec);
        assert!(line.starts_with("0x00001000 op=7"));
        assert!(line.contains("branch->0x2000 taken"));
        assert!(line.contains("ld[0x4000+8] ld[0x5000]"));
        assert!(line.contains("[imm]"));
        assert!(line.ends_with("src=[1, 2] dst=[]"));
    }
}
