//! Replay a recorded event log.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use qtrace_core::TraceEvent;
use qtrace_encoder::{
    AddressSpace, DebugLog, DispatcherConfig, EncoderConfig, FileSinkConfig, FileSinkFactory,
    SizePolicy, TraceDispatcher, TracingLog,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[derive(Args)]
pub struct ReplayArgs {
    /// Event log (JSON lines, one event per line)
    #[arg(short, long)]
    events: PathBuf,

    /// Number of emulated cores
    #[arg(short, long, default_value = "1")]
    cores: usize,

    /// Directory the trace files are written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Trace file name prefix
    #[arg(long, default_value = "trace")]
    prefix: String,

    /// zstd compression level
    #[arg(long, default_value = "3")]
    level: i32,

    /// Drop the last instruction of each run instead of flushing it
    #[arg(long)]
    no_end_flush: bool,

    /// Record virtual instead of physical memory addresses
    #[arg(long = "virtual")]
    virtual_addresses: bool,

    /// Instruction size: a fixed byte count or "measured"
    #[arg(long, default_value = "4", value_parser = parse_size_policy)]
    size: SizePolicy,

    /// Log every fetch, access and commit through tracing
    #[arg(long)]
    debug_log: bool,
}

pub fn run(args: ReplayArgs) -> Result<()> {
    if args.cores == 0 {
        bail!("core count must be at least 1");
    }

    println!("{}", "Replaying event log...".bold().cyan());
    println!();

    let file = File::open(&args.events)
        .with_context(|| format!("Failed to open event log: {:?}", args.events))?;
    let events = parse_events(BufReader::new(file))
        .with_context(|| format!("Failed to parse event log: {:?}", args.events))?;

    let config = DispatcherConfig {
        num_cores: args.cores,
        address_space: if args.virtual_addresses {
            AddressSpace::Virtual
        } else {
            AddressSpace::Physical
        },
        encoder: EncoderConfig {
            size_policy: args.size,
            flush_pending_on_end: !args.no_end_flush,
        },
    };
    let factory = FileSinkFactory::new(FileSinkConfig {
        out_dir: args.out_dir.clone(),
        prefix: args.prefix.clone(),
        compression_level: args.level,
    });

    let mut dispatcher = TraceDispatcher::new(config, factory);
    if args.debug_log {
        dispatcher.set_debug_log(|_| Box::new(TracingLog) as Box<dyn DebugLog>);
    }

    let summary = dispatcher.replay(events).context("Replay failed")?;
    if dispatcher.state() == qtrace_encoder::RunState::Running {
        println!(
            "{}  Event log ended inside a run, closing streams",
            "!".yellow().bold()
        );
        dispatcher
            .on_program_end()
            .context("Failed to close trace streams")?;
    }

    println!("{}  Replayed {} events", "✓".green().bold(), summary.events);
    println!("  Runs:             {}", summary.runs);
    println!("  Fetches traced:   {}", summary.fetches_traced);
    println!("  Fetches skipped:  {}", summary.fetches_skipped);
    println!("  Memory accesses:  {}", summary.memory_accesses);
    println!("  Ignored events:   {}", summary.ignored);
    if summary.failed > 0 {
        println!(
            "  Failed events:    {}",
            summary.failed.to_string().red().bold()
        );
    }

    println!();
    let sink_config = dispatcher.factory().config();
    for run in 0..dispatcher.run_count() {
        for core in 0..dispatcher.num_cores() {
            println!(
                "  {}",
                sink_config
                    .trace_path(run, core)
                    .display()
                    .to_string()
                    .bright_yellow()
            );
        }
    }

    Ok(())
}

/// Parse a JSON-lines event log. Blank lines and lines starting with `#` are
/// skipped.
fn parse_events<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: TraceEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", idx + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn parse_size_policy(s: &str) -> std::result::Result<SizePolicy, String> {
    if s.eq_ignore_ascii_case("measured") {
        return Ok(SizePolicy::Measured);
    }
    s.parse::<u8>()
        .map(SizePolicy::Fixed)
        .map_err(|_| format!("expected a byte count or \"measured\", got {:?}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        let log = "\
# captured from core 0
{\"event\":\"program_start\"}

{\"event\":\"memory_access\",\"core\":0,\"vaddr\":1,\"paddr\":2,\"size\":4,\"is_write\":false}
{\"event\":\"program_end\"}
";
        let events = parse_events(log.as_bytes()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], TraceEvent::ProgramStart);
        assert_eq!(events[1], TraceEvent::read(0, 1, 2, 4));
    }

    #[test]
    fn test_parse_events_reports_line() {
        let log = "{\"event\":\"program_start\"}\n{\"event\":\"bogus\"}\n";
        let err = parse_events(log.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_size_policy() {
        assert_eq!(parse_size_policy("measured"), Ok(SizePolicy::Measured));
        assert_eq!(parse_size_policy("2"), Ok(SizePolicy::Fixed(2)));
        assert!(parse_size_policy("wide").is_err());
    }

    #[test]
    fn test_replay_writes_trace_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let events = dir.path().join("events.jsonl");
        std::fs::write(
            &events,
            "\
{\"event\":\"program_start\"}
{\"event\":\"fetch\",\"core\":1,\"insn\":{\"address\":4096,\"opcode\":1,\"detail\":{}}}
{\"event\":\"fetch\",\"core\":1,\"insn\":{\"address\":4100,\"opcode\":2,\"detail\":{}}}
",
        )
        .unwrap();

        let args = ReplayArgs {
            events,
            cores: 2,
            out_dir: dir.path().join("out"),
            prefix: "trace".to_string(),
            level: 1,
            no_end_flush: false,
            virtual_addresses: false,
            size: SizePolicy::Fixed(4),
            debug_log: false,
        };
        run(args).unwrap();

        let path = dir.path().join("out").join("trace_0-1.log.zst");
        let records: Vec<_> = qtrace_encoder::open_trace_file(path)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].instruction_addr, 4100);
    }
}
