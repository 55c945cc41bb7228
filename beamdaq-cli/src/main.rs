//! beamdaq CLI application.
//!
//! Inspects beam telescope record files and converts EUDRB data to CSV.

use anyhow::{Context, Result};
use beamdaq_core::output::{HitCsvWriter, PlaneCsvWriter};
use beamdaq_core::{
    BoardTable, Columns, ConverterRegistry, ReadOutcome, Record, RecordReader, RunConfig,
    UNKNOWN_TRIGGER_ID,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Beam telescope record file tool.
///
/// Reads files of tagged records written by the data acquisition and decodes
/// EUDRB sensor data into pixel hits.
#[derive(Parser, Debug)]
#[command(name = "beamdaq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress output and informational logs
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the run number, board configuration and record statistics
    Info(InfoArgs),
    /// Print one line per record
    Dump(DumpArgs),
    /// Decode EUDRB records and write the hits to CSV
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Input record file
    #[arg(value_name = "INPUT")]
    input: PathBuf,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Input record file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Number of records to skip before the first one printed
    #[arg(short, long, default_value_t = 0)]
    skip: usize,

    /// Stop after this many records
    #[arg(short = 'n', long)]
    limit: Option<u64>,

    /// Keep waiting for records appended to the file (Ctrl-C to stop)
    #[arg(short, long)]
    follow: bool,

    /// Also print the tags of every record
    #[arg(short, long)]
    tags: bool,

    /// Run configuration (TOML) providing the follow poll interval
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input record file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output hit CSV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Run configuration (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Columns of the hit CSV.
    ///
    /// Comma-separated selection of event, plane, x, y, value, pivot, frame.
    #[arg(long, default_value = "event,plane,x,y,value,pivot,frame")]
    columns: String,

    /// Output file for per-plane summaries (optional)
    #[arg(short, long, value_name = "PATH")]
    planes: Option<PathBuf>,

    /// Skip records that fail to decode instead of aborting
    #[arg(long)]
    keep_going: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Command::Info(args) => run_info(args),
        Command::Dump(args) => run_dump(args),
        Command::Convert(args) => run_convert(args, cli.quiet),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}

/// Initialize logging based on CLI options
fn init_logging(cli: &Cli) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else {
        let default_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path)),
        None => Ok(RunConfig::default()),
    }
}

fn open_reader(path: &Path) -> Result<RecordReader<BufReader<File>>> {
    RecordReader::open(path).with_context(|| format!("Failed to open record file {:?}", path))
}

fn spinner(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    Ok(pb)
}

fn flag_string(record: &Record) -> &'static str {
    match (record.is_bore(), record.is_eore()) {
        (true, _) => "BORE",
        (_, true) => "EORE",
        _ => "",
    }
}

fn run_info(args: &InfoArgs) -> Result<()> {
    let mut reader = open_reader(&args.input)?;
    let registry = ConverterRegistry::with_builtin();

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut boards: Option<BoardTable> = None;
    let mut bore_tags = None;
    let mut triggers: Option<(u32, u32)> = None;
    let mut last_event = None;

    while let ReadOutcome::Record(record) = reader
        .next_record(0)
        .context("Failed to read record")?
    {
        let label = match record.subtype() {
            "" => record.record_type().to_string(),
            subtype => format!("{}:{}", record.record_type(), subtype),
        };
        *counts.entry(label).or_default() += 1;

        if record.is_bore() && bore_tags.is_none() {
            bore_tags = Some(record.tags().clone());
            let bore = match &record {
                Record::Detector(detector) => detector
                    .records
                    .iter()
                    .find(|sub| registry.find(sub).is_some())
                    .cloned(),
                _ => registry.find(&record).map(|_| record.clone()),
            };
            if let Some(bore) = bore {
                boards = Some(BoardTable::resolve(&bore).context("Invalid board configuration")?);
            }
        } else if !record.is_eore() {
            let trigger = registry.trigger_id(&record);
            if trigger != UNKNOWN_TRIGGER_ID {
                triggers = Some(match triggers {
                    Some((lo, hi)) => (lo.min(trigger), hi.max(trigger)),
                    None => (trigger, trigger),
                });
            }
            last_event = Some(record.event_number());
        }
    }

    println!("File:         {:?}", args.input);
    match reader.run_number() {
        Some(run) => println!("Run:          {}", run),
        None => println!("Run:          (empty file)"),
    }
    println!("Records:      {}", reader.records_read());
    for (label, count) in &counts {
        println!("  {:<12}{}", label, count);
    }
    if let Some(event) = last_event {
        println!("Last event:   {}", event);
    }
    if let Some((lo, hi)) = triggers {
        println!("Trigger ids:  {}..={}", lo, hi);
    }

    if let Some(tags) = bore_tags {
        println!("BORE tags:");
        for (key, value) in tags.iter() {
            println!("  {} = {}", key, value);
        }
    }
    if let Some(table) = boards {
        println!("Boards:");
        for (id, board) in table.iter() {
            println!(
                "  id {:<3} {:<10} {:<5} v{}{}",
                id,
                board.sensor().name,
                board.mode,
                board.version,
                if board.version_guessed { " (guessed)" } else { "" }
            );
        }
    }

    Ok(())
}

fn run_dump(args: &DumpArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut reader = open_reader(&args.input)?;
    if args.follow {
        reader = reader.follow(config.poll_interval());
    }

    let interrupter = reader.interrupter();
    if let Err(e) = ctrlc::set_handler(move || interrupter.interrupt()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let registry = ConverterRegistry::with_builtin();
    let mut skip = args.skip;
    let mut printed = 0u64;

    loop {
        if args.limit.is_some_and(|limit| printed >= limit) {
            break;
        }
        let record = match reader.next_record(skip).context("Failed to read record")? {
            ReadOutcome::Record(record) => record,
            ReadOutcome::EndOfStream => break,
            ReadOutcome::Interrupted => {
                info!("Interrupted");
                break;
            }
        };
        skip = 0;

        let trigger = registry.trigger_id(&record);
        println!(
            "{:<5} {:<6} run {:>6} event {:>8} {:<4} blocks {:>2} trigger {}",
            record.record_type(),
            record.subtype(),
            record.run_number(),
            record.event_number(),
            flag_string(&record),
            record.block_source().map_or(0, |s| s.block_count()),
            if trigger == UNKNOWN_TRIGGER_ID {
                "-".to_string()
            } else {
                trigger.to_string()
            }
        );
        if args.tags {
            for (key, value) in record.tags().iter() {
                println!("      {} = {}", key, value);
            }
        }
        printed += 1;
    }

    debug!(printed, "dump finished");
    Ok(())
}

fn run_convert(args: &ConvertArgs, quiet: bool) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    debug!(config = %config.to_toml(), "run configuration");

    let columns = Columns::from_str(&args.columns)
        .context("Invalid column list. Use comma-separated: event,plane,x,y,value,pivot,frame")?;

    let mut reader = open_reader(&args.input)?;
    let interrupter = reader.interrupter();
    if let Err(e) = ctrlc::set_handler(move || interrupter.interrupt()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create {:?}", args.output))?;
    let mut hits = HitCsvWriter::new(output, columns);
    hits.write_header().context("Failed to write CSV header")?;

    let mut planes = match &args.planes {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            let mut writer = PlaneCsvWriter::new(file);
            writer.write_header().context("Failed to write plane CSV header")?;
            Some(writer)
        }
        None => None,
    };

    let progress = spinner(quiet)?;
    progress.set_message(format!(
        "Converting {:?}...",
        args.input.file_name().unwrap_or_default()
    ));

    let start_time = Instant::now();
    let mut registry = ConverterRegistry::with_builtin();
    let mut events = 0u64;
    let mut failed = 0u64;

    loop {
        let record = match reader.next_record(0).context("Failed to read record")? {
            ReadOutcome::Record(record) => record,
            ReadOutcome::EndOfStream => break,
            ReadOutcome::Interrupted => {
                warn!("Interrupted, output is incomplete");
                break;
            }
        };

        if record.is_bore() {
            registry
                .initialize(&record, &config)
                .with_context(|| format!("Failed to initialize run {}", record.run_number()))?;
            continue;
        }

        let event = match registry.convert(&record) {
            Ok(event) => event,
            Err(e) if args.keep_going => {
                warn!(event = record.event_number(), error = %e, "Skipping record");
                failed += 1;
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to convert event {}", record.event_number())
                })
            }
        };
        if event.is_empty() {
            continue;
        }

        hits.write_event(&event).context("Failed to write hits")?;
        if let Some(writer) = planes.as_mut() {
            writer.write_event(&event).context("Failed to write plane summary")?;
        }
        events += 1;
        if events % 1000 == 0 {
            progress.set_message(format!("Converted {} events, {} hits", events, hits.hits_written()));
        }
        progress.tick();
    }

    hits.flush().context("Failed to flush hit CSV")?;
    if let Some(writer) = planes.as_mut() {
        writer.flush().context("Failed to flush plane CSV")?;
    }

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Converted {} events in {:.2}s",
        events,
        total_duration.as_secs_f64()
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        if let Some(run) = reader.run_number() {
            eprintln!("  Run:          {}", run);
        }
        eprintln!("  Records:      {}", reader.records_read());
        eprintln!("  Events:       {}", events);
        eprintln!("  Hits:         {}", hits.hits_written());
        if failed > 0 {
            eprintln!("  Failed:       {}", failed);
        }
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}
