//! Binary entry point for the tracedb command-line tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracedb::storage::index::{Attribute, Role};
use tracedb::{
    Condition, DbConfig, DbStats, EventRecord, ExternalPointer, InternalPointer, TraceDb,
    TraceGenerator, WorkloadConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tracedb",
    version,
    about = "Inspect and load tracedb event stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "TRACEDB_CONFIG",
        help = "TOML file with database settings"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the page size (bytes)")]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "Override the reordering window (events)")]
    reorder_capacity: Option<usize>,
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(long, help = "Only events of this thread")]
    thread: Option<u32>,

    #[arg(
        long,
        value_enum,
        requires = "value",
        conflicts_with = "thread",
        help = "Attribute to filter on"
    )]
    attribute: Option<AttributeArg>,

    #[arg(long, help = "Attribute value to match")]
    value: Option<u64>,

    #[arg(long, value_enum, requires = "attribute", help = "Role the value must play")]
    role: Option<RoleArg>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print event, index and page statistics.
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
    /// List events matching a filter.
    Scan {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_name = "TS", help = "Start at this timestamp")]
        from: Option<u64>,
        #[arg(long, default_value_t = 20, help = "Maximum events to print")]
        limit: usize,
        #[arg(long, help = "Walk backwards from the start timestamp")]
        reverse: bool,
    },
    /// Count matching events in a timestamp range.
    Count {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
        #[arg(long, default_value_t = 1, help = "Split the range into this many buckets")]
        slots: usize,
    },
    /// Decode one stored record.
    Dump {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(long, value_parser = parse_pointer, help = "Internal pointer, decimal or 0x-prefixed")]
        pointer: u64,
    },
    /// Load a seeded synthetic trace through the reordering buffer.
    Gen {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(long, default_value_t = 10_000)]
        events: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 4)]
        threads: u32,
        #[arg(long, default_value_t = 32, help = "Largest arrival delay (positions)")]
        max_delay: usize,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AttributeArg {
    Thread,
    Depth,
    Kind,
    Probe,
    Behavior,
    Field,
    Variable,
    Advice,
    AdviceCflow,
    Object,
    ArrayIndex,
}

impl From<AttributeArg> for Attribute {
    fn from(value: AttributeArg) -> Self {
        match value {
            AttributeArg::Thread => Attribute::Thread,
            AttributeArg::Depth => Attribute::Depth,
            AttributeArg::Kind => Attribute::Kind,
            AttributeArg::Probe => Attribute::Probe,
            AttributeArg::Behavior => Attribute::Behavior,
            AttributeArg::Field => Attribute::Field,
            AttributeArg::Variable => Attribute::Variable,
            AttributeArg::Advice => Attribute::Advice,
            AttributeArg::AdviceCflow => Attribute::AdviceCflow,
            AttributeArg::Object => Attribute::Object,
            AttributeArg::ArrayIndex => Attribute::ArrayIndex,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    BehaviorAny,
    AnyEnter,
    Called,
    Executed,
    Exit,
    Operation,
    Target,
    Value,
    Result,
    Exception,
    AnyArg,
    Any,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::BehaviorAny => Role::BEHAVIOR_ANY,
            RoleArg::AnyEnter => Role::ANY_ENTER,
            RoleArg::Called => Role::CALLED,
            RoleArg::Executed => Role::EXECUTED,
            RoleArg::Exit => Role::EXIT,
            RoleArg::Operation => Role::OPERATION,
            RoleArg::Target => Role::TARGET,
            RoleArg::Value => Role::VALUE,
            RoleArg::Result => Role::RESULT,
            RoleArg::Exception => Role::EXCEPTION,
            RoleArg::AnyArg => Role::ANY_ARG,
            RoleArg::Any => Role::ANY,
        }
    }
}

#[derive(Serialize)]
struct ScanRow {
    pointer: String,
    thread: u32,
    timestamp: u64,
    depth: u32,
    kind: String,
}

#[derive(Serialize)]
struct ScanReport {
    condition: String,
    rows: Vec<ScanRow>,
}

#[derive(Serialize)]
struct CountReport {
    condition: String,
    from: u64,
    to: u64,
    total: u64,
    buckets: Vec<u64>,
}

#[derive(Serialize)]
struct DumpReport {
    pointer: String,
    external: ExternalPointer,
    bytes: String,
    record: EventRecord,
}

#[derive(Serialize)]
struct GenReport {
    generated: usize,
    stored: u64,
    dropped: u64,
    last_timestamp: Option<u64>,
    duration_ms: f64,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    let config = build_config(&cli.open)?;

    match cli.command {
        Command::Stats { db_path } => {
            let db = TraceDb::open(&db_path, config)?;
            let report = db.stats();
            emit(&cli.format, &report, |fmt| print_stats_text(fmt, &db_path, &report))?;
        }
        Command::Scan {
            db_path,
            filter,
            from,
            limit,
            reverse,
        } => {
            let db = TraceDb::open(&db_path, config)?;
            let condition = build_condition(&db, &filter)?;
            let report = run_scan(&db, &condition, from, limit, reverse)?;
            emit(&cli.format, &report, |fmt| print_scan_text(fmt, &report))?;
        }
        Command::Count {
            db_path,
            filter,
            from,
            to,
            slots,
        } => {
            let db = TraceDb::open(&db_path, config)?;
            let condition = build_condition(&db, &filter)?;
            let total = db.count(&condition, from, to)?;
            let buckets = if slots > 1 {
                db.fast_counts(&condition, from, to, slots)?
            } else {
                vec![total]
            };
            let report = CountReport {
                condition: describe(&condition),
                from,
                to,
                total,
                buckets,
            };
            emit(&cli.format, &report, |fmt| print_count_text(fmt, &report))?;
        }
        Command::Dump { db_path, pointer } => {
            let db = TraceDb::open(&db_path, config)?;
            let pointer = InternalPointer(pointer);
            let bytes = db.event_log().read_bytes(pointer)?;
            let record = db.resolve(pointer)?;
            let report = DumpReport {
                pointer: pointer.to_string(),
                external: record.external_pointer(),
                bytes: hex::encode(&bytes),
                record,
            };
            emit(&cli.format, &report, |fmt| print_dump_text(fmt, &report))?;
        }
        Command::Gen {
            db_path,
            events,
            seed,
            threads,
            max_delay,
        } => {
            let workload = WorkloadConfig {
                threads,
                max_delay,
                ..WorkloadConfig::default()
            };
            let report = run_gen(&db_path, config, workload, events, seed)?;
            emit(&cli.format, &report, |fmt| print_gen_text(fmt, &report))?;
        }
        Command::Config => {
            let text = config.to_toml_string()?;
            emit(&cli.format, &config, |_| print!("{text}"))?;
        }
    }

    Ok(())
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn build_config(args: &OpenArgs) -> Result<DbConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => DbConfig::load(path)?,
        None => DbConfig::default(),
    };
    if let Some(page_size) = args.page_size {
        config = config.page_size(page_size);
    }
    if let Some(capacity) = args.reorder_capacity {
        config = config.reorder_capacity(capacity);
    }
    config.validate()?;
    Ok(config)
}

fn build_condition(db: &TraceDb, filter: &FilterArgs) -> Result<Condition, Box<dyn Error>> {
    if let Some(thread) = filter.thread {
        return Ok(db.create_condition(Attribute::Thread, u64::from(thread), None)?);
    }
    match (filter.attribute, filter.value) {
        (Some(attribute), Some(value)) => Ok(db.create_condition(attribute.into(), value, filter.role.map(Role::from))?),
        _ => Ok(Condition::All),
    }
}

fn describe(condition: &Condition) -> String {
    condition.cache_key().unwrap_or_else(|| format!("{condition:?}"))
}

fn run_scan(
    db: &TraceDb,
    condition: &Condition,
    from: Option<u64>,
    limit: usize,
    reverse: bool,
) -> Result<ScanReport, Box<dyn Error>> {
    let start = match (from, reverse) {
        (Some(ts), false) => ts,
        (Some(ts), true) => ts.saturating_add(1),
        (None, false) => 0,
        (None, true) => u64::MAX,
    };
    let mut cursor = db.evaluate(condition, start)?;
    let mut rows = Vec::new();
    while rows.len() < limit {
        let next = if reverse {
            cursor.previous_event()?
        } else {
            cursor.next_event()?
        };
        let Some((pointer, record)) = next else {
            break;
        };
        rows.push(ScanRow {
            pointer: pointer.to_string(),
            thread: record.header.thread,
            timestamp: record.header.timestamp,
            depth: record.header.depth,
            kind: format!("{:?}", record.kind()),
        });
    }
    Ok(ScanReport {
        condition: describe(condition),
        rows,
    })
}

fn run_gen(
    path: &Path,
    config: DbConfig,
    workload: WorkloadConfig,
    events: usize,
    seed: u64,
) -> Result<GenReport, Box<dyn Error>> {
    let started = Instant::now();
    let db = TraceDb::open_or_create(path, config)?;
    let mut generator = TraceGenerator::new(seed, workload);
    let records = generator.generate(events);
    for record in generator.arrival_order(records) {
        db.push(record)?;
    }
    db.drain()?;
    let stats = db.stats();
    let last_timestamp = db.last_timestamp();
    db.close()?;
    Ok(GenReport {
        generated: events,
        stored: stats.events,
        dropped: stats.dropped,
        last_timestamp,
        duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
    })
}

fn parse_pointer(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => raw.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid pointer '{raw}': {err}"))
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_stats_text(_: OutputFormat, path: &Path, report: &DbStats) {
    println!("Database: {}", path.display());
    println!(
        "Events: count={} threads={} behaviors={} fields={} registrations={}",
        report.events, report.threads, report.behaviors, report.fields, report.registrations
    );
    println!(
        "Storage: pages={} bytes={} log_pages={} log_bytes={} avg_record_bytes={:.1}",
        report.pages,
        report.storage_bytes,
        report.event_log.pages,
        report.event_log.bytes,
        report.event_log.average_size
    );
    println!(
        "Pager: hits={} misses={} evictions={} writebacks={} allocations={}",
        report.pager.hits,
        report.pager.misses,
        report.pager.evictions,
        report.pager.writebacks,
        report.pager.allocations
    );
    println!(
        "Index: appends={} inserts={} leaf_loads={} searches={} sealed={} splits={}",
        report.btree.appends,
        report.btree.inserts,
        report.btree.leaf_loads,
        report.btree.internal_searches,
        report.btree.pages_sealed,
        report.btree.leaf_splits + report.btree.internal_splits
    );
    println!("Reorder: pending={} dropped={}", report.pending, report.dropped);
}

fn print_scan_text(_: OutputFormat, report: &ScanReport) {
    for row in &report.rows {
        println!(
            "{:>14} {:>6}@{:<12} depth={:<4} {}",
            row.pointer, row.thread, row.timestamp, row.depth, row.kind
        );
    }
    println!("({} events, {})", report.rows.len(), report.condition);
}

fn print_count_text(_: OutputFormat, report: &CountReport) {
    println!(
        "{} events in [{}, {}] ({})",
        report.total, report.from, report.to, report.condition
    );
    if report.buckets.len() > 1 {
        for (i, count) in report.buckets.iter().enumerate() {
            println!("  bucket {i:>3}: {count}");
        }
    }
}

fn print_dump_text(_: OutputFormat, report: &DumpReport) {
    println!("Pointer: {} ({})", report.pointer, report.external);
    println!("Kind: {:?}", report.record.kind());
    println!("Bytes ({}):", report.bytes.len() / 2);
    for chunk in report.bytes.as_bytes().chunks(32) {
        println!("  {}", String::from_utf8_lossy(chunk));
    }
    println!("{:#?}", report.record);
}

fn print_gen_text(_: OutputFormat, report: &GenReport) {
    println!(
        "Generated {} events in {:.2} ms: stored={} dropped={} last_timestamp={}",
        report.generated,
        report.duration_ms,
        report.stored,
        report.dropped,
        report
            .last_timestamp
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "-".into())
    );
}
