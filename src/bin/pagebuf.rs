//! Binary entry point for the `pagebuf` inspection CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pagebuf::{
    cli::{default_config_path, TextBufferConfig},
    BufferOptions, BufferStats, EvictionPolicy, PrefetchStrategy, VirtualBuffer,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pagebuf",
    version,
    about = "Inspect large text files through a paged line buffer",
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
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, value_name = "FILE", help = "Config file (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override lines per page")]
    page_size: Option<usize>,

    #[arg(long, global = true, help = "Override resident page budget")]
    cache_pages: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Eviction policy override")]
    policy: Option<PolicyArg>,

    #[arg(long, global = true, value_enum, help = "Prefetch strategy override")]
    prefetch: Option<StrategyArg>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a range of lines.
    Cat {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, default_value_t = 0, help = "First line to print")]
        from: usize,
        #[arg(long, help = "Number of lines to print (default: to the end)")]
        count: Option<usize>,
    },
    /// Read the whole file once and report cache counters.
    Stats {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Replay a mixed local/random access pattern under each eviction policy.
    Bench {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, default_value_t = 1000, help = "Accesses per run")]
        accesses: usize,
        #[arg(long, default_value_t = 42, help = "Seed for the access pattern")]
        seed: u64,
        #[arg(long, default_value_t = 50, help = "Maximum local jump in lines")]
        window: usize,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PolicyArg {
    Lru,
    Slru,
    Arc,
    Spatial,
}

impl From<PolicyArg> for EvictionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Lru => EvictionPolicy::Lru,
            PolicyArg::Slru => EvictionPolicy::Slru,
            PolicyArg::Arc => EvictionPolicy::Arc,
            PolicyArg::Spatial => EvictionPolicy::Spatial,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    None,
    Adjacent,
    Predictive,
    Adaptive,
}

impl From<StrategyArg> for PrefetchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::None => PrefetchStrategy::None,
            StrategyArg::Adjacent => PrefetchStrategy::Adjacent,
            StrategyArg::Predictive => PrefetchStrategy::Predictive,
            StrategyArg::Adaptive => PrefetchStrategy::Adaptive,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsReport {
    path: PathBuf,
    lines: usize,
    page_size: usize,
    cache_pages: usize,
    policy: &'static str,
    prefetch: &'static str,
    hit_rate: f64,
    elapsed_ms: u128,
    stats: BufferStats,
}

#[derive(Debug, Serialize)]
struct BenchRow {
    policy: &'static str,
    hit_rate: f64,
    evictions: u64,
    elapsed_ms: u128,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("PAGEBUF_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let options = build_options(&cli.open)?;

    match cli.command {
        Command::Cat { path, from, count } => {
            let buffer = VirtualBuffer::open(&path, options)?;
            let end = match count {
                Some(count) => from.saturating_add(count).min(buffer.line_count()),
                None => buffer.line_count(),
            };
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for line in buffer.lines_in(from.min(end)..end)? {
                writeln!(out, "{line}")?;
            }
            out.flush()?;
        }
        Command::Stats { path } => {
            let started = Instant::now();
            let buffer = VirtualBuffer::open(&path, options)?;
            for line in 0..buffer.line_count() {
                buffer.line(line)?;
            }
            let stats = buffer.stats();
            let report = StatsReport {
                path,
                lines: buffer.line_count(),
                page_size: buffer.page_size(),
                cache_pages: buffer.cache_size(),
                policy: buffer.eviction_policy().as_str(),
                prefetch: buffer.prefetch_strategy().as_str(),
                hit_rate: stats.hit_rate(),
                elapsed_ms: started.elapsed().as_millis(),
                stats,
            };
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_stats_text(&report),
            }
        }
        Command::Bench {
            path,
            accesses,
            seed,
            window,
        } => {
            let mut rows = Vec::new();
            for policy in EvictionPolicy::ALL {
                let buffer = VirtualBuffer::open(
                    &path,
                    BufferOptions {
                        eviction_policy: policy,
                        ..options
                    },
                )?;
                let started = Instant::now();
                replay_mixed(&buffer, accesses, seed, window)?;
                let stats = buffer.stats();
                rows.push(BenchRow {
                    policy: policy.as_str(),
                    hit_rate: stats.hit_rate(),
                    evictions: stats.evictions,
                    elapsed_ms: started.elapsed().as_millis(),
                });
            }
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Text => {
                    println!("{:<8} {:>9} {:>10} {:>8}", "policy", "hit rate", "evictions", "ms");
                    for row in &rows {
                        println!(
                            "{:<8} {:>8.2}% {:>10} {:>8}",
                            row.policy,
                            row.hit_rate * 100.0,
                            row.evictions,
                            row.elapsed_ms
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn build_options(args: &OpenArgs) -> Result<BufferOptions, Box<dyn Error>> {
    let config = match args.config.clone().or_else(default_config_path) {
        Some(path) => TextBufferConfig::load(&path)?,
        None => TextBufferConfig::default(),
    };
    let mut options = config.buffer_options()?;
    if let Some(page_size) = args.page_size {
        options.page_size = page_size;
    }
    if let Some(cache_pages) = args.cache_pages {
        options.cache_size = cache_pages;
    }
    if let Some(policy) = args.policy {
        options.eviction_policy = policy.into();
    }
    if let Some(strategy) = args.prefetch {
        options.prefetch_strategy = strategy.into();
    }
    options.validate()?;
    Ok(options)
}

/// Every fifth access jumps to a random line; the rest wander within
/// `window` lines of the previous one.
fn replay_mixed(
    buffer: &VirtualBuffer,
    accesses: usize,
    seed: u64,
    window: usize,
) -> Result<(), Box<dyn Error>> {
    let lines = buffer.line_count();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut current = 0usize;
    let window = window as i64;
    for i in 0..accesses {
        current = if i % 5 == 0 {
            rng.gen_range(0..lines)
        } else {
            let delta = rng.gen_range(-window..=window);
            (current as i64 + delta).clamp(0, lines as i64 - 1) as usize
        };
        buffer.line(current)?;
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    let stats = &report.stats;
    println!("file            {}", report.path.display());
    println!("lines           {}", report.lines);
    println!("page size       {}", report.page_size);
    println!("cache pages     {}", report.cache_pages);
    println!("policy          {}", report.policy);
    println!("prefetch        {}", report.prefetch);
    println!("hits / misses   {} / {}", stats.hits, stats.misses);
    println!("hit rate        {:.2}%", report.hit_rate * 100.0);
    println!("evictions       {}", stats.evictions);
    println!(
        "prefetch        {} used / {} wasted",
        stats.prefetch_hits, stats.prefetch_misses
    );
    println!("load failures   {}", stats.load_failures);
    println!("resident pages  {}", stats.pages_in_memory);
    println!("elapsed         {} ms", report.elapsed_ms);
}
