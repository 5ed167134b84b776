//! L1 flow history - full transaction crawl per address with sender→recipient attribution

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use kaspa_flow::ingestion::driver::{run_batch, trace_address, HistorySettings};
use kaspa_flow::ingestion::fetch::{PagerSettings, RetryPolicy};
use kaspa_flow::ingestion::utils::{init_tracing, load_target_file, ReqwestTransport};
use kaspa_flow::ingestion::{AttributionMode, BoundaryPolicy, Target};
use kaspa_flow::parse_cutoff;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Attribution {
    /// Split each output across all senders by input weight
    AllParticipants,
    /// One row per input × output pair
    Direct,
}

impl From<Attribution> for AttributionMode {
    fn from(value: Attribution) -> Self {
        match value {
            Attribution::AllParticipants => AttributionMode::AllParticipants,
            Attribution::Direct => AttributionMode::Direct,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Boundary {
    /// Oldest block time on the page
    Oldest,
    /// Block time of the page's last record
    Last,
}

impl From<Boundary> for BoundaryPolicy {
    fn from(value: Boundary) -> Self {
        match value {
            Boundary::Oldest => BoundaryPolicy::Oldest,
            Boundary::Last => BoundaryPolicy::Last,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "flow-history", version, about = "Kaspa L1 full-history flow crawler")]
struct Args {
    /// Address to crawl (repeatable)
    #[arg(long = "address")]
    addresses: Vec<String>,
    /// File with one address per line, `#` comments allowed
    #[arg(long, env = "FLOW_TARGETS_FILE")]
    targets_file: Option<PathBuf>,
    #[arg(long, env = "KASPA_API_BASE", default_value = "https://api.kaspa.org")]
    base_url: String,
    #[arg(long, default_value = "flow_data_fullhistory")]
    data_dir: PathBuf,
    /// Page size (1..1000)
    #[arg(long, default_value_t = 500)]
    limit: usize,
    /// Delay between pages, seconds
    #[arg(long, default_value_t = 0.0)]
    sleep: f64,
    #[arg(long, default_value_t = 6)]
    retries: u32,
    /// Stop at transactions older than this (epoch s/ms or ISO-8601)
    #[arg(long)]
    cutoff: Option<String>,
    #[arg(long, value_enum, default_value_t = Attribution::AllParticipants)]
    attribution: Attribution,
    #[arg(long, value_enum, default_value_t = Boundary::Oldest)]
    boundary: Boundary,
    #[arg(long = "max-pages")]
    max_pages: Option<usize>,
    #[arg(long)]
    verbose: bool,
    /// Also write raw_* columns for every source field
    #[arg(long)]
    wide: bool,
    /// Append to existing outputs, skipping transactions already written
    #[arg(long)]
    resume: bool,
    /// Keep every raw response next to the outputs
    #[arg(long = "save-raw")]
    save_raw: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    tokio::select! {
        result = run(args) => match result {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted.");
            ExitCode::from(130)
        }
    }
}

/// `--address` values first, then the targets file, first occurrence wins
fn targets(args: &Args) -> Result<Vec<String>> {
    let mut all: Vec<String> = args
        .addresses
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if let Some(path) = &args.targets_file {
        all.extend(load_target_file(path)?);
    }

    let mut seen = std::collections::HashSet::new();
    all.retain(|a| seen.insert(a.clone()));

    if all.is_empty() {
        bail!("no addresses given; use --address or --targets-file");
    }
    Ok(all)
}

fn settings(args: &Args) -> Result<HistorySettings> {
    let mut pager = PagerSettings::new(&args.base_url)?;
    pager.page_size = args.limit;
    pager.page_delay = Duration::try_from_secs_f64(args.sleep)
        .with_context(|| format!("invalid --sleep {}", args.sleep))?;
    pager.retry = RetryPolicy {
        max_attempts: args.retries,
        ..RetryPolicy::default()
    };
    pager.max_pages = args.max_pages;
    let cutoff = args.cutoff.as_deref().map(parse_cutoff).transpose()?;

    Ok(HistorySettings {
        pager,
        data_dir: args.data_dir.clone(),
        mode: args.attribution.into(),
        cutoff,
        boundary: args.boundary.into(),
        wide: args.wide,
        resume: args.resume,
        save_raw: args.save_raw,
    })
}

async fn run(args: Args) -> Result<ExitCode> {
    let addresses = targets(&args)?;
    let settings = settings(&args)?;
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create {:?}", settings.data_dir))?;

    info!(
        "Crawling {} addresses via {} into {:?}",
        addresses.len(),
        settings.pager.base_url,
        settings.data_dir
    );

    let transport = ReqwestTransport::new()?;
    let targets = addresses.into_iter().map(Target::Address).collect();
    let summary = run_batch(targets, |target| {
        trace_address(&transport, target.as_str().to_string(), &settings)
    })
    .await;

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
