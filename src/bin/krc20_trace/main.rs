//! KRC-20 tracer - op history for one wallet or one whole token from a Kasplex API

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use kaspa_flow::ingestion::driver::{log_summary, trace_ops, OpsSettings};
use kaspa_flow::ingestion::fetch::{OpSelector, PagerSettings, RetryPolicy};
use kaspa_flow::ingestion::parse::NormalizeOptions;
use kaspa_flow::ingestion::utils::{init_tracing, ReqwestTransport};
use kaspa_flow::ingestion::BatchSummary;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    /// Ops touching one address
    Wallet,
    /// Every op for one tick
    #[value(alias = "token-wide")]
    Token,
}

#[derive(Parser, Debug)]
#[command(name = "krc20-trace", version, about = "Kasplex KRC-20 tracer (wallet + token-wide)")]
struct Args {
    #[arg(long, value_enum)]
    mode: Mode,
    /// Kaspa address (required in wallet mode)
    #[arg(long, env = "KRC20_ADDRESS")]
    address: Option<String>,
    /// Tick to fetch (token mode) or filter by (wallet mode, `ALL` for none)
    #[arg(long, env = "KRC20_TOKEN")]
    token: Option<String>,
    #[arg(long, env = "KASPLEX_API_BASE", default_value = "https://api.kasplex.org/v1")]
    base_url: String,
    /// Output CSV path
    #[arg(long)]
    out: PathBuf,
    /// Page size (1..1000)
    #[arg(long, default_value_t = 500)]
    limit: usize,
    /// Delay between pages, seconds
    #[arg(long, default_value_t = 0.25)]
    sleep: f64,
    #[arg(long, default_value_t = 6)]
    retries: u32,
    /// Amounts are integers in 10^-decimals token units
    #[arg(long, default_value_t = 8)]
    decimals: u32,
    #[arg(long = "max-pages")]
    max_pages: Option<usize>,
    #[arg(long)]
    verbose: bool,
    /// Also write raw_* columns for every source field
    #[arg(long)]
    wide: bool,
    /// Append to --out, skipping tx_ids it already holds
    #[arg(long)]
    resume: bool,
    /// Keep every raw response next to the output file
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

fn selector(args: &Args) -> Result<OpSelector> {
    match args.mode {
        Mode::Token => match args.token.as_deref().map(str::trim) {
            Some(tick) if !tick.is_empty() => Ok(OpSelector::Tick(tick.to_string())),
            _ => bail!("--token is required in --mode token"),
        },
        Mode::Wallet => match args.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Ok(OpSelector::Address {
                address: address.to_string(),
                tick: args.token.clone(),
            }),
            _ => bail!("--address is required in --mode wallet"),
        },
    }
}

fn settings(args: &Args) -> Result<OpsSettings> {
    let mut pager = PagerSettings::new(&args.base_url)?;
    pager.page_size = args.limit;
    pager.page_delay = Duration::try_from_secs_f64(args.sleep)
        .with_context(|| format!("invalid --sleep {}", args.sleep))?;
    pager.retry = RetryPolicy {
        max_attempts: args.retries,
        ..RetryPolicy::default()
    };
    pager.max_pages = args.max_pages;

    Ok(OpsSettings {
        pager,
        normalize: NormalizeOptions {
            amount_decimals: args.decimals,
        },
        wide: args.wide,
        resume: args.resume,
        save_raw: args.save_raw,
        out: args.out.clone(),
    })
}

async fn run(args: Args) -> Result<ExitCode> {
    let selector = selector(&args)?;
    let settings = settings(&args)?;
    info!("Tracing {} via {}", selector.target(), settings.pager.base_url);

    let transport = ReqwestTransport::new()?;
    let report = trace_ops(&transport, selector, &settings).await;

    let summary = BatchSummary {
        reports: vec![report],
    };
    log_summary(&summary);

    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("krc20-trace").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_token_mode_requires_token() {
        let parsed = args(&["--mode", "token", "--out", "x.csv"]);
        assert!(selector(&parsed).is_err());

        let parsed = args(&["--mode", "token-wide", "--token", "SLOW", "--out", "x.csv"]);
        assert_eq!(selector(&parsed).unwrap(), OpSelector::Tick("SLOW".to_string()));
    }

    #[test]
    fn test_wallet_mode_requires_address() {
        let parsed = args(&["--mode", "wallet", "--out", "x.csv"]);
        assert!(selector(&parsed).is_err());

        let parsed = args(&["--mode", "wallet", "--address", "kaspa:qq", "--token", "SLOW", "--out", "x.csv"]);
        assert_eq!(
            selector(&parsed).unwrap(),
            OpSelector::Address {
                address: "kaspa:qq".to_string(),
                tick: Some("SLOW".to_string())
            }
        );
    }

    #[test]
    fn test_settings_reject_negative_sleep() {
        let parsed = args(&["--mode", "token", "--token", "SLOW", "--out", "x.csv", "--sleep=-1"]);
        assert!(settings(&parsed).is_err());
    }

    #[test]
    fn test_settings_reject_bad_base_url() {
        let parsed = args(&["--mode", "token", "--token", "SLOW", "--out", "x.csv", "--base-url", "api.kasplex.org/v1"]);
        assert!(settings(&parsed).is_err());

        let parsed = args(&["--mode", "token", "--token", "SLOW", "--out", "x.csv", "--base-url", "https://api.kasplex.org/v1/"]);
        assert_eq!(settings(&parsed).unwrap().pager.base_url, "https://api.kasplex.org/v1");
    }
}
