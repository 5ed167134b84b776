//! Driver - fetch → normalize → write per target, batch over targets

use crate::ingestion::enrich::{expand_transactions, involving};
use crate::ingestion::fetch::{collect_pages, CursorPager, OpSelector, PagerSettings, WatermarkPager};
use crate::ingestion::parse::{normalize_all, NormalizeOptions};
use crate::ingestion::types::{
    AttributionMode, BatchSummary, BoundaryPolicy, Granularity, Target, TargetReport,
};
use crate::ingestion::utils::{sanitize_for_fname, RawPageStore, Transport};
use crate::ingestion::write::{write_records, WriteOptions};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// KRC-20 op list run against one output file
#[derive(Debug, Clone)]
pub struct OpsSettings {
    pub pager: PagerSettings,
    pub normalize: NormalizeOptions,
    pub wide: bool,
    pub resume: bool,
    pub save_raw: bool,
    pub out: PathBuf,
}

/// L1 history crawl writing two files per address into `data_dir`
#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub pager: PagerSettings,
    pub data_dir: PathBuf,
    pub mode: AttributionMode,
    pub cutoff: Option<DateTime<Utc>>,
    pub boundary: BoundaryPolicy,
    pub wide: bool,
    pub resume: bool,
    pub save_raw: bool,
}

/// `(<addr>_all_participants.csv, <addr>_involving.csv)`
pub fn history_paths(data_dir: &Path, address: &str) -> (PathBuf, PathBuf) {
    let stem = sanitize_for_fname(address);
    (
        data_dir.join(format!("{}_all_participants.csv", stem)),
        data_dir.join(format!("{}_involving.csv", stem)),
    )
}

fn pager_for(base: &PagerSettings, save_raw: bool, out: &Path) -> PagerSettings {
    let mut pager = base.clone();
    if save_raw {
        pager.raw_pages = Some(RawPageStore::beside(out));
    }
    pager
}

/// Fetch every op for `selector`, then write what was gathered even if the fetch broke off.
/// A fetch that fails before yielding anything leaves the output untouched.
pub async fn trace_ops<T: Transport>(
    transport: &T,
    selector: OpSelector,
    settings: &OpsSettings,
) -> TargetReport {
    let mut report = TargetReport::new(selector.target());
    let pager_settings = pager_for(&settings.pager, settings.save_raw, &settings.out);

    info!("Fetching KRC-20 ops for {}", report.target);
    let mut pager = CursorPager::new(transport, &pager_settings, selector);
    let outcome = collect_pages(&mut pager).await;
    report.pages = outcome.pages;
    report.records_fetched = outcome.records.len();

    if let Some(e) = &outcome.error {
        error!(
            "Fetch for {} stopped after {} pages: {}",
            report.target, outcome.pages, e
        );
        report.error = Some(e.to_string());
        if outcome.records.is_empty() {
            warn!("Nothing fetched for {}; leaving {:?} as it is", report.target, settings.out);
            return report;
        }
    }

    let records = normalize_all(outcome.records, &settings.normalize);
    let opts = WriteOptions {
        wide: settings.wide,
        resume: settings.resume,
        granularity: Granularity::Record,
    };

    match write_records(records, &settings.out, &opts) {
        Ok(stats) => report.outputs.push((settings.out.clone(), stats)),
        Err(e) => {
            error!("Write to {:?} failed: {:#}", settings.out, e);
            report.error.get_or_insert_with(|| format!("write failed: {:#}", e));
        }
    }

    report
}

/// Crawl one address's L1 history, expand it into flow rows and write both outputs
pub async fn trace_address<T: Transport>(
    transport: &T,
    address: String,
    settings: &HistorySettings,
) -> TargetReport {
    let mut report = TargetReport::new(Target::Address(address.clone()));
    let (full_path, involving_path) = history_paths(&settings.data_dir, &address);
    let pager_settings = pager_for(&settings.pager, settings.save_raw, &full_path);

    info!(
        "Fetching full transaction set for {} ({} mode)",
        address, settings.mode
    );
    let mut pager = WatermarkPager::new(transport, &pager_settings, &address)
        .with_cutoff(settings.cutoff)
        .with_boundary(settings.boundary);
    let outcome = collect_pages(&mut pager).await;
    report.pages = outcome.pages;
    report.records_fetched = outcome.records.len();

    if let Some(e) = &outcome.error {
        error!(
            "Fetch for {} stopped after {} pages: {}",
            address, outcome.pages, e
        );
        report.error = Some(e.to_string());
        if outcome.records.is_empty() {
            warn!(
                "Nothing fetched for {}; leaving {:?} and {:?} as they are",
                address, full_path, involving_path
            );
            return report;
        }
    }

    let records = expand_transactions(&outcome.records, settings.mode);
    let mine = involving(&records, &address);
    info!(
        "{} sender→recipient records, {} involving {}",
        records.len(),
        mine.len(),
        address
    );

    let opts = WriteOptions {
        wide: settings.wide,
        resume: settings.resume,
        granularity: Granularity::Transaction,
    };

    for (path, rows) in [(full_path, records), (involving_path, mine)] {
        match write_records(rows, &path, &opts) {
            Ok(stats) => report.outputs.push((path, stats)),
            Err(e) => {
                error!("Write to {:?} failed: {:#}", path, e);
                report.error.get_or_insert_with(|| format!("write failed: {:#}", e));
            }
        }
    }

    report
}

/// Run `job` for each target in order. A failed target never stops the batch.
pub async fn run_batch<F, Fut>(targets: Vec<Target>, mut job: F) -> BatchSummary
where
    F: FnMut(Target) -> Fut,
    Fut: Future<Output = TargetReport>,
{
    let total = targets.len();
    let mut summary = BatchSummary::default();

    for (idx, target) in targets.into_iter().enumerate() {
        info!("[{}/{}] Tracing {}", idx + 1, total, target);
        let report = job(target).await;

        match &report.error {
            None => {
                let written = report.outputs.first().map(|(_, s)| s.written).unwrap_or(0);
                info!(
                    "✓ {}: {} pages, {} records fetched, {} rows written",
                    report.target, report.pages, report.records_fetched, written
                );
            }
            Some(e) => warn!("✗ {} failed: {}", report.target, e),
        }
        summary.reports.push(report);
    }

    log_summary(&summary);
    summary
}

pub fn log_summary(summary: &BatchSummary) {
    info!("Batch complete: {}", summary);
    for report in summary.failures() {
        error!(
            "Failed target {}: {}",
            report.target,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
}
