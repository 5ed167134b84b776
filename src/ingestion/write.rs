//! Write functions - persist normalized records to CSV with resume/dedup

use crate::ingestion::parse::value_text;
use crate::ingestion::types::{Granularity, NormalizedRecord, WriteStats};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const NARROW_COLUMNS: [&str; 8] = [
    "tx_id",
    "timestamp_raw",
    "timestamp_iso",
    "token",
    "op_type",
    "from",
    "to",
    "amount",
];

const RAW_PREFIX: &str = "raw_";

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub wide: bool,
    pub resume: bool,
    pub granularity: Granularity,
}

/// Only the dedup key is read back from a prior export
#[derive(Debug, Deserialize)]
struct PriorRow {
    tx_id: Option<String>,
}

#[derive(Debug)]
struct PriorFile {
    header: Vec<String>,
    tx_ids: HashSet<String>,
}

fn read_prior(path: &Path) -> Result<PriorFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if !header.iter().any(|h| h == "tx_id") {
        return Err(anyhow!("no tx_id column in {:?}", path));
    }

    let mut tx_ids = HashSet::new();
    for (idx, row) in reader.deserialize::<PriorRow>().enumerate() {
        let row = row.with_context(|| format!("row {} of {:?}", idx + 1, path))?;
        if let Some(id) = row.tx_id.filter(|id| !id.is_empty()) {
            tx_ids.insert(id);
        }
    }

    Ok(PriorFile { header, tx_ids })
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Load prior ids for resume; an unreadable prior file is moved aside
fn load_prior_for_resume(out: &Path) -> Option<PriorFile> {
    let has_data = fs::metadata(out).map(|m| m.len() > 0).unwrap_or(false);
    if !has_data {
        return None;
    }

    match read_prior(out) {
        Ok(prior) => {
            info!(
                "[resume] {} existing tx_ids in {:?}",
                prior.tx_ids.len(),
                out
            );
            Some(prior)
        }
        Err(e) => {
            let aside = sibling_path(out, ".corrupt");
            warn!(
                "[resume] couldn't read prior CSV {:?} ({:#}); moving it to {:?} and writing in full",
                out, e, aside
            );
            if let Err(e) = fs::rename(out, &aside) {
                warn!("[resume] could not move {:?} aside: {}", out, e);
            }
            None
        }
    }
}

/// Narrow columns, then `raw_<key>` for raw keys in first-seen order
pub fn wide_columns(records: &[NormalizedRecord]) -> Vec<String> {
    let mut columns: Vec<String> = NARROW_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut seen: HashSet<String> = columns.iter().cloned().collect();

    for record in records {
        for key in record.raw.keys() {
            if NARROW_COLUMNS.contains(&key.as_str()) {
                continue;
            }
            let column = format!("{}{}", RAW_PREFIX, key);
            if seen.insert(column.clone()) {
                columns.push(column);
            }
        }
    }
    columns
}

fn cell(record: &NormalizedRecord, column: &str) -> String {
    match column {
        "tx_id" => record.tx_id.clone(),
        "timestamp_raw" => record.timestamp_raw.clone(),
        "timestamp_iso" => record.timestamp_iso(),
        "token" => record.token.clone(),
        "op_type" => record.op_type.clone(),
        "from" => record.sender.clone(),
        "to" => record.recipient.clone(),
        "amount" => record.amount_text(),
        other => other
            .strip_prefix(RAW_PREFIX)
            .and_then(|key| record.raw.get(key))
            .map(value_text)
            .unwrap_or_default(),
    }
}

fn sort_records(records: &mut [NormalizedRecord]) {
    records.sort_by(|a, b| (a.timestamp, &a.tx_id).cmp(&(b.timestamp, &b.tx_id)));
}

/// Drop rows already persisted (and, per record, repeats inside this batch)
fn dedup(
    records: Vec<NormalizedRecord>,
    prior: Option<&PriorFile>,
    granularity: Granularity,
    stats: &mut WriteStats,
) -> Vec<NormalizedRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            if r.tx_id.is_empty() {
                return true;
            }
            if prior.is_some_and(|p| p.tx_ids.contains(&r.tx_id)) {
                stats.skipped_existing += 1;
                return false;
            }
            if granularity == Granularity::Record && !seen.insert(r.tx_id.clone()) {
                stats.skipped_duplicate += 1;
                return false;
            }
            true
        })
        .collect()
}

fn encode_rows(
    records: &[NormalizedRecord],
    columns: &[String],
    header: bool,
) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if header {
        writer.write_record(columns)?;
    }
    for record in records {
        writer.write_record(columns.iter().map(|c| cell(record, c)))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush CSV buffer: {}", e))
}

/// Replace `out` through a temp file in the same directory
fn write_full(out: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = sibling_path(out, ".tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {:?}", tmp))?;
    fs::rename(&tmp, out).with_context(|| format!("failed to move {:?} into place", tmp))?;
    Ok(())
}

/// Append complete rows with a single write
fn write_append(out: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(out)
        .with_context(|| format!("failed to open {:?} for append", out))?;
    file.write_all(bytes)?;
    file.sync_data()?;
    Ok(())
}

fn warn_dropped_columns(records: &[NormalizedRecord], header: &[String]) {
    let dropped: Vec<String> = wide_columns(records)
        .into_iter()
        .filter(|c| !header.contains(c))
        .collect();
    if !dropped.is_empty() {
        warn!(
            "[resume] existing header lacks {} columns, not written: {}",
            dropped.len(),
            dropped.join(", ")
        );
    }
}

/// Sort, dedup and persist `records` at `out`
pub fn write_records(
    records: Vec<NormalizedRecord>,
    out: &Path,
    opts: &WriteOptions,
) -> Result<WriteStats> {
    info!("Writing {} records to {:?}", records.len(), out);

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {:?}", parent))?;
    }

    let prior = if opts.resume {
        load_prior_for_resume(out)
    } else {
        None
    };

    let mut stats = WriteStats {
        appended: prior.is_some(),
        ..WriteStats::default()
    };

    let mut records = dedup(records, prior.as_ref(), opts.granularity, &mut stats);
    sort_records(&mut records);
    stats.written = records.len();

    match prior {
        Some(prior) => {
            if opts.wide {
                warn_dropped_columns(&records, &prior.header);
            }
            if !records.is_empty() {
                let bytes = encode_rows(&records, &prior.header, false)?;
                write_append(out, &bytes)?;
            }
            debug!("[resume] appended {} rows to {:?}", records.len(), out);
        }
        None => {
            let columns = if opts.wide {
                wide_columns(&records)
            } else {
                NARROW_COLUMNS.iter().map(|c| c.to_string()).collect()
            };
            let bytes = encode_rows(&records, &columns, true)?;
            write_full(out, &bytes)?;
        }
    }

    info!("Write complete for {:?}: {}", out, stats);

    Ok(stats)
}
