//! Core data types for the tracing pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One untyped record as returned by the indexer
pub type RawRecord = Map<String, Value>;

/// What a pager is crawling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(String),
    Ticker(String),
}

impl Target {
    pub fn as_str(&self) -> &str {
        match self {
            Target::Address(a) => a,
            Target::Ticker(t) => t,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Address(a) => write!(f, "address {}", a),
            Target::Ticker(t) => write!(f, "tick {}", t),
        }
    }
}

/// How the next page is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Opaque cursor returned by the server
    Next(String),
    /// Millisecond watermark for the next `before=` request
    Before(i64),
    Exhausted,
}

/// One API response, already split into records
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub records: Vec<RawRecord>,
    pub continuation: Continuation,
}

/// Record mapped onto the narrow schema
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub tx_id: String,
    pub timestamp_raw: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub token: String,
    pub op_type: String,
    pub sender: String,
    pub recipient: String,
    /// Whole-unit amount, `None` when the source value could not be read
    pub amount: Option<Decimal>,
    pub raw: RawRecord,
}

impl NormalizedRecord {
    /// RFC 3339 form of the parsed timestamp, empty when unparseable
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.map(format_iso).unwrap_or_default()
    }

    pub fn amount_text(&self) -> String {
        self.amount
            .map(|a| a.normalize().to_string())
            .unwrap_or_default()
    }

    pub fn involves(&self, address: &str) -> bool {
        self.sender == address || self.recipient == address
    }
}

pub fn format_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// One sender→recipient share of an L1 transaction
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionRecord {
    pub tx_id: String,
    pub block_time: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub sender: String,
    pub recipient: String,
    /// Amount in KAS
    pub amount: Option<Decimal>,
}

/// Which rows an output file treats as already persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One row per transaction id
    Record,
    /// Several rows share a transaction id and are persisted together
    Transaction,
}

/// How an L1 transaction is expanded into rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionMode {
    /// Outputs split across senders by input weight
    AllParticipants,
    /// Every input × output pair with the full output amount
    Direct,
}

impl std::fmt::Display for AttributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributionMode::AllParticipants => write!(f, "all-participants"),
            AttributionMode::Direct => write!(f, "direct"),
        }
    }
}

/// Which timestamp in a page becomes the next `before=` watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    Oldest,
    Last,
}

/// Write operation statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteStats {
    pub written: usize,
    pub skipped_existing: usize,
    pub skipped_duplicate: usize,
    pub appended: bool,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "written: {} ({}), skipped existing: {}, skipped duplicate: {}",
            self.written,
            if self.appended { "appended" } else { "full write" },
            self.skipped_existing,
            self.skipped_duplicate
        )
    }
}

/// Result of one target's fetch → normalize → write run
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: Target,
    pub pages: usize,
    pub records_fetched: usize,
    pub outputs: Vec<(PathBuf, WriteStats)>,
    pub error: Option<String>,
}

impl TargetReport {
    pub fn new(target: Target) -> Self {
        TargetReport {
            target,
            pages: 0,
            records_fetched: 0,
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub reports: Vec<TargetReport>,
}

impl BatchSummary {
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| !r.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = self.failures().count();
        let rows: usize = self
            .reports
            .iter()
            .flat_map(|r| r.outputs.first())
            .map(|(_, s)| s.written)
            .sum();
        write!(
            f,
            "targets: {}, succeeded: {}, failed: {}, rows written: {}",
            self.reports.len(),
            self.reports.len() - failed,
            failed,
            rows
        )
    }
}
