//! Parse functions - map loosely-typed indexer records onto the narrow schema
//!
//! Field names drift between API versions and endpoints, so every logical field is
//! looked up through an ordered list of candidate keys. A field that cannot be read
//! degrades to its default; a single bad record never fails the pipeline.

use crate::ingestion::error::{AmountError, TimestampError};
use crate::ingestion::types::{NormalizedRecord, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

pub const TX_ID_KEYS: &[&str] = &["txid", "tx_id", "hashRev", "hash", "txHash", "transactionHash"];
pub const TIMESTAMP_KEYS: &[&str] = &["mtsAdd", "timestamp", "ts", "time", "blockTime", "block_ts", "date"];
pub const TOKEN_KEYS: &[&str] = &["tick", "token", "ticker", "symbol", "krc20", "asset", "name"];
pub const OP_TYPE_KEYS: &[&str] = &["op", "opType", "type", "operation"];
pub const SENDER_KEYS: &[&str] = &["from", "sender", "src", "seller", "maker", "owner", "from_address"];
pub const RECIPIENT_KEYS: &[&str] = &["to", "recipient", "dst", "buyer", "taker", "to_address"];
pub const AMOUNT_KEYS: &[&str] = &[
    "amt",
    "amount",
    "qty",
    "quantity",
    "value",
    "delta",
    "amount_token",
    "amountToken",
    "transferAmount",
];
pub const META_AMOUNT_KEYS: &[&str] = &["amount", "qty", "quantity", "value", "delta"];

/// Numeric timestamps at or above this are milliseconds
const MILLIS_THRESHOLD: f64 = 1e12;

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Source amounts are integers in 10^-decimals units
    pub amount_decimals: u32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions { amount_decimals: 8 }
    }
}

/// Not null, not false, not "", not numeric zero
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// First candidate key holding a truthy value
pub fn first_present<'a>(record: &'a RawRecord, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| is_truthy(v))
}

/// Text form of a scalar: strings as-is, everything else as compact JSON
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn first_text(record: &RawRecord, keys: &[&str]) -> String {
    first_present(record, keys).map(value_text).unwrap_or_default()
}

/// Accepts milliseconds, seconds, or ISO-8601 text (numbers may arrive as strings)
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, TimestampError> {
    match value {
        Value::Null => Err(TimestampError::Missing),
        Value::Number(n) => {
            let parsed = match n.as_i64() {
                Some(i) => from_epoch_int(i),
                None => n.as_f64().and_then(from_epoch_float),
            };
            parsed.ok_or_else(|| TimestampError::Unparseable(n.to_string()))
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(TimestampError::Missing);
            }
            let numeric = match s.parse::<i64>() {
                Ok(i) => from_epoch_int(i),
                Err(_) => s.parse::<f64>().ok().and_then(from_epoch_float),
            };
            numeric
                .or_else(|| parse_iso(s))
                .ok_or_else(|| TimestampError::Unparseable(s.to_string()))
        }
        other => Err(TimestampError::Unparseable(other.to_string())),
    }
}

fn from_epoch_int(i: i64) -> Option<DateTime<Utc>> {
    if i as f64 >= MILLIS_THRESHOLD {
        from_epoch_micros(i.checked_mul(1000)?)
    } else {
        DateTime::from_timestamp(i, 0)
    }
}

fn from_epoch_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn from_epoch_float(v: f64) -> Option<DateTime<Utc>> {
    if !v.is_finite() {
        return None;
    }
    let secs = if v >= MILLIS_THRESHOLD { v / 1000.0 } else { v };
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    from_epoch_micros(micros as i64)
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    // No offset: read as UTC
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Exact decimal from a number or numeric string, scientific notation allowed
pub fn parse_amount(value: &Value) -> Result<Decimal, AmountError> {
    let text = match value {
        Value::Null => return Err(AmountError::Missing),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(AmountError::Unparseable(other.to_string())),
    };
    if text.is_empty() {
        return Err(AmountError::Missing);
    }

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| AmountError::Unparseable(text))
}

/// Divide by 10^decimals without going through floating point
pub fn scale_amount(amount: Decimal, decimals: u32) -> Result<Decimal, AmountError> {
    if decimals == 0 {
        return Ok(amount);
    }
    let mut scaled = amount;
    if scaled.set_scale(amount.scale() + decimals).is_ok() {
        return Ok(scaled);
    }
    10u64
        .checked_pow(decimals)
        .and_then(|div| amount.checked_div(Decimal::from(div)))
        .ok_or_else(|| AmountError::OutOfRange(amount.to_string(), decimals))
}

fn normalized_amount(raw: &RawRecord, opts: &NormalizeOptions) -> Result<Decimal, AmountError> {
    let value = first_present(raw, AMOUNT_KEYS).or_else(|| match raw.get("meta") {
        Some(Value::Object(meta)) => first_present(meta, META_AMOUNT_KEYS),
        _ => None,
    });

    let amount = parse_amount(value.unwrap_or(&Value::Null))?;
    scale_amount(amount, opts.amount_decimals)
}

/// Map one raw op onto the narrow schema, keeping the raw record for wide output
pub fn normalize_op(raw: RawRecord, opts: &NormalizeOptions) -> NormalizedRecord {
    let tx_id = first_text(&raw, TX_ID_KEYS);

    let ts_value = first_present(&raw, TIMESTAMP_KEYS).cloned().unwrap_or(Value::Null);
    let timestamp = match parse_timestamp(&ts_value) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!("Record {:?}: {}", tx_id, e);
            None
        }
    };

    let amount = match normalized_amount(&raw, opts) {
        Ok(a) => Some(a),
        Err(e) => {
            debug!("Record {:?}: {}", tx_id, e);
            None
        }
    };

    NormalizedRecord {
        timestamp_raw: value_text(&ts_value),
        timestamp,
        token: first_text(&raw, TOKEN_KEYS),
        op_type: first_text(&raw, OP_TYPE_KEYS),
        sender: first_text(&raw, SENDER_KEYS),
        recipient: first_text(&raw, RECIPIENT_KEYS),
        amount,
        tx_id,
        raw,
    }
}

pub fn normalize_all(raws: Vec<RawRecord>, opts: &NormalizeOptions) -> Vec<NormalizedRecord> {
    let records: Vec<NormalizedRecord> = raws.into_iter().map(|r| normalize_op(r, opts)).collect();

    let no_amount = records.iter().filter(|r| r.amount.is_none()).count();
    let no_time = records.iter().filter(|r| r.timestamp.is_none()).count();
    info!(
        "Normalized {} records ({} without amount, {} without timestamp)",
        records.len(),
        no_amount,
        no_time
    );

    records
}
