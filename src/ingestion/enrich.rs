//! Enrichment functions - expand L1 transactions into sender→recipient rows

use crate::ingestion::parse::{first_present, scale_amount, value_text};
use crate::ingestion::types::{AttributionMode, AttributionRecord, NormalizedRecord, RawRecord};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Kaspa amounts are integers in sompi, 10^-8 KAS
pub const SOMPI_DECIMALS: u32 = 8;
pub const UNKNOWN_ADDRESS: &str = "UNKNOWN";
pub const KAS_TOKEN: &str = "KAS";
pub const TRANSFER_OP: &str = "transfer";

const L1_TX_ID_KEYS: &[&str] = &["transaction_id", "txId"];

/// An address and an amount in sompi
pub type Leg = (String, u64);

/// L1 transaction read tolerantly from a full-transactions page entry
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTransaction {
    pub tx_id: String,
    pub block_time: Option<i64>,
    pub inputs: Vec<Leg>,
    pub outputs: Vec<Leg>,
    /// Scalar transaction fields, kept for wide output
    pub fields: RawRecord,
}

impl LedgerTransaction {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let legs = |key: &str, address_key: &str, amount_key: &str| -> Vec<Leg> {
            match raw.get(key) {
                Some(Value::Array(entries)) => entries
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|e| (leg_address(e, address_key), sompi(e.get(amount_key))))
                    .collect(),
                _ => Vec::new(),
            }
        };

        LedgerTransaction {
            tx_id: first_present(raw, L1_TX_ID_KEYS)
                .map(value_text)
                .unwrap_or_default(),
            block_time: crate::ingestion::fetch::block_time(raw),
            inputs: legs("inputs", "previous_outpoint_address", "previous_outpoint_amount"),
            outputs: legs("outputs", "script_public_key_address", "amount"),
            fields: raw
                .iter()
                .filter(|(k, _)| k.as_str() != "inputs" && k.as_str() != "outputs")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let ms = self.block_time?;
        DateTime::from_timestamp(ms.div_euclid(1000), (ms.rem_euclid(1000) * 1_000_000) as u32)
    }

    fn record(&self, sender: &str, recipient: &str, amount: Option<Decimal>) -> AttributionRecord {
        AttributionRecord {
            tx_id: self.tx_id.clone(),
            block_time: self.block_time,
            timestamp: self.timestamp(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
        }
    }
}

fn leg_address(entry: &RawRecord, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => UNKNOWN_ADDRESS.to_string(),
    }
}

/// Sompi from a number or numeric string; anything else counts as zero
fn sompi(value: Option<&Value>) -> u64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        if let Some(v) = value {
            debug!("Unreadable sompi amount {}, counting as 0", v);
        }
        0
    })
}

fn to_kas(sompi: Decimal) -> Option<Decimal> {
    scale_amount(sompi, SOMPI_DECIMALS).ok()
}

/// Summed input contribution per distinct sender, in first-seen order
pub fn input_weights(tx: &LedgerTransaction) -> Vec<(String, u128)> {
    let mut weights: Vec<(String, u128)> = Vec::new();
    for (sender, amount) in &tx.inputs {
        match weights.iter_mut().find(|(s, _)| s == sender) {
            Some((_, total)) => *total += u128::from(*amount),
            None => weights.push((sender.clone(), u128::from(*amount))),
        }
    }
    weights
}

/// Split every output across the input senders by their share of the total input.
/// Transactions with no input value yield nothing.
pub fn attribute_all_participants(tx: &LedgerTransaction) -> Vec<AttributionRecord> {
    let weights = input_weights(tx);
    let total: u128 = weights.iter().map(|(_, w)| w).sum();
    if total == 0 {
        debug!("Skipping {:?}: no input value", tx.tx_id);
        return Vec::new();
    }
    let total = Decimal::from_u128(total);

    let mut records = Vec::with_capacity(weights.len() * tx.outputs.len());
    for (recipient, output) in &tx.outputs {
        for (sender, contribution) in &weights {
            let share = total
                .zip(Decimal::from_u128(*contribution))
                .and_then(|(total, c)| c.checked_div(total))
                .and_then(|weight| Decimal::from(*output).checked_mul(weight))
                .and_then(to_kas);
            records.push(tx.record(sender, recipient, share));
        }
    }
    records
}

/// Every input × output pair carrying the full output amount
pub fn expand_direct(tx: &LedgerTransaction) -> Vec<AttributionRecord> {
    let mut records = Vec::with_capacity(tx.inputs.len() * tx.outputs.len());
    for (sender, _) in &tx.inputs {
        for (recipient, output) in &tx.outputs {
            records.push(tx.record(sender, recipient, to_kas(Decimal::from(*output))));
        }
    }
    records
}

pub fn expand(tx: &LedgerTransaction, mode: AttributionMode) -> Vec<AttributionRecord> {
    match mode {
        AttributionMode::AllParticipants => attribute_all_participants(tx),
        AttributionMode::Direct => expand_direct(tx),
    }
}

impl AttributionRecord {
    pub fn into_normalized(self, fields: &RawRecord) -> NormalizedRecord {
        NormalizedRecord {
            tx_id: self.tx_id,
            timestamp_raw: self.block_time.map(|t| t.to_string()).unwrap_or_default(),
            timestamp: self.timestamp,
            token: KAS_TOKEN.to_string(),
            op_type: TRANSFER_OP.to_string(),
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            raw: fields.clone(),
        }
    }
}

/// Read raw page entries as transactions, expanding each distinct transaction once
pub fn expand_transactions(raws: &[RawRecord], mode: AttributionMode) -> Vec<NormalizedRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut repeated = 0;
    let mut records = Vec::new();

    for raw in raws {
        let tx = LedgerTransaction::from_raw(raw);
        if !tx.tx_id.is_empty() && !seen.insert(tx.tx_id.clone()) {
            repeated += 1;
            continue;
        }
        records.extend(
            expand(&tx, mode)
                .into_iter()
                .map(|r| r.into_normalized(&tx.fields)),
        );
    }

    info!(
        "Expanded {} transactions into {} {} records ({} repeated)",
        seen.len(),
        records.len(),
        mode,
        repeated
    );
    records
}

/// Rows where `address` is the sender or the recipient
pub fn involving(records: &[NormalizedRecord], address: &str) -> Vec<NormalizedRecord> {
    records
        .iter()
        .filter(|r| r.involves(address))
        .cloned()
        .collect()
}
