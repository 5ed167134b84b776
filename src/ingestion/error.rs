//! Error types for the fetch and parse stages

use thiserror::Error;

/// Terminal failure of a page request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url} (not retryable)")]
    Status { status: u16, url: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("invalid base URL {0:?}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("no amount present")]
    Missing,
    #[error("unparseable amount {0:?}")]
    Unparseable(String),
    #[error("amount {0} cannot be scaled by 10^{1}")]
    OutOfRange(String, u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("no timestamp present")]
    Missing,
    #[error("unparseable timestamp {0:?}")]
    Unparseable(String),
}
