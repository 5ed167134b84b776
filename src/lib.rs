// Library module for testable functions

pub mod ingestion;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

/// Parse a `--cutoff` value: RFC 3339, `YYYY-MM-DD`, or epoch seconds/milliseconds
pub fn parse_cutoff(value: &str) -> Result<DateTime<Utc>> {
    ingestion::parse::parse_timestamp(&serde_json::Value::String(value.to_string()))
        .map_err(|e| anyhow!("invalid cutoff {:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cutoff_date() {
        let cutoff = parse_cutoff("2022-01-01").unwrap();
        assert_eq!(cutoff.to_rfc3339(), "2022-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_cutoff_rfc3339() {
        let cutoff = parse_cutoff("2022-01-01T12:00:00Z").unwrap();
        assert_eq!(cutoff.timestamp(), 1641038400);
    }

    #[test]
    fn test_parse_cutoff_epoch_millis() {
        let cutoff = parse_cutoff("1641038400000").unwrap();
        assert_eq!(cutoff.timestamp(), 1641038400);
    }

    #[test]
    fn test_parse_cutoff_invalid() {
        assert!(parse_cutoff("last tuesday").is_err());
        assert!(parse_cutoff("").is_err());
    }
}
