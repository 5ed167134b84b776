//! Fetch functions - page through the indexer APIs with bounded retries

use crate::ingestion::error::FetchError;
use crate::ingestion::types::{BoundaryPolicy, Continuation, Page, RawRecord, Target};
use crate::ingestion::utils::{RawPageStore, Transport};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[derive(Debug, Clone)]
pub struct PagerSettings {
    pub base_url: String,
    pub page_size: usize,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    pub max_pages: Option<usize>,
    pub raw_pages: Option<RawPageStore>,
}

impl PagerSettings {
    /// Rejects a base URL that is not `http(s)://`
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let settings = PagerSettings {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            page_size: 500,
            page_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
            max_pages: None,
            raw_pages: None,
        };
        settings.check_base_url()?;
        Ok(settings)
    }

    fn check_base_url(&self) -> Result<(), FetchError> {
        let host = self
            .base_url
            .strip_prefix("https://")
            .or_else(|| self.base_url.strip_prefix("http://"));
        match host {
            Some(rest) if !rest.is_empty() => Ok(()),
            _ => Err(FetchError::InvalidBaseUrl(self.base_url.clone())),
        }
    }

    fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    fn endpoint(&self, path: &str) -> Result<String, FetchError> {
        self.check_base_url()?;
        Ok(format!("{}{}", self.base_url, path))
    }
}

fn is_json_content(content_type: Option<&str>) -> bool {
    // An absent header is given the benefit of the doubt; the body still has to parse
    content_type.map_or(true, |ct| ct.to_ascii_lowercase().contains("json"))
}

/// GET one page as JSON, retrying transient failures with exponential backoff
pub async fn get_json<T: Transport>(
    transport: &T,
    url: &str,
    query: &[(String, String)],
    policy: &RetryPolicy,
    page: usize,
    raw_pages: Option<&RawPageStore>,
) -> Result<Value, FetchError> {
    let attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match transport.get(url, query).await {
            Err(e) => last = format!("request failed: {}", e),
            Ok(reply) if reply.status >= 400 => {
                if let Some(store) = raw_pages {
                    store.save(&format!("error_{}_page{:05}.raw", reply.status, page), &reply.body);
                }
                if !is_retryable_status(reply.status) {
                    return Err(FetchError::Status {
                        status: reply.status,
                        url: url.to_string(),
                    });
                }
                last = format!("HTTP {}", reply.status);
            }
            Ok(reply) if !is_json_content(reply.content_type.as_deref()) => {
                if let Some(store) = raw_pages {
                    store.save(&format!("nonjson_page{:05}.raw", page), &reply.body);
                }
                last = format!(
                    "non-JSON response (Content-Type={})",
                    reply.content_type.unwrap_or_default()
                );
            }
            Ok(reply) => match serde_json::from_slice::<Value>(&reply.body) {
                Ok(value) => {
                    if let Some(store) = raw_pages {
                        store.save(&format!("okjson_page{:05}.json", page), &reply.body);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if let Some(store) = raw_pages {
                        store.save(&format!("badjson_page{:05}.raw", page), &reply.body);
                    }
                    last = format!("JSON parse failed: {}", e);
                }
            },
        }

        if attempt < attempts {
            let delay = policy.delay_for(attempt);
            debug!(
                "[retry {}/{}] {}, sleeping {:.2}s",
                attempt,
                attempts,
                last,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(FetchError::RetriesExhausted {
        url: url.to_string(),
        attempts,
        last,
    })
}

/// Lazy page source. `Ok(None)` means the stream is exhausted.
#[allow(async_fn_in_trait)]
pub trait Paginator {
    async fn next_page(&mut self) -> Result<Option<Page>, FetchError>;
}

/// Everything a pager produced, including the records gathered before a terminal error
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    pub pages: usize,
    pub error: Option<FetchError>,
}

pub async fn collect_pages<P: Paginator>(pager: &mut P) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    loop {
        match pager.next_page().await {
            Ok(Some(page)) => {
                outcome.pages += 1;
                debug!(
                    "[page {}] kept={} total={} next={:?}",
                    page.index,
                    page.records.len(),
                    outcome.records.len() + page.records.len(),
                    page.continuation
                );
                outcome.records.extend(page.records);
            }
            Ok(None) => break,
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        }
    }
    outcome
}

fn object_records(items: Vec<Value>) -> Vec<RawRecord> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            other => {
                warn!("Skipping non-object entry: {}", other);
                None
            }
        })
        .collect()
}

/// What a KRC-20 op list is filtered by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpSelector {
    /// Ops touching an address, optionally for one tick (`ALL` means no filter)
    Address { address: String, tick: Option<String> },
    /// Every op for a tick
    Tick(String),
}

impl OpSelector {
    pub fn target(&self) -> Target {
        match self {
            OpSelector::Address { address, .. } => Target::Address(address.clone()),
            OpSelector::Tick(tick) => Target::Ticker(tick.clone()),
        }
    }

    fn query(&self) -> Vec<(String, String)> {
        match self {
            OpSelector::Address { address, tick } => {
                let mut query = vec![("address".to_string(), address.clone())];
                if let Some(tick) = tick.as_ref().filter(|t| !t.eq_ignore_ascii_case("ALL")) {
                    query.push(("tick".to_string(), tick.clone()));
                }
                query
            }
            OpSelector::Tick(tick) => vec![("tick".to_string(), tick.clone())],
        }
    }
}

/// `/krc20/oplist` pages chained through the server's `next` cursor
pub struct CursorPager<'a, T> {
    transport: &'a T,
    settings: &'a PagerSettings,
    selector: OpSelector,
    cursor: Option<String>,
    page: usize,
    total: usize,
    done: bool,
}

impl<'a, T: Transport> CursorPager<'a, T> {
    pub fn new(transport: &'a T, settings: &'a PagerSettings, selector: OpSelector) -> Self {
        CursorPager {
            transport,
            settings,
            selector,
            cursor: None,
            page: 0,
            total: 0,
            done: false,
        }
    }

    fn finish(&mut self, why: &str) {
        self.done = true;
        debug!("[done] {} total_pages={} total_rows={}", why, self.page, self.total);
    }
}

fn cursor_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl<'a, T: Transport> Paginator for CursorPager<'a, T> {
    async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        if self.done {
            return Ok(None);
        }
        if self.settings.max_pages.is_some_and(|max| self.page >= max) {
            self.finish("max pages reached;");
            return Ok(None);
        }
        if self.page > 0 && !self.settings.page_delay.is_zero() {
            tokio::time::sleep(self.settings.page_delay).await;
        }

        let url = self.settings.endpoint("/krc20/oplist")?;
        let mut query = self.selector.query();
        query.push(("limit".to_string(), self.settings.limit().to_string()));
        if let Some(cursor) = &self.cursor {
            query.push(("next".to_string(), cursor.clone()));
        }

        let data = match get_json(
            self.transport,
            &url,
            &query,
            &self.settings.retry,
            self.page,
            self.settings.raw_pages.as_ref(),
        )
        .await
        {
            Ok(data) => data,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        let (rows, next) = match data {
            Value::Object(mut map) => {
                let rows = match map.remove("result") {
                    Some(Value::Array(rows)) => rows,
                    _ => Vec::new(),
                };
                (rows, cursor_text(map.get("next")))
            }
            Value::Array(rows) => (rows, None),
            other => {
                warn!("Unexpected op list response shape: {}", other);
                (Vec::new(), None)
            }
        };

        let records = object_records(rows);
        if records.is_empty() {
            self.finish("empty page;");
            return Ok(None);
        }

        let index = self.page;
        self.page += 1;
        self.total += records.len();
        debug!("[page {}] fetched={} cursor={:?}", index, records.len(), next);

        let continuation = match next {
            Some(cursor) => {
                self.cursor = Some(cursor.clone());
                Continuation::Next(cursor)
            }
            None => {
                self.finish("cursor empty;");
                Continuation::Exhausted
            }
        };

        Ok(Some(Page {
            index,
            records,
            continuation,
        }))
    }
}

/// `/addresses/{address}/full-transactions-page` pages walked backwards in time
pub struct WatermarkPager<'a, T> {
    transport: &'a T,
    settings: &'a PagerSettings,
    address: String,
    before: i64,
    cutoff_ms: Option<i64>,
    boundary: BoundaryPolicy,
    page: usize,
    done: bool,
}

impl<'a, T: Transport> WatermarkPager<'a, T> {
    pub fn new(transport: &'a T, settings: &'a PagerSettings, address: &str) -> Self {
        WatermarkPager {
            transport,
            settings,
            address: address.to_string(),
            before: Utc::now().timestamp_millis(),
            cutoff_ms: None,
            boundary: BoundaryPolicy::Oldest,
            page: 0,
            done: false,
        }
    }

    /// Stop at the first record older than `cutoff`
    pub fn with_cutoff(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.cutoff_ms = cutoff.map(|c| c.timestamp_millis());
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    /// Start from a fixed watermark instead of now
    pub fn starting_before(mut self, before_ms: i64) -> Self {
        self.before = before_ms;
        self
    }

    fn next_boundary(&self, records: &[RawRecord]) -> Option<i64> {
        match self.boundary {
            BoundaryPolicy::Oldest => records.iter().filter_map(block_time).min(),
            BoundaryPolicy::Last => records.last().and_then(block_time),
        }
    }
}

/// `block_time` in milliseconds, from a number or numeric string
pub fn block_time(record: &RawRecord) -> Option<i64> {
    match record.get("block_time")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl<'a, T: Transport> Paginator for WatermarkPager<'a, T> {
    async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        if self.done {
            return Ok(None);
        }
        if self.settings.max_pages.is_some_and(|max| self.page >= max) {
            self.done = true;
            debug!("[done] max pages reached for {}", self.address);
            return Ok(None);
        }
        if self.page > 0 && !self.settings.page_delay.is_zero() {
            tokio::time::sleep(self.settings.page_delay).await;
        }

        let url = self
            .settings
            .endpoint(&format!("/addresses/{}/full-transactions-page", self.address))?;
        let query = vec![
            ("limit".to_string(), self.settings.limit().to_string()),
            ("before".to_string(), self.before.to_string()),
            ("resolve_previous_outpoints".to_string(), "full".to_string()),
            ("acceptance".to_string(), "accepted".to_string()),
        ];
        debug!("Fetching before={} for {}", self.before, self.address);

        let data = match get_json(
            self.transport,
            &url,
            &query,
            &self.settings.retry,
            self.page,
            self.settings.raw_pages.as_ref(),
        )
        .await
        {
            Ok(data) => data,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        let items = match data {
            Value::Array(items) => items,
            other => {
                warn!("Expected a transaction array for {}, got: {}", self.address, other);
                self.done = true;
                return Ok(None);
            }
        };
        if items.is_empty() {
            debug!("No more transactions for {}", self.address);
            self.done = true;
            return Ok(None);
        }

        let mut records = object_records(items);
        let index = self.page;
        self.page += 1;

        // Pages arrive newest-first; stop consuming at the first record past the cutoff
        if let Some(cutoff) = self.cutoff_ms {
            if let Some(pos) = records
                .iter()
                .position(|r| block_time(r).is_some_and(|t| t < cutoff))
            {
                info!(
                    "Reached cutoff for {} at block_time {:?}",
                    self.address,
                    block_time(&records[pos])
                );
                records.truncate(pos);
                self.done = true;
                return Ok(Some(Page {
                    index,
                    records,
                    continuation: Continuation::Exhausted,
                }));
            }
        }

        let continuation = match self.next_boundary(&records) {
            Some(next) if next < self.before => {
                self.before = next;
                Continuation::Before(next)
            }
            other => {
                warn!(
                    "Watermark for {} did not move back from {} (got {:?}); stopping",
                    self.address, self.before, other
                );
                self.done = true;
                Continuation::Exhausted
            }
        };

        Ok(Some(Page {
            index,
            records,
            continuation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::testing::{html, json, status, Scripted, ScriptedTransport};

    fn settings() -> PagerSettings {
        let mut settings = PagerSettings::new("https://api.example.test/v1/").unwrap();
        settings.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        settings
    }

    fn tick(t: &str) -> OpSelector {
        OpSelector::Tick(t.to_string())
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(6), Duration::from_secs(15));
        assert_eq!(policy.delay_for(40), Duration::from_secs(15));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(400));
    }

    #[tokio::test]
    async fn test_get_json_recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![
            status(503),
            Scripted::NetworkError("connection reset"),
            json("[1, 2]"),
        ]);

        let value = get_json(&transport, "https://x.test", &[], &settings().retry, 0, None)
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!([1, 2]));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_get_json_retries_malformed_bodies() {
        let transport = ScriptedTransport::new(vec![
            html("<html>busy</html>"),
            Scripted::Reply(crate::ingestion::utils::HttpReply::json(200, b"{not json".to_vec())),
            json("{\"result\": []}"),
        ]);

        let value = get_json(&transport, "https://x.test", &[], &settings().retry, 0, None).await;
        assert!(value.is_ok());
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_get_json_client_error_is_terminal() {
        let transport = ScriptedTransport::new(vec![status(404), json("[]")]);

        let err = get_json(&transport, "https://x.test", &[], &settings().retry, 0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_get_json_gives_up_after_budget() {
        let transport = ScriptedTransport::new(vec![status(429), status(502), status(500), json("[]")]);

        let err = get_json(&transport, "https://x.test", &[], &settings().retry, 0, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_cursor_pager_follows_next() {
        let transport = ScriptedTransport::new(vec![
            json(r#"{"result": [{"hashRev": "a"}, {"hashRev": "b"}], "next": "c1"}"#),
            json(r#"{"result": [{"hashRev": "c"}], "next": "c2"}"#),
            json(r#"{"result": [], "next": null}"#),
        ]);
        let settings = settings();
        let mut pager = CursorPager::new(&transport, &settings, tick("SLOW"));

        let outcome = collect_pages(&mut pager).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.pages, 2);
        assert_eq!(transport.request_count(), 3);
        assert_eq!(transport.url(0).unwrap(), "https://api.example.test/v1/krc20/oplist");
        assert_eq!(transport.query_value(0, "tick").unwrap(), "SLOW");
        assert_eq!(transport.query_value(0, "next"), None);
        assert_eq!(transport.query_value(1, "next").unwrap(), "c1");
        assert_eq!(transport.query_value(2, "next").unwrap(), "c2");
    }

    #[tokio::test]
    async fn test_cursor_pager_null_next_ends_after_rows() {
        let transport = ScriptedTransport::new(vec![json(
            r#"{"result": [{"hashRev": "a"}, {"hashRev": "b"}, {"hashRev": "c"}], "next": null}"#,
        )]);
        let settings = settings();
        let mut pager = CursorPager::new(&transport, &settings, tick("SLOW"));

        let outcome = collect_pages(&mut pager).await;

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cursor_pager_address_query() {
        let transport = ScriptedTransport::new(vec![json(r#"{"result": []}"#), json(r#"{"result": []}"#)]);
        let mut settings = settings();
        settings.page_size = 5000;

        let selector = OpSelector::Address {
            address: "kaspa:qq".to_string(),
            tick: Some("all".to_string()),
        };
        collect_pages(&mut CursorPager::new(&transport, &settings, selector)).await;

        assert_eq!(transport.query_value(0, "address").unwrap(), "kaspa:qq");
        assert_eq!(transport.query_value(0, "tick"), None);
        assert_eq!(transport.query_value(0, "limit").unwrap(), "1000");

        let selector = OpSelector::Address {
            address: "kaspa:qq".to_string(),
            tick: Some("SLOW".to_string()),
        };
        collect_pages(&mut CursorPager::new(&transport, &settings, selector)).await;
        assert_eq!(transport.query_value(1, "tick").unwrap(), "SLOW");
    }

    #[tokio::test]
    async fn test_cursor_pager_keeps_partial_results_on_failure() {
        let transport = ScriptedTransport::new(vec![
            json(r#"{"result": [{"hashRev": "a"}], "next": "c1"}"#),
            status(500),
            status(500),
            status(500),
            json(r#"{"result": [{"hashRev": "b"}], "next": null}"#),
        ]);
        let settings = settings();
        let mut pager = CursorPager::new(&transport, &settings, tick("SLOW"));

        let outcome = collect_pages(&mut pager).await;

        assert_eq!(outcome.records.len(), 1);
        assert!(matches!(outcome.error, Some(FetchError::RetriesExhausted { .. })));
        assert_eq!(transport.request_count(), 4);
        assert!(pager.next_page().await.unwrap().is_none());
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_cursor_pager_respects_max_pages() {
        let transport = ScriptedTransport::new(vec![
            json(r#"{"result": [{"hashRev": "a"}], "next": "c1"}"#),
            json(r#"{"result": [{"hashRev": "b"}], "next": "c2"}"#),
        ]);
        let mut settings = settings();
        settings.max_pages = Some(1);

        let outcome = collect_pages(&mut CursorPager::new(&transport, &settings, tick("SLOW"))).await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_watermark_empty_first_page() {
        let transport = ScriptedTransport::new(vec![json("[]")]);
        let settings = settings();
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq");

        let outcome = collect_pages(&mut pager).await;

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.pages, 0);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(
            transport.url(0).unwrap(),
            "https://api.example.test/v1/addresses/kaspa:qq/full-transactions-page"
        );
        assert_eq!(transport.query_value(0, "resolve_previous_outpoints").unwrap(), "full");
        assert_eq!(transport.query_value(0, "acceptance").unwrap(), "accepted");
    }

    #[tokio::test]
    async fn test_watermark_advances_boundary() {
        let transport = ScriptedTransport::new(vec![
            json(r#"[{"transaction_id": "t1", "block_time": 9000}, {"transaction_id": "t2", "block_time": 8000}]"#),
            json(r#"[{"transaction_id": "t3", "block_time": 7000}]"#),
            json("[]"),
        ]);
        let settings = settings();
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq").starting_before(10_000);

        let outcome = collect_pages(&mut pager).await;

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(transport.query_value(0, "before").unwrap(), "10000");
        assert_eq!(transport.query_value(1, "before").unwrap(), "8000");
        assert_eq!(transport.query_value(2, "before").unwrap(), "7000");
    }

    #[tokio::test]
    async fn test_watermark_boundary_policies() {
        let page = r#"[{"block_time": 5000}, {"block_time": 9000}, "junk"]"#;
        let settings = settings();

        let transport = ScriptedTransport::new(vec![json(page)]);
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq").starting_before(10_000);
        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.continuation, Continuation::Before(5000));

        let transport = ScriptedTransport::new(vec![json(page)]);
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq")
            .starting_before(10_000)
            .with_boundary(BoundaryPolicy::Last);
        let first = pager.next_page().await.unwrap().unwrap();
        assert_eq!(first.continuation, Continuation::Before(9000));
    }

    #[tokio::test]
    async fn test_watermark_stops_when_boundary_stalls() {
        let transport = ScriptedTransport::new(vec![json(r#"[{"block_time": 10000}]"#), json("[]")]);
        let settings = settings();
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq").starting_before(10_000);

        let outcome = collect_pages(&mut pager).await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_watermark_cutoff_stops_consuming() {
        let transport = ScriptedTransport::new(vec![
            json(r#"[{"transaction_id": "new", "block_time": 9000}, {"transaction_id": "old", "block_time": 3000}, {"transaction_id": "older", "block_time": 2000}]"#),
            json(r#"[{"transaction_id": "never", "block_time": 1000}]"#),
        ]);
        let settings = settings();
        let cutoff = DateTime::from_timestamp(5, 0);
        let mut pager = WatermarkPager::new(&transport, &settings, "kaspa:qq")
            .starting_before(10_000)
            .with_cutoff(cutoff);

        let outcome = collect_pages(&mut pager).await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].get("transaction_id").unwrap(), "new");
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_watermark_non_array_ends_stream() {
        let transport = ScriptedTransport::new(vec![json(r#"{"detail": "not found"}"#)]);
        let settings = settings();

        let outcome = collect_pages(&mut WatermarkPager::new(&transport, &settings, "kaspa:qq")).await;

        assert!(outcome.records.is_empty());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_base_url() {
        assert!(matches!(
            PagerSettings::new("api.kaspa.org"),
            Err(FetchError::InvalidBaseUrl(_))
        ));
        assert!(PagerSettings::new("https://").is_err());

        let settings = PagerSettings::new(" https://api.kaspa.org/ ").unwrap();
        assert_eq!(settings.base_url, "https://api.kaspa.org");
    }

    #[tokio::test]
    async fn test_invalid_base_url() {
        let transport = ScriptedTransport::new(vec![]);
        let mut settings = settings();
        settings.base_url = "api.kaspa.org".to_string();

        let outcome = collect_pages(&mut CursorPager::new(&transport, &settings, tick("SLOW"))).await;

        assert!(matches!(outcome.error, Some(FetchError::InvalidBaseUrl(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_raw_pages_saved() {
        let temp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![status(500), json(r#"{"result": []}"#)]);
        let mut settings = settings();
        settings.raw_pages = Some(RawPageStore::new(temp.path().to_path_buf()));

        collect_pages(&mut CursorPager::new(&transport, &settings, tick("SLOW"))).await;

        assert!(temp.path().join("error_500_page00000.raw").exists());
        assert!(temp.path().join("okjson_page00000.json").exists());
    }
}
