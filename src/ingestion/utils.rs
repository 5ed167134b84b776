//! Utility functions for common operations

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CRATE_USER_AGENT: &str = concat!("kaspa-flow/", env!("CARGO_PKG_VERSION"));

/// Initialise the fmt subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,kaspa_flow={level},krc20_trace={level},flow_history={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

/// Bytes and metadata of one HTTP response, whatever its status
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpReply {
            status,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }
}

/// Issues one GET. Errors are transport-level only; HTTP statuses come back in the reply.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply>;
}

/// `reqwest` transport that ignores proxy environment variables
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(CRATE_USER_AGENT));

        let client = Client::builder()
            .no_proxy()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await?.to_vec();
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

/// Directory that receives raw response bodies when `--save-raw` is on
#[derive(Debug, Clone)]
pub struct RawPageStore {
    dir: PathBuf,
}

impl RawPageStore {
    pub fn new(dir: PathBuf) -> Self {
        RawPageStore { dir }
    }

    /// `<out without extension>_rawpages`
    pub fn beside(out: &Path) -> Self {
        let mut dir = out.with_extension("").into_os_string();
        dir.push("_rawpages");
        RawPageStore::new(PathBuf::from(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Best effort: a failed save only logs
    pub fn save(&self, name: &str, bytes: &[u8]) {
        let path = self.dir.join(name);
        let result = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, bytes));
        if let Err(e) = result {
            warn!("Could not save raw page {:?}: {}", path, e);
        }
    }
}

/// Keep `[A-Za-z0-9-_.]`, replace everything else with `_`
pub fn sanitize_for_fname(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse a target list: one entry per line, `#` starts a comment, first occurrence wins
pub fn parse_target_lines(text: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for line in text.lines() {
        let entry = line.split('#').next().unwrap_or("").trim();
        if entry.is_empty() || targets.iter().any(|t| t == entry) {
            continue;
        }
        targets.push(entry.to_string());
    }
    targets
}

pub fn load_target_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read targets file {:?}", path))?;
    Ok(parse_target_lines(&text))
}
