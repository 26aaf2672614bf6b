//! HTTP adapters for the search and trend ports.
//!
//! - [`SearxClient`] queries a SearXNG-compatible JSON search API.
//! - [`TrendClient`] posts keywords to a trend service and reads back
//!   per-keyword volume and rising flags.

mod trends;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use pencraft_shared::{Capability, PencraftError, Result, Search, SearchHit};

pub use trends::TrendClient;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("Pencraft/", env!("CARGO_PKG_VERSION"));

/// Default timeout in seconds for search requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

// ---------------------------------------------------------------------------
// SearxClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearxClient {
    http: Client,
    endpoint: Url,
    timeout: Duration,
}

impl SearxClient {
    /// `endpoint` is the full search URL, e.g. `http://localhost:8888/search`.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            PencraftError::config(format!("invalid search endpoint '{endpoint}': {e}"))
        })?;
        let timeout = Duration::from_secs(timeout_secs);
        Ok(Self {
            http: build_client(timeout)?,
            endpoint,
            timeout,
        })
    }
}

#[async_trait]
impl Search for SearxClient {
    #[instrument(skip_all, fields(query = %query, max_results = max_results))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| transport_error(Capability::Search, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PencraftError::unavailable(
                Capability::Search,
                format!("{}: HTTP {status}", self.endpoint),
            ));
        }

        let parsed: SearxResponse = response
            .json()
            .await
            .map_err(|e| PencraftError::parse(format!("invalid search response: {e}")))?;

        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .filter(|r| r.url.starts_with("http://") || r.url.starts_with("https://"))
            .take(max_results)
            .enumerate()
            .map(|(rank, r)| SearchHit {
                score: r.score.unwrap_or(1.0 / (rank as f64 + 1.0)),
                url: r.url,
                title: r.title.trim().to_string(),
                snippet: r.content.trim().to_string(),
            })
            .collect();

        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| PencraftError::config(format!("failed to build HTTP client: {e}")))
}

fn transport_error(capability: Capability, timeout: Duration, e: reqwest::Error) -> PencraftError {
    if e.is_timeout() {
        PencraftError::Timeout {
            capability,
            after: timeout,
        }
    } else {
        PencraftError::unavailable(capability, e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
