//! Page fetching for the research stage.
//!
//! [`PageScraper`] implements the [`Scrape`] port: it refuses private and
//! local targets, fetches the page, extracts the main content as Markdown and
//! caps its length so it can be quoted into prompts.

mod guard;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use pencraft_shared::{Capability, PencraftError, Result, Scrape};

pub use guard::{is_ssrf_target, normalize_url};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("Pencraft/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed per page.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we read (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub timeout_secs: u64,
    /// Extracted text is cut to this many characters.
    pub max_chars: usize,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_chars: 8_000,
        }
    }
}

// ---------------------------------------------------------------------------
// PageScraper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PageScraper {
    client: Client,
    options: ScrapeOptions,
    /// Allow localhost/private IPs (for tests against mock servers).
    allow_private: bool,
}

impl PageScraper {
    pub fn new(options: ScrapeOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| PencraftError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            options,
            allow_private: false,
        })
    }

    #[cfg(test)]
    fn allow_private(mut self) -> Self {
        self.allow_private = true;
        self
    }

    fn failed(url: &str, message: impl Into<String>) -> PencraftError {
        PencraftError::ScrapeFailed {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Scrape for PageScraper {
    #[instrument(skip_all, fields(url = %url))]
    async fn scrape(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| Self::failed(url, format!("invalid URL: {e}")))?;
        if !self.allow_private && is_ssrf_target(&parsed) {
            return Err(Self::failed(url, "refusing private or non-HTTP target"));
        }

        let response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                PencraftError::Timeout {
                    capability: Capability::Scrape,
                    after: Duration::from_secs(self.options.timeout_secs),
                }
            } else {
                PencraftError::unavailable(Capability::Scrape, format!("{url}: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PencraftError::unavailable(
                Capability::Scrape,
                format!("{url}: HTTP {status}"),
            ));
        }
        if !status.is_success() {
            return Err(Self::failed(url, format!("HTTP {status}")));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_RESPONSE_SIZE)
        {
            return Err(Self::failed(url, "response too large"));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        if !content_type.starts_with("text/") && !content_type.contains("html") {
            return Err(Self::failed(url, format!("unsupported content type {content_type}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::failed(url, format!("body read failed: {e}")))?;

        let text = if content_type.contains("html") {
            pencraft_markdown::html_to_markdown(&body, Some(&parsed))?
        } else {
            body
        };

        let text = truncate_chars(text.trim(), self.options.max_chars);
        if text.is_empty() {
            return Err(Self::failed(url, "no readable text"));
        }

        debug!(chars = text.len(), "scraped page");
        Ok(text)
    }
}

/// Cut to at most `max` characters, preferring the last paragraph break.
fn truncate_chars(text: &str, max: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max) else {
        return text.to_string();
    };
    let head = &text[..cut];
    match head.rfind("\n\n") {
        Some(pos) if pos > cut / 2 => head[..pos].to_string(),
        _ => head.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
