//! The set of capability ports a pipeline runs against.
//!
//! Every call goes through the shared [`RetryPolicy`], so stages never deal
//! with timeouts or transient transport failures themselves. Once the bound
//! cancellation token fires, no new call starts; an in-flight call finishes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use pencraft_shared::{
    AppConfig, Capability, Completion, CompletionRequest, PencraftError, Result, Scrape, Search,
    SearchHit, Storage, TrendLookup, TrendSignal,
};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct Capabilities {
    completion: Arc<dyn Completion>,
    search: Arc<dyn Search>,
    scrape: Option<Arc<dyn Scrape>>,
    trends: Option<Arc<dyn TrendLookup>>,
    storage: Arc<dyn Storage>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("scrape", &self.scrape.is_some())
            .field("trends", &self.trends.is_some())
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    pub fn new(
        completion: Arc<dyn Completion>,
        search: Arc<dyn Search>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let config = AppConfig::default();
        Self {
            completion,
            search,
            scrape: None,
            trends: None,
            storage,
            policy: RetryPolicy::from_config(&config.retry),
            cancel: CancellationToken::new(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        }
    }

    pub fn with_scrape(mut self, scrape: Arc<dyn Scrape>) -> Self {
        self.scrape = Some(scrape);
        self
    }

    pub fn with_trends(mut self, trends: Arc<dyn TrendLookup>) -> Self {
        self.trends = Some(trends);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default token limit and temperature for completion calls.
    pub fn with_generation(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Copy bound to `cancel`; used per job so one job's cancellation stays local.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Cancelled` once the bound token has fired.
    pub fn ensure_active(&self, capability: Capability) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PencraftError::Cancelled(format!(
                "cancelled before {capability} call"
            )));
        }
        Ok(())
    }

    pub fn can_scrape(&self) -> bool {
        self.scrape.is_some()
    }

    // -----------------------------------------------------------------------
    // Port calls
    // -----------------------------------------------------------------------

    pub async fn complete(&self, prompt: &str) -> Result<String> {
        self.complete_with(prompt, self.max_tokens).await
    }

    /// Completion with an explicit token limit (short answers like meta descriptions).
    pub async fn complete_with(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = &CompletionRequest {
            prompt: prompt.to_string(),
            max_tokens: max_tokens.min(self.max_tokens),
            temperature: self.temperature,
        };
        let completion = &self.completion;
        self.policy
            .run(Capability::Completion, move || async move {
                self.ensure_active(Capability::Completion)?;
                completion.complete(request).await
            })
            .await
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let search = &self.search;
        self.policy
            .run(Capability::Search, move || async move {
                self.ensure_active(Capability::Search)?;
                search.search(query, max_results).await
            })
            .await
    }

    /// Scraped page text. `Ok(None)` when no scraper is configured.
    pub async fn scrape(&self, url: &str) -> Result<Option<String>> {
        let Some(scrape) = &self.scrape else {
            return Ok(None);
        };
        self.policy
            .run(Capability::Scrape, move || async move {
                self.ensure_active(Capability::Scrape)?;
                scrape.scrape(url).await
            })
            .await
            .map(Some)
    }

    /// Trend signals. An empty map when no trend source is configured.
    pub async fn trends(&self, keywords: &[String]) -> Result<HashMap<String, TrendSignal>> {
        let Some(trends) = &self.trends else {
            return Ok(HashMap::new());
        };
        if keywords.is_empty() {
            return Ok(HashMap::new());
        }
        self.policy
            .run(Capability::Trends, move || async move {
                self.ensure_active(Capability::Trends)?;
                trends.trends(keywords).await
            })
            .await
    }

    pub async fn read(&self, path: &Path) -> Result<String> {
        let storage = &self.storage;
        self.policy
            .run(Capability::Storage, move || async move {
                self.ensure_active(Capability::Storage)?;
                storage.read(path).await
            })
            .await
    }

    pub async fn write(&self, path: &Path, content: &str) -> Result<()> {
        let storage = &self.storage;
        self.policy
            .run(Capability::Storage, move || async move {
                self.ensure_active(Capability::Storage)?;
                storage.write(path, content).await
            })
            .await
    }
}
