//! Deterministic in-memory ports for pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use regex::Regex;

use pencraft_shared::{
    AppConfig, Capability, Completion, CompletionRequest, JobSource, JobSpec, PencraftError,
    Result, Scrape, Search, SearchHit, Storage, TrendLookup, TrendSignal,
};

use crate::capabilities::Capabilities;
use crate::pipeline::ProgressObserver;
use crate::retry::RetryPolicy;

type Script = dyn Fn(&str, u32) -> Result<String> + Send + Sync;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Completion stub driven by a closure of `(prompt, call_index)`.
pub struct ScriptedCompletion {
    script: Box<Script>,
    calls: AtomicU32,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(script: impl Fn(&str, u32) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `"ok"`.
    pub fn echo_request() -> Self {
        Self::new(|_, _| Ok("ok".to_string()))
    }

    /// Always fails with a retryable transport error.
    pub fn unavailable() -> Self {
        Self::new(|_, _| Err(PencraftError::unavailable(Capability::Completion, "offline")))
    }

    /// Plausible answers for every template, with prose at `ratio` of the
    /// requested length.
    pub fn article(ratio: f64) -> Self {
        Self::new(move |prompt, _| Ok(fake_answer(prompt, ratio)))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok()?.last().cloned()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|req| req.prompt.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.script)(&request.prompt, call)
    }
}

/// Prompt classification for [`ScriptedCompletion::article`].
pub fn is_plan_prompt(prompt: &str) -> bool {
    prompt.contains("You are planning a long-form technical blog post")
}

pub fn is_meta_prompt(prompt: &str) -> bool {
    prompt.contains("Generate an SEO-optimized meta description")
}

pub fn is_tags_prompt(prompt: &str) -> bool {
    prompt.contains("Suggest optimized tags and categories")
}

pub fn is_analysis_prompt(prompt: &str) -> bool {
    prompt.contains("Analyze this existing blog post")
}

/// Answer of [`ScriptedCompletion::article`] for one prompt.
pub fn fake_answer(prompt: &str, ratio: f64) -> String {
    static SECTION_COUNT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"Propose exactly (\d+) body sections").expect("valid regex"));
    static LENGTH_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"about (\d+)").expect("valid regex"));

    if is_plan_prompt(prompt) {
        let count: usize = SECTION_COUNT_RE
            .captures(prompt)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(3);
        let sections: Vec<serde_json::Value> = (1..=count)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Planned Aspect {i}"),
                    "key_points": [format!("point {i}a"), format!("point {i}b")],
                })
            })
            .collect();
        return serde_json::json!({ "title": "A Planned Title", "sections": sections }).to_string();
    }
    if is_meta_prompt(prompt) {
        return "A practical guide covering patterns, pitfalls and production practice for engineers shipping real systems.".to_string();
    }
    if is_tags_prompt(prompt) {
        return r#"{"tags": ["rust", "async", "tokio", "performance", "concurrency"], "categories": ["Programming"]}"#.to_string();
    }
    if is_analysis_prompt(prompt) {
        return "Tighten the introduction.".to_string();
    }

    let requested: usize = LENGTH_RE
        .captures(prompt)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(100);
    let words = ((requested as f64) * ratio).round() as usize;
    let cite = prompt.contains("\n[1] ");
    prose(words, cite)
}

/// `words` words of filler prose, citing source 1 after the first sentence.
pub fn prose(words: usize, cite: bool) -> String {
    const VOCAB: [&str; 8] = [
        "systems", "latency", "throughput", "design", "teams", "runtime", "memory", "safety",
    ];
    let mut out = String::new();
    for i in 0..words {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(VOCAB[i % VOCAB.len()]);
        if i % 12 == 11 {
            out.push('.');
            if cite && i == 11 {
                out.push_str(" [@1]");
            }
        }
    }
    if !out.ends_with('.') && !out.is_empty() {
        out.push('.');
    }
    out
}

// ---------------------------------------------------------------------------
// Search, scrape, trends
// ---------------------------------------------------------------------------

pub struct StaticSearch {
    hits: Vec<SearchHit>,
    fail: bool,
    calls: AtomicU32,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Search for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PencraftError::unavailable(Capability::Search, "search down"));
        }
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

pub fn hit(url: &str, title: &str, snippet: &str) -> SearchHit {
    SearchHit {
        url: url.to_string(),
        title: title.to_string(),
        snippet: snippet.to_string(),
        score: 1.0,
    }
}

/// Returns `"page text for {url}"`, failing for URLs containing `fail`.
pub struct StubScrape;

#[async_trait]
impl Scrape for StubScrape {
    async fn scrape(&self, url: &str) -> Result<String> {
        if url.contains("fail") {
            return Err(PencraftError::ScrapeFailed {
                url: url.to_string(),
                message: "HTTP 404".into(),
            });
        }
        Ok(format!("page text for {url}"))
    }
}

pub struct StubTrends(pub HashMap<String, TrendSignal>);

impl StubTrends {
    pub fn new(entries: &[(&str, u64, bool)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(k, volume, rising)| {
                    (
                        (*k).to_string(),
                        TrendSignal {
                            volume: *volume,
                            rising: *rising,
                        },
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl TrendLookup for StubTrends {
    async fn trends(&self, keywords: &[String]) -> Result<HashMap<String, TrendSignal>> {
        Ok(keywords
            .iter()
            .filter_map(|k| self.0.get(k).map(|s| (k.clone(), *s)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// In-memory storage recording every write in order.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<PathBuf, String>>,
    writes: Mutex<Vec<(PathBuf, String)>>,
    fail_writes_to: Option<PathBuf>,
}

impl MemoryStorage {
    pub fn with_file(path: impl Into<PathBuf>, content: &str) -> Self {
        let storage = Self::default();
        storage.insert(path, content);
        storage
    }

    /// Writes to `path` fail with an I/O error.
    pub fn failing_writes_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.fail_writes_to = Some(path.into());
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: &str) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), content.to_string());
        }
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, path: &Path) -> Result<String> {
        self.get(path).ok_or_else(|| PencraftError::NotFound {
            path: path.to_path_buf(),
        })
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if self.fail_writes_to.as_deref() == Some(path) {
            return Err(PencraftError::io(path, std::io::Error::other("disk full")));
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((path.to_path_buf(), content.to_string()));
        }
        self.insert(path, content);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Observer keeping every notification.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(usize, String)>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<(usize, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, m)| m).collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, job_index: usize, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((job_index, message.to_string()));
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn capabilities(
    completion: Arc<ScriptedCompletion>,
    search: Arc<StaticSearch>,
    storage: Arc<MemoryStorage>,
) -> Capabilities {
    Capabilities::new(completion, search, storage).with_retry(RetryPolicy::immediate(2))
}

/// Small band so fake articles stay short.
pub fn topic_job(topic: &str) -> JobSpec {
    let mut config = AppConfig::default();
    config.blog.min_word_count = 800;
    config.blog.max_word_count = 1600;
    let mut job = JobSpec::new(JobSource::Topic(topic.to_string()), &config);
    job.target_word_count = 1000;
    job.output_dir = PathBuf::from("out");
    job
}

pub fn file_job(path: &str, min: usize, max: usize) -> JobSpec {
    let mut config = AppConfig::default();
    config.blog.min_word_count = min;
    config.blog.max_word_count = max;
    JobSpec::new(JobSource::File(PathBuf::from(path)), &config)
}
