//! Capability ports: the external services the pipelines depend on.
//!
//! Each port is an object-safe async trait so orchestrators can hold
//! `Arc<dyn Port>` and tests can substitute in-memory stubs.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{SearchHit, TrendSignal};

/// Parameters for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text completion from a language model.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Web search returning ranked hits.
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// Fetch a URL and return its readable text.
#[async_trait]
pub trait Scrape: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String>;
}

/// Keyword trend lookup. Missing keywords are simply absent from the map.
#[async_trait]
pub trait TrendLookup: Send + Sync {
    async fn trends(&self, keywords: &[String]) -> Result<HashMap<String, TrendSignal>>;
}

/// Document persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a document. Missing paths yield `PencraftError::NotFound`.
    async fn read(&self, path: &Path) -> Result<String>;

    /// Write a document atomically, creating parent directories.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
}
