//! Application configuration for Pencraft.
//!
//! User config lives at `~/.pencraft/pencraft.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PencraftError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pencraft.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pencraft";

// ---------------------------------------------------------------------------
// Config structs (matching pencraft.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub blog: BlogConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub frontmatter: FrontMatterConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    /// Empty means the endpoint needs no key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3030/v1".into()
}
fn default_api_key_env() -> String {
    "PENCRAFT_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}

/// `[blog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlogConfig {
    #[serde(default = "default_min_words")]
    pub min_word_count: usize,

    #[serde(default = "default_max_words")]
    pub max_word_count: usize,

    /// Insert inline citation markers and a references section.
    #[serde(default = "default_true")]
    pub include_citations: bool,

    /// Ask the model for tags/categories and merge them with the caller's.
    #[serde(default = "default_true")]
    pub suggest_tags: bool,

    /// Put a table of contents of the H2 sections after the front matter.
    #[serde(default = "default_true")]
    pub include_toc: bool,

    /// Expansion attempts per section when the draft is under the minimum.
    #[serde(default = "default_expansion_attempts")]
    pub max_expansion_attempts: u32,
}

impl Default for BlogConfig {
    fn default() -> Self {
        Self {
            min_word_count: default_min_words(),
            max_word_count: default_max_words(),
            include_citations: true,
            suggest_tags: true,
            include_toc: true,
            max_expansion_attempts: default_expansion_attempts(),
        }
    }
}

fn default_min_words() -> usize {
    3000
}
fn default_max_words() -> usize {
    6000
}
fn default_expansion_attempts() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// SearXNG-compatible JSON search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// How many top-ranked candidates get their page scraped.
    #[serde(default = "default_scrape_top")]
    pub scrape_top: usize,

    /// Concurrent search/scrape calls within one job.
    #[serde(default = "default_research_concurrency")]
    pub concurrency: usize,

    /// Optional trend signal endpoint. Absent means no trend data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trends_endpoint: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            search_endpoint: default_search_endpoint(),
            max_search_results: default_max_search_results(),
            max_sources: default_max_sources(),
            scrape_top: default_scrape_top(),
            concurrency: default_research_concurrency(),
            trends_endpoint: None,
        }
    }
}

fn default_search_endpoint() -> String {
    "http://localhost:8888/search".into()
}
fn default_max_search_results() -> usize {
    25
}
fn default_max_sources() -> usize {
    15
}
fn default_scrape_top() -> usize {
    5
}
fn default_research_concurrency() -> usize {
    3
}

/// Serialization of the article metadata header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontMatterFormat {
    /// `---` delimited YAML.
    #[default]
    Yaml,
    /// `+++` delimited TOML.
    Toml,
}

/// `[frontmatter]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontMatterConfig {
    #[serde(default)]
    pub format: FrontMatterFormat,

    /// Default author when a job does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Default draft flag.
    #[serde(default)]
    pub draft: bool,
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,

    #[serde(default = "default_true")]
    pub skip_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            skip_on_error: true,
        }
    }
}

fn default_delay_seconds() -> f64 {
    1.0
}

/// `[retry]` section, applied uniformly to every capability port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Per-call deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_timeout_secs() -> u64 {
    120
}

impl AppConfig {
    /// Reject option combinations the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.blog.min_word_count == 0 || self.blog.min_word_count > self.blog.max_word_count {
            return Err(PencraftError::config(format!(
                "invalid word band [{}, {}]",
                self.blog.min_word_count, self.blog.max_word_count
            )));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(PencraftError::config(format!(
                "temperature {} outside [0, 2]",
                self.llm.temperature
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PencraftError::config("retry.max_attempts must be at least 1"));
        }
        if self.research.concurrency == 0 {
            return Err(PencraftError::config("research.concurrency must be at least 1"));
        }
        if self.batch.delay_seconds < 0.0 || !self.batch.delay_seconds.is_finite() {
            return Err(PencraftError::config("batch.delay_seconds must be non-negative"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pencraft/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PencraftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pencraft/pencraft.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PencraftError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PencraftError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PencraftError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PencraftError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PencraftError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Look up the API key named by `api_key_env`.
///
/// Returns `Ok(None)` when no key is configured (local endpoints).
pub fn resolve_api_key(config: &LlmConfig) -> Result<Option<String>> {
    let var_name = &config.api_key_env;
    if var_name.is_empty() {
        return Ok(None);
    }
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        _ => Err(PencraftError::config(format!(
            "API key not found. Set the {var_name} environment variable, \
             or set llm.api_key_env = \"\" for endpoints without auth."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("min_word_count"));
        assert!(toml_str.contains("PENCRAFT_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.blog.min_word_count, 3000);
        assert_eq!(parsed.research.max_sources, 15);
        assert_eq!(parsed.frontmatter.format, FrontMatterFormat::Yaml);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[blog]
min_word_count = 1500

[frontmatter]
format = "toml"
author = "Jane Doe"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.blog.min_word_count, 1500);
        assert_eq!(config.blog.max_word_count, 6000);
        assert_eq!(config.frontmatter.format, FrontMatterFormat::Toml);
        assert_eq!(config.frontmatter.author.as_deref(), Some("Jane Doe"));
        assert_eq!(config.retry.max_attempts, 3);
        config.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_inverted_band() {
        let mut config = AppConfig::default();
        config.blog.min_word_count = 7000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("word band"));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_resolution() {
        let mut llm = LlmConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        llm.api_key_env = "PENCRAFT_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&llm);
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        llm.api_key_env = String::new();
        assert_eq!(resolve_api_key(&llm).unwrap(), None);
    }
}
