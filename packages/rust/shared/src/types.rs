//! Core domain types for Pencraft jobs and articles.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ErrorKind, PencraftError, Result};

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------------

/// Inclusive word-count band an article should land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBand {
    pub min: usize,
    pub max: usize,
}

impl WordBand {
    pub fn contains(&self, words: usize) -> bool {
        (self.min..=self.max).contains(&words)
    }
}

/// What a job works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// Generate a new article about this topic.
    Topic(String),
    /// Enhance the existing document at this path.
    File(PathBuf),
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(topic) => f.write_str(topic),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Feature switches for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    /// Run the research stage (generation) or fetch trend data (enhancement).
    pub use_research: bool,
    /// Regenerate meta description and tags/categories.
    pub improve_seo: bool,
    /// Copy the original document aside before overwriting it.
    pub create_backup: bool,
    /// Ask the model to suggest tags and categories.
    pub suggest_tags: bool,
    /// Emit inline citation markers and a references section.
    pub include_citations: bool,
    /// Put a table of contents after the front matter.
    #[serde(default = "default_include_toc")]
    pub include_toc: bool,
}

fn default_include_toc() -> bool {
    true
}

impl Default for JobFlags {
    fn default() -> Self {
        Self {
            use_research: true,
            improve_seo: true,
            create_backup: true,
            suggest_tags: true,
            include_citations: true,
            include_toc: true,
        }
    }
}

/// One unit of work. Immutable for the duration of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    pub source: JobSource,
    /// Word count the outline is budgeted for.
    pub target_word_count: usize,
    pub word_band: WordBand,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    /// Directory the generated article is written to (generation only).
    pub output_dir: PathBuf,
    /// Free-text style directives forwarded to planning and writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    pub flags: JobFlags,
}

impl JobSpec {
    /// Build a job with defaults taken from the loaded configuration.
    pub fn new(source: JobSource, config: &AppConfig) -> Self {
        let word_band = WordBand {
            min: config.blog.min_word_count,
            max: config.blog.max_word_count,
        };
        Self {
            id: JobId::new(),
            source,
            target_word_count: word_band.min,
            word_band,
            tags: Vec::new(),
            categories: Vec::new(),
            author: config.frontmatter.author.clone(),
            draft: config.frontmatter.draft,
            cover_image: None,
            output_dir: PathBuf::from("."),
            additional_context: None,
            flags: JobFlags {
                suggest_tags: config.blog.suggest_tags,
                include_citations: config.blog.include_citations,
                include_toc: config.blog.include_toc,
                ..JobFlags::default()
            },
        }
    }

    /// The topic for generation jobs.
    pub fn topic(&self) -> Option<&str> {
        match &self.source {
            JobSource::Topic(topic) => Some(topic.as_str()),
            JobSource::File(_) => None,
        }
    }

    /// Check the job before it is submitted to a pipeline.
    pub fn validate(&self) -> Result<()> {
        match &self.source {
            JobSource::Topic(topic) if topic.trim().is_empty() => {
                return Err(PencraftError::validation("job topic is empty"));
            }
            JobSource::File(path) if path.as_os_str().is_empty() => {
                return Err(PencraftError::validation("job file path is empty"));
            }
            _ => {}
        }
        if self.word_band.min == 0 || self.word_band.min > self.word_band.max {
            return Err(PencraftError::validation(format!(
                "invalid word band [{}, {}]",
                self.word_band.min, self.word_band.max
            )));
        }
        if !self.word_band.contains(self.target_word_count) {
            return Err(PencraftError::validation(format!(
                "target word count {} outside band [{}, {}]",
                self.target_word_count, self.word_band.min, self.word_band.max
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

/// A ranked search result as returned by the search port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

/// Trend signal for one keyword as returned by the trend port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSignal {
    pub volume: u64,
    pub rising: bool,
}

/// A deduplicated, relevance-scored source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Relevance to the job topic, in `[0, 1]`.
    pub relevance: f64,
    /// Scraped page text, when the page was fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendKeyword {
    pub keyword: String,
    pub volume: u64,
    pub rising: bool,
}

/// Aggregated external knowledge for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchBundle {
    /// Ordered by relevance, best first.
    pub sources: Vec<Source>,
    pub trends: Vec<TrendKeyword>,
}

impl ResearchBundle {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.trends.is_empty()
    }

    /// Keywords flagged as rising, in bundle order.
    pub fn rising_keywords(&self) -> Vec<&str> {
        self.trends
            .iter()
            .filter(|t| t.rising)
            .map(|t| t.keyword.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Outline & Draft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Introduction,
    Body,
    Outlook,
    Conclusion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    pub kind: SectionKind,
    pub target_words: usize,
    pub key_points: Vec<String>,
}

/// Structural plan for an article. Section count and order are fixed once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    /// Sum of all section budgets.
    pub fn total_budget(&self) -> usize {
        self.sections.iter().map(|s| s.target_words).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub title: String,
    pub target_words: usize,
    pub text: String,
    pub word_count: usize,
    /// Generation failed; the text is a marker for operator review.
    pub placeholder: bool,
    /// Expansion passes applied to this section.
    pub expansions: u32,
}

/// Accumulating article body, one entry per outline section in outline order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub sections: Vec<DraftSection>,
}

impl Draft {
    pub fn word_count(&self) -> usize {
        self.sections.iter().map(|s| s.word_count).sum()
    }
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A reference used in the article body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based number, assigned in order of first appearance.
    pub id: usize,
    pub url: String,
    pub title: String,
    /// Date the source was consulted (`YYYY-MM-DD`).
    pub accessed: String,
}

/// Document metadata header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields this tool does not manage, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Final artifact of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub front_matter: FrontMatter,
    /// Markdown body including the references section.
    pub body: String,
    pub bibliography: Vec<Citation>,
    /// Words in the body, excluding code blocks and references.
    pub word_count: usize,
    pub path: PathBuf,
    /// Serialized front matter + body, as written to storage.
    pub document: String,
}

// ---------------------------------------------------------------------------
// JobResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub path: PathBuf,
    pub title: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Last state the job completed before failing.
    pub last_stage: String,
}

/// Final count came in under the band minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub min_words: usize,
    pub actual_words: usize,
}

/// Terminal outcome of one job. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub source: JobSource,
    pub article: Option<ArticleRef>,
    pub error: Option<JobError>,
    /// Enhancement only: words before the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_word_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Shortfall>,
}

impl JobResult {
    pub fn success(
        job: &JobSpec,
        article: ArticleRef,
        original_word_count: Option<usize>,
        shortfall: Option<Shortfall>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.source.clone(),
            article: Some(article),
            error: None,
            original_word_count,
            shortfall,
        }
    }

    pub fn failure(job: &JobSpec, error: &PencraftError, last_stage: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.source.clone(),
            article: None,
            error: Some(JobError {
                kind: error.kind(),
                detail: error.to_string(),
                last_stage: last_stage.into(),
            }),
            original_word_count: None,
            shortfall: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Words in the produced article, if any.
    pub fn word_count(&self) -> Option<usize> {
        self.article.as_ref().map(|a| a.word_count)
    }
}
