//! Batch topic files.
//!
//! ```toml
//! [[topics]]
//! topic = "Structured concurrency in Rust"
//! tags = ["rust", "async"]
//! target_word_count = 3500
//! additional_context = "Audience: backend engineers"
//! ```

use std::path::Path;

use serde::Deserialize;

use pencraft_shared::{AppConfig, JobSource, JobSpec, PencraftError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopicEntry {
    pub topic: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub target_word_count: Option<usize>,
    #[serde(default)]
    pub additional_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopicFile {
    #[serde(default)]
    topics: Vec<TopicEntry>,
}

impl TopicEntry {
    /// Job for this entry with defaults from `config`.
    ///
    /// A target above the configured maximum widens the band to fit it.
    pub fn into_job(self, config: &AppConfig, output_dir: &Path) -> JobSpec {
        let mut job = JobSpec::new(JobSource::Topic(self.topic), config);
        if let Some(target) = self.target_word_count {
            job.target_word_count = target;
            job.word_band.max = job.word_band.max.max(target);
        }
        job.tags = self.tags;
        job.categories = self.categories;
        job.cover_image = self.cover_image;
        job.additional_context = self.additional_context;
        job.output_dir = output_dir.to_path_buf();
        job
    }
}

/// Parse a topics document. Blank topics are rejected.
pub fn parse_topics(text: &str) -> Result<Vec<TopicEntry>> {
    let file: TopicFile =
        toml::from_str(text).map_err(|e| PencraftError::parse(format!("invalid topics file: {e}")))?;
    if file.topics.is_empty() {
        return Err(PencraftError::validation("topics file lists no [[topics]]"));
    }
    if let Some(pos) = file.topics.iter().position(|t| t.topic.trim().is_empty()) {
        return Err(PencraftError::validation(format!("topic #{} is blank", pos + 1)));
    }
    Ok(file.topics)
}

/// Read and parse a topics file from disk.
pub fn load_topics(path: &Path) -> Result<Vec<TopicEntry>> {
    let text = std::fs::read_to_string(path).map_err(|e| PencraftError::io(path, e))?;
    parse_topics(&text)
}
