//! Enhancement of existing articles.
//!
//! Loads a document, analyzes it against the job's word band and trend data,
//! rewrites the sections the analysis flags as thin, expands until the band
//! minimum is reached, refreshes metadata and writes the result back after a
//! verified backup of the original.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pencraft_markdown::{
    Document, Section, SplitBody, clean_generated, count_words, extract_title, insert_toc,
    join_sections, parse_document, remove_toc, render_document, split_sections,
};
use pencraft_shared::{
    ArticleRef, Draft, DraftSection, FrontMatter, JobResult, JobSource, JobSpec, PencraftError,
    Result, TrendKeyword,
};
use pencraft_storage::{backup_path, content_digest};

use crate::assembler::DATE_FORMAT;
use crate::capabilities::Capabilities;
use crate::citations::{
    check_invariant, footnote_references, repair_citations, split_references, strip_footnotes,
    strip_markers,
};
use crate::pipeline::{JobContext, Pipeline, StageTracker, shortfall};
use crate::prompts::{self, TemplateId};
use crate::research::{lookup_trends, topic_keywords};
use crate::seo::{self, MAX_DESCRIPTION_CHARS, MAX_TAGS, MIN_TAGS, TaxonomyInputs};
use crate::writer::{ExpansionContext, expand_draft, prose_words};

/// A section under this share of its fair budget is flagged as thin.
const THIN_RATIO: f64 = 0.5;

/// Descriptions shorter than this are flagged.
const MIN_DESCRIPTION_CHARS: usize = 50;

/// Titles longer than this get truncated in search results.
const MAX_TITLE_CHARS: usize = 70;

/// Phrases that give away unedited model output.
const ARTIFACT_PHRASES: &[&str] = &[
    "as an ai",
    "in conclusion",
    "in today's fast-paced",
    "it's important to note",
    "delve into",
    "in this article, we will",
];

const NO_NEW_SOURCES: &str = "No new sources; keep existing footnotes and do not add citations.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementState {
    Pending,
    Loaded,
    Analyzing,
    Enhancing,
    Validating,
    Saving,
    Done,
    Failed,
}

impl fmt::Display for EnhancementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Loaded => "loaded",
            Self::Analyzing => "analyzing",
            Self::Enhancing => "enhancing",
            Self::Validating => "validating",
            Self::Saving => "saving",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinSection {
    /// Position among the document's H2 sections.
    pub index: usize,
    pub title: String,
    pub word_count: usize,
    pub target_words: usize,
}

/// Findings that drive the enhancement pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisReport {
    pub seo_issues: Vec<String>,
    pub thin_sections: Vec<ThinSection>,
    /// Trend keywords the body never mentions, rising ones first.
    pub missing_topics: Vec<String>,
    pub quality_issues: Vec<String>,
    pub front_matter_issues: Vec<String>,
    /// Free-form advice from the model, when it was reachable.
    pub notes: Option<String>,
}

impl AnalysisReport {
    pub fn is_thin(&self, index: usize) -> bool {
        self.thin_sections.iter().any(|s| s.index == index)
    }

    pub fn issue_count(&self) -> usize {
        self.seo_issues.len()
            + self.thin_sections.len()
            + self.missing_topics.len()
            + self.quality_issues.len()
            + self.front_matter_issues.len()
    }

    /// Issues handed to the section rewrite prompt.
    fn rewrite_guidance(&self) -> String {
        let mut lines: Vec<&str> = self.quality_issues.iter().map(String::as_str).collect();
        if let Some(notes) = &self.notes {
            lines.push(notes.as_str());
        }
        if lines.is_empty() {
            "section is too thin; add depth and concrete examples".to_string()
        } else {
            lines.join("; ")
        }
    }
}

/// Split `total` into `count` budgets, the last taking the remainder.
fn section_targets(total: usize, count: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let share = total / count;
    let mut targets = vec![share; count];
    if let Some(last) = targets.last_mut() {
        *last = total - share * (count - 1);
    }
    targets
}

fn is_valid_date(date: &str) -> bool {
    NaiveDate::parse_from_str(date, DATE_FORMAT).is_ok() || DateTime::parse_from_rfc3339(date).is_ok()
}

/// Deterministic part of the analysis.
pub fn local_analysis(
    document: &Document,
    sections: &[Section],
    target_words: usize,
    trends: &[TrendKeyword],
) -> AnalysisReport {
    let mut report = AnalysisReport::default();
    let fm = &document.front_matter;

    // --- Front matter ---
    if !document.has_front_matter {
        report.front_matter_issues.push("document has no front matter".into());
    }
    if fm.title.trim().is_empty() {
        report.front_matter_issues.push("missing title".into());
    }
    if fm.date.trim().is_empty() {
        report.front_matter_issues.push("missing date".into());
    } else if !is_valid_date(fm.date.trim()) {
        report.front_matter_issues.push(format!("malformed date {:?}", fm.date));
    }
    match fm.description.as_deref().map(str::trim) {
        None | Some("") => report.front_matter_issues.push("missing description".into()),
        Some(d) if d.chars().count() > MAX_DESCRIPTION_CHARS => report
            .seo_issues
            .push(format!("description longer than {MAX_DESCRIPTION_CHARS} characters")),
        Some(d) if d.chars().count() < MIN_DESCRIPTION_CHARS => report
            .seo_issues
            .push(format!("description shorter than {MIN_DESCRIPTION_CHARS} characters")),
        Some(_) => {}
    }

    // --- SEO ---
    if fm.title.chars().count() > MAX_TITLE_CHARS {
        report.seo_issues.push(format!("title longer than {MAX_TITLE_CHARS} characters"));
    }
    if fm.tags.len() < MIN_TAGS || fm.tags.len() > MAX_TAGS {
        report.seo_issues.push(format!(
            "{} tags, expected {MIN_TAGS}-{MAX_TAGS}",
            fm.tags.len()
        ));
    }
    if fm.categories.is_empty() {
        report.seo_issues.push("no categories".into());
    }
    if sections.len() < 2 {
        report.seo_issues.push("fewer than two H2 sections".into());
    }

    // --- Content ---
    let targets = section_targets(target_words, sections.len());
    for (index, (section, target)) in sections.iter().zip(targets).enumerate() {
        let words = section.word_count();
        if (words as f64) < target as f64 * THIN_RATIO {
            report.thin_sections.push(ThinSection {
                index,
                title: section.heading.clone(),
                word_count: words,
                target_words: target,
            });
        }
    }

    let lowered = document.body.to_lowercase();
    report.missing_topics = trends
        .iter()
        .filter(|t| !lowered.contains(&t.keyword.to_lowercase()))
        .map(|t| t.keyword.clone())
        .collect();

    for phrase in ARTIFACT_PHRASES {
        if lowered.contains(phrase) {
            report.quality_issues.push(format!("remove the phrase {phrase:?}"));
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Enhancer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnhancerSettings {
    /// Expansion passes allowed per section.
    pub max_expansion_attempts: u32,
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            max_expansion_attempts: 3,
        }
    }
}

/// Everything read from the source document.
struct Loaded {
    original: String,
    document: Document,
    split: SplitBody,
    references: Option<String>,
    /// The document carried a table of contents; it is rebuilt on save.
    had_toc: bool,
    title: String,
    word_count: usize,
}

/// Budget for one enhancement pass.
#[derive(Debug, Clone, Copy)]
struct Pass {
    target_words: usize,
    /// Rewrites longer than this many words per section are discarded.
    section_cap: Option<usize>,
    max_attempts: u32,
}

pub struct Enhancer {
    caps: Capabilities,
    settings: EnhancerSettings,
    date: Option<NaiveDate>,
}

impl Enhancer {
    pub fn new(caps: Capabilities, settings: EnhancerSettings) -> Self {
        Self {
            caps,
            settings,
            date: None,
        }
    }

    /// Fix the date used to repair front matter.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Same enhancer with port calls bound to one job's cancellation token.
    fn scoped(&self, cancel: &CancellationToken) -> Self {
        Self {
            caps: self.caps.clone().with_cancel(cancel.clone()),
            settings: self.settings.clone(),
            date: self.date,
        }
    }

    async fn load(&self, path: &Path) -> Result<Loaded> {
        let original = self.caps.read(path).await?;
        let document = parse_document(&original)?;
        let (main, references) = split_references(&document.body);
        let mut split = split_sections(&main);
        let had_toc = remove_toc(&mut split);
        let main = if had_toc {
            join_sections(&split.preamble, &split.sections)
        } else {
            main
        };
        let title = if document.front_matter.title.trim().is_empty() {
            extract_title(&main)
                .or_else(|| path.file_stem().map(|s| s.to_string_lossy().replace(['-', '_'], " ")))
                .unwrap_or_default()
        } else {
            document.front_matter.title.trim().to_string()
        };
        Ok(Loaded {
            word_count: count_words(&main),
            original,
            document,
            split,
            references,
            had_toc,
            title,
        })
    }

    async fn analyze(
        &self,
        loaded: &Loaded,
        sections: &[Section],
        target_words: usize,
        trends: &[TrendKeyword],
    ) -> AnalysisReport {
        let mut report = local_analysis(&loaded.document, sections, target_words, trends);
        let trend_lines = if trends.is_empty() {
            "none".to_string()
        } else {
            trends
                .iter()
                .map(|t| format!("- {} (volume {}, {})", t.keyword, t.volume, if t.rising { "rising" } else { "steady" }))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let prompt = prompts::render(
            TemplateId::AnalyzeContent,
            &[
                ("title", &loaded.title),
                ("word_count", &loaded.word_count.to_string()),
                ("target_words", &target_words.to_string()),
                ("content", &loaded.document.body),
                ("trends", &trend_lines),
            ],
        );
        let notes = match prompt {
            Ok(prompt) => self.caps.complete_with(&prompt, 800).await,
            Err(e) => Err(e),
        };
        match notes {
            Ok(notes) if !notes.trim().is_empty() => report.notes = Some(notes.trim().to_string()),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "analysis notes unavailable"),
        }
        info!(
            issues = report.issue_count(),
            thin = report.thin_sections.len(),
            missing_topics = report.missing_topics.len(),
            "analysis complete"
        );
        report
    }

    async fn rewrite_section(
        &self,
        title: &str,
        section: &Section,
        target_words: usize,
        guidance: &str,
        keywords: &str,
    ) -> Result<String> {
        let prompt = prompts::render(
            TemplateId::EnhanceSection,
            &[
                ("title", title),
                ("section_title", &section.heading),
                ("current_text", &section.body),
                ("current_words", &section.word_count().to_string()),
                ("target_words", &target_words.to_string()),
                ("issues", guidance),
                ("keywords", keywords),
            ],
        )?;
        let answer = self.caps.complete(&prompt).await?;
        let cleaned = strip_markers(&clean_generated(&answer));
        Ok(strip_footnotes(&cleaned, &footnote_references(&section.body))
            .trim()
            .to_string())
    }

    /// One pass over the body: rewrite thin sections, then expand to the minimum.
    ///
    /// Sections the analysis did not flag are kept verbatim. A rewrite is
    /// accepted only if it is longer than the original and keeps every
    /// footnote the original referenced.
    async fn enhance_body(
        &self,
        loaded: &Loaded,
        sections: &[Section],
        report: &AnalysisReport,
        job: &JobSpec,
        keywords: &str,
        pass: Pass,
    ) -> Result<String> {
        let targets = section_targets(pass.target_words, sections.len());
        let guidance = report.rewrite_guidance();
        let mut draft = Draft {
            title: loaded.title.clone(),
            sections: Vec::with_capacity(sections.len()),
        };

        for (index, (section, target)) in sections.iter().zip(targets).enumerate() {
            let mut text = section.body.clone();
            if report.is_thin(index) {
                match self
                    .rewrite_section(&loaded.title, section, target, &guidance, keywords)
                    .await
                {
                    Ok(rewrite) => {
                        let before = prose_words(&text);
                        let after = prose_words(&rewrite);
                        let keeps_refs = footnote_references(&rewrite)
                            .is_superset(&footnote_references(&text));
                        let within_cap = pass.section_cap.is_none_or(|cap| after <= cap);
                        if after > before && keeps_refs && within_cap {
                            debug!(section = %section.heading, before, after, "section rewritten");
                            text = rewrite;
                        } else {
                            debug!(section = %section.heading, before, after, keeps_refs, "rewrite discarded");
                        }
                    }
                    Err(e @ PencraftError::Cancelled(_)) => return Err(e),
                    Err(e) => warn!(section = %section.heading, error = %e, "section rewrite failed"),
                }
            }
            draft.sections.push(DraftSection {
                title: section.heading.clone(),
                target_words: target,
                word_count: prose_words(&text),
                text,
                placeholder: false,
                expansions: 0,
            });
        }

        let context = ExpansionContext {
            topic: &loaded.title,
            sources: NO_NEW_SOURCES.to_string(),
            keywords: keywords.to_string(),
            include_citations: false,
        };
        let applied = expand_draft(
            &self.caps,
            &context,
            &mut draft,
            job.word_band.min,
            pass.max_attempts,
        )
        .await?;
        debug!(applied, words = draft.word_count(), "expansion pass finished");

        let rebuilt: Vec<Section> = draft
            .sections
            .into_iter()
            .map(|s| Section::new(s.title, s.text))
            .collect();
        if loaded.split.sections.is_empty() {
            // Headingless document: the single pseudo-section is the whole body.
            Ok(rebuilt
                .first()
                .map(|s| format!("{}\n", s.body.trim()))
                .unwrap_or_default())
        } else {
            Ok(join_sections(&loaded.split.preamble, &rebuilt))
        }
    }

    async fn refresh_front_matter(
        &self,
        loaded: &Loaded,
        main: &str,
        job: &JobSpec,
        trends: &[TrendKeyword],
    ) -> FrontMatter {
        let mut fm = loaded.document.front_matter.clone();
        fm.title = loaded.title.clone();
        if !is_valid_date(fm.date.trim()) {
            let today = self.date.unwrap_or_else(|| Local::now().date_naive());
            fm.date = today.format(DATE_FORMAT).to_string();
        }

        let keywords = topic_keywords(&loaded.title);
        fm.description = Some(seo::meta_description(&self.caps, &loaded.title, main, &keywords).await);

        let caller_tags: Vec<String> = fm.tags.iter().chain(&job.tags).cloned().collect();
        let caller_categories: Vec<String> =
            fm.categories.iter().chain(&job.categories).cloned().collect();
        let rising: Vec<&str> = trends
            .iter()
            .filter(|t| t.rising)
            .map(|t| t.keyword.as_str())
            .collect();
        let topics: Vec<String> = loaded.split.sections.iter().map(|s| s.heading.clone()).collect();
        let suggested = if job.flags.suggest_tags {
            seo::suggest_taxonomy(
                &self.caps,
                &loaded.title,
                &topics,
                &rising,
                &caller_tags,
                &caller_categories,
            )
            .await
        } else {
            None
        };
        let (tags, categories) = seo::merge_taxonomy(&TaxonomyInputs {
            caller_tags: &caller_tags,
            caller_categories: &caller_categories,
            suggested: suggested.as_ref(),
            rising: &rising,
            topic: &loaded.title,
            suggest: job.flags.suggest_tags,
        });
        fm.tags = tags;
        fm.categories = categories;

        if job.cover_image.is_some() {
            fm.cover_image = job.cover_image.clone();
        }
        if fm.author.is_none() {
            fm.author = job.author.clone();
        }
        fm
    }

    /// Write a backup, verify it byte for byte, then overwrite the original.
    async fn save(&self, path: &Path, loaded: &Loaded, document: &str, backup: bool) -> Result<()> {
        if backup {
            let backup = backup_path(path);
            self.caps.write(&backup, &loaded.original).await?;
            let written = self.caps.read(&backup).await?;
            if content_digest(&written) != content_digest(&loaded.original) {
                return Err(PencraftError::io(
                    &backup,
                    std::io::Error::other("backup content does not match the original"),
                ));
            }
            debug!(backup = %backup.display(), "backup verified");
        }
        self.caps.write(path, document).await
    }

    async fn execute(
        &self,
        job: &JobSpec,
        tracker: &mut StageTracker<'_, EnhancementState>,
    ) -> Result<JobResult> {
        job.validate()?;
        let JobSource::File(path) = &job.source else {
            return Err(PencraftError::validation("enhancement job needs a file"));
        };

        let loaded = self.load(path).await?;
        tracker.advance(EnhancementState::Loaded)?;
        debug!(words = loaded.word_count, sections = loaded.split.sections.len(), "document loaded");

        let sections: Vec<Section> = if loaded.split.sections.is_empty() {
            vec![Section::new(loaded.title.clone(), loaded.split.preamble.clone())]
        } else {
            loaded.split.sections.clone()
        };
        let target_words = job.target_word_count.max(job.word_band.min);

        tracker.advance(EnhancementState::Analyzing)?;
        let trends = if job.flags.use_research {
            let mut keys = topic_keywords(&loaded.title);
            let mut seen: BTreeSet<String> = keys.iter().cloned().collect();
            for tag in loaded.document.front_matter.tags.iter().chain(&job.tags) {
                let tag = tag.to_lowercase().replace('-', " ");
                if seen.insert(tag.clone()) {
                    keys.push(tag);
                }
            }
            lookup_trends(&self.caps, &keys).await
        } else {
            Vec::new()
        };
        let report = self.analyze(&loaded, &sections, target_words, &trends).await;
        let keywords = {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let keywords: Vec<&str> = report
                .missing_topics
                .iter()
                .map(String::as_str)
                .chain(trends.iter().map(|t| t.keyword.as_str()))
                .filter(|k| seen.insert(*k))
                .collect();
            if keywords.is_empty() {
                "none".to_string()
            } else {
                keywords.join(", ")
            }
        };

        tracker.advance(EnhancementState::Enhancing)?;
        let first = Pass {
            target_words,
            section_cap: None,
            max_attempts: self.settings.max_expansion_attempts,
        };
        let main = self
            .enhance_body(&loaded, &sections, &report, job, &keywords, first)
            .await?;

        tracker.advance(EnhancementState::Validating)?;
        let references = loaded.references.clone();
        let (main, references, words) = match validate(&main, references.as_deref(), job) {
            Ok(words) => (main, references, words),
            Err(e) => {
                warn!(error = %e, "enhanced body rejected, re-attempting once");
                tracker.notify("re-attempting enhancement");
                let mid = (job.word_band.min + job.word_band.max) / 2;
                let per_section = mid / sections.len().max(1);
                let retry = Pass {
                    target_words: mid,
                    section_cap: Some(per_section + per_section / 2),
                    max_attempts: self.settings.max_expansion_attempts + 1,
                };
                let main = self
                    .enhance_body(&loaded, &sections, &report, job, &keywords, retry)
                    .await?;
                let (main, references) = repair_citations(&main, loaded.references.as_deref());
                let words = validate(&main, references.as_deref(), job)?;
                (main, references, words)
            }
        };
        let shortfall = shortfall(job, words);
        if let Some(short) = &shortfall {
            warn!(
                words = short.actual_words,
                min = short.min_words,
                "enhanced article still under the minimum word count"
            );
        }

        let shown = if loaded.had_toc {
            insert_toc(&main)
        } else {
            main.clone()
        };
        let body = compose(&shown, references.as_deref());
        let (front_matter, document) = if job.flags.improve_seo {
            let fm = self.refresh_front_matter(&loaded, &main, job, &trends).await;
            let document = render_document(&fm, loaded.document.format, &body)?;
            (fm, document)
        } else if loaded.document.has_front_matter {
            let fm = loaded.document.front_matter.clone();
            let document = render_document(&fm, loaded.document.format, &body)?;
            (fm, document)
        } else {
            (loaded.document.front_matter.clone(), body)
        };

        tracker.advance(EnhancementState::Saving)?;
        self.save(path, &loaded, &document, job.flags.create_backup).await?;

        info!(
            before = loaded.word_count,
            after = words,
            path = %path.display(),
            "document enhanced"
        );
        Ok(JobResult::success(
            job,
            ArticleRef {
                path: path.clone(),
                title: if front_matter.title.is_empty() {
                    loaded.title.clone()
                } else {
                    front_matter.title
                },
                word_count: words,
            },
            Some(loaded.word_count),
            shortfall,
        ))
    }
}

fn compose(main: &str, references: Option<&str>) -> String {
    match references {
        Some(references) => format!("{}\n\n{}\n", main.trim_end(), references.trim()),
        None => format!("{}\n", main.trim_end()),
    }
}

/// Citation and upper-bound checks; returns the body word count.
///
/// Falling short of the minimum is not an error here; the result carries it.
fn validate(main: &str, references: Option<&str>, job: &JobSpec) -> Result<usize> {
    check_invariant(&compose(main, references))?;
    let words = count_words(main);
    if words > job.word_band.max {
        return Err(PencraftError::validation(format!(
            "{words} words exceeds the maximum of {}",
            job.word_band.max
        )));
    }
    Ok(words)
}

#[async_trait]
impl Pipeline for Enhancer {
    #[instrument(skip_all, fields(job = %job.id, source = %job.source))]
    async fn run(&self, job: &JobSpec, ctx: &JobContext) -> JobResult {
        let start = Instant::now();
        let mut tracker = StageTracker::new(ctx, EnhancementState::Pending);
        match self.scoped(&ctx.cancel).execute(job, &mut tracker).await {
            Ok(result) => {
                tracker.finish(EnhancementState::Done);
                info!(
                    words = result.word_count().unwrap_or_default(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "enhancement complete"
                );
                result
            }
            Err(e) => {
                let failed_in = tracker.current();
                let last = tracker.last_completed();
                tracker.finish(EnhancementState::Failed);
                warn!(stage = %failed_in, kind = %e.kind(), error = %e, "enhancement failed");
                JobResult::failure(job, &e, last.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemoryStorage, RecordingObserver, ScriptedCompletion, StaticSearch, StubTrends,
        capabilities, fake_answer, file_job, prose,
    };
    use pencraft_shared::ErrorKind;
    use std::path::PathBuf;
    use std::sync::Arc;

    const PATH: &str = "posts/async.md";

    fn document(section_words: usize) -> String {
        format!(
            "---\ntitle: Async Rust Guide\ndate: 2024-05-01\ntags:\n  - rust\nslug: custom-slug\nweight: 3\n---\n\n\
             ## Setup\n\n{a}\n\n## Usage\n\n{b}\n\n## Testing\n\n{c}\n\n## Deployment\n\n{d}\n",
            a = prose(section_words, false),
            b = prose(section_words, false),
            c = prose(section_words, false),
            d = prose(section_words, false),
        )
    }

    struct Harness {
        completion: Arc<ScriptedCompletion>,
        storage: Arc<MemoryStorage>,
    }

    impl Harness {
        fn new(completion: ScriptedCompletion, storage: MemoryStorage) -> Self {
            Self {
                completion: Arc::new(completion),
                storage: Arc::new(storage),
            }
        }

        fn enhancer(&self) -> Enhancer {
            let caps = capabilities(
                self.completion.clone(),
                Arc::new(StaticSearch::empty()),
                self.storage.clone(),
            );
            Enhancer::new(caps, EnhancerSettings::default())
                .with_date(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
        }

        async fn run(&self, job: &JobSpec) -> JobResult {
            self.enhancer().run(job, &JobContext::standalone()).await
        }
    }

    fn body_words(document: &str) -> usize {
        let parsed = parse_document(document).unwrap();
        count_words(&split_references(&parsed.body).0)
    }

    #[tokio::test]
    async fn short_document_reaches_band() {
        let original = document(300);
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let job = file_job(PATH, 3000, 6000);
        let result = harness.run(&job).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.original_word_count, Some(body_words(&original)));
        let words = result.word_count().unwrap();
        assert!(job.word_band.contains(words), "{words} words");
        assert!(result.shortfall.is_none());

        let saved = harness.storage.get(Path::new(PATH)).unwrap();
        assert_eq!(body_words(&saved), words);
    }

    #[tokio::test]
    async fn stingy_model_reports_shortfall() {
        let original = document(300);
        let harness = Harness::new(ScriptedCompletion::article(0.2), MemoryStorage::with_file(PATH, &original));
        let job = file_job(PATH, 3000, 6000);
        let result = harness.run(&job).await;

        assert!(result.is_success(), "{:?}", result.error);
        let shortfall = result.shortfall.unwrap();
        assert_eq!(shortfall.min_words, 3000);
        assert_eq!(Some(shortfall.actual_words), result.word_count());
        assert!(shortfall.actual_words < 3000);
        assert!(shortfall.actual_words > body_words(&original));
    }

    #[tokio::test]
    async fn backup_matches_original_and_precedes_overwrite() {
        let original = document(300);
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let result = harness.run(&file_job(PATH, 3000, 6000)).await;
        assert!(result.is_success());

        let writes = harness.storage.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (PathBuf::from("posts/async.md.bak"), original.clone()));
        assert_eq!(writes[1].0, PathBuf::from(PATH));
        assert_ne!(writes[1].1, original);
    }

    #[tokio::test]
    async fn failed_backup_leaves_original_untouched() {
        let original = document(300);
        let storage = MemoryStorage::with_file(PATH, &original).failing_writes_to("posts/async.md.bak");
        let harness = Harness::new(ScriptedCompletion::article(1.0), storage);
        let result = harness.run(&file_job(PATH, 3000, 6000)).await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::IoError);
        assert_eq!(error.last_stage, "validating");
        assert_eq!(harness.storage.get(Path::new(PATH)).unwrap(), original);
        assert!(harness.storage.writes().is_empty());
    }

    #[tokio::test]
    async fn no_backup_flag_skips_backup() {
        let harness = Harness::new(
            ScriptedCompletion::article(1.0),
            MemoryStorage::with_file(PATH, &document(300)),
        );
        let mut job = file_job(PATH, 3000, 6000);
        job.flags.create_backup = false;
        assert!(harness.run(&job).await.is_success());
        assert!(harness.storage.get(Path::new("posts/async.md.bak")).is_none());
    }

    #[tokio::test]
    async fn unknown_front_matter_keys_survive() {
        let harness = Harness::new(
            ScriptedCompletion::article(1.0),
            MemoryStorage::with_file(PATH, &document(300)),
        );
        harness.run(&file_job(PATH, 3000, 6000)).await;

        let saved = parse_document(&harness.storage.get(Path::new(PATH)).unwrap()).unwrap();
        let fm = saved.front_matter;
        assert_eq!(fm.title, "Async Rust Guide");
        assert_eq!(fm.date, "2024-05-01");
        assert_eq!(fm.extra["slug"], serde_json::json!("custom-slug"));
        assert_eq!(fm.extra["weight"], serde_json::json!(3));
        assert_eq!(fm.tags[0], "rust");
        assert!(fm.description.is_some());
    }

    #[tokio::test]
    async fn adequate_sections_are_preserved() {
        let mut original = document(800);
        let thin = prose(40, false);
        original = original.replacen(
            "## Testing\n\n",
            &format!("## Testing\n\n{thin}\n\n## Extra\n\n"),
            1,
        );
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let result = harness.run(&file_job(PATH, 3000, 6000)).await;
        assert!(result.is_success(), "{:?}", result.error);

        let saved = parse_document(&harness.storage.get(Path::new(PATH)).unwrap()).unwrap();
        let before = split_sections(&parse_document(&original).unwrap().body);
        let after = split_sections(&saved.body);
        assert_eq!(after.sections[0], before.sections[0]);
        assert_eq!(after.sections[1], before.sections[1]);
        assert!(after.sections[2].word_count() > before.sections[2].word_count());
    }

    #[tokio::test]
    async fn existing_footnotes_stay_consistent() {
        let original = format!(
            "---\ntitle: Cited Post\ndate: 2024-05-01\n---\n\n## Claims\n\nRust is fast[^1]. {}\n\n## More\n\n{}\n\n## References\n\n[^1]: [Bench](https://bench.example)\n",
            prose(100, false),
            prose(100, false),
        );
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let result = harness.run(&file_job(PATH, 1000, 2000)).await;
        assert!(result.is_success(), "{:?}", result.error);

        let saved = parse_document(&harness.storage.get(Path::new(PATH)).unwrap()).unwrap();
        assert!(saved.body.contains("Rust is fast[^1]."));
        assert!(saved.body.contains("[^1]: [Bench](https://bench.example)"));
        check_invariant(&saved.body).unwrap();
    }

    #[tokio::test]
    async fn table_of_contents_is_rebuilt_and_not_counted() {
        let original = format!(
            "---\ntitle: Async Rust Guide\ndate: 2024-05-01\n---\n\n## Table of Contents\n\n- [Setup](#setup)\n\n\
             ## Setup\n\n{}\n\n## Usage\n\n{}\n",
            prose(600, false),
            prose(600, false),
        );
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let result = harness.run(&file_job(PATH, 1000, 2000)).await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.original_word_count, Some(1202));

        let saved = parse_document(&harness.storage.get(Path::new(PATH)).unwrap()).unwrap();
        assert!(saved.body.starts_with("## Table of Contents\n\n- [Setup](#setup)\n- [Usage](#usage)\n\n## Setup"));
        assert_eq!(saved.body.matches("## Table of Contents").count(), 1);
    }

    #[tokio::test]
    async fn overlong_rewrite_is_retried_within_band() {
        let completion = ScriptedCompletion::new(|prompt, _| {
            if prompt.contains("Rewrite and expand this section") {
                Ok(prose(5000, false))
            } else {
                Ok(fake_answer(prompt, 1.0))
            }
        });
        let observer = Arc::new(RecordingObserver::default());
        let harness = Harness::new(completion, MemoryStorage::with_file(PATH, &document(300)));
        let ctx = JobContext {
            index: 0,
            observer: observer.clone(),
            cancel: CancellationToken::new(),
        };
        let job = file_job(PATH, 3000, 6000);
        let result = harness.enhancer().run(&job, &ctx).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert!(job.word_band.contains(result.word_count().unwrap()));
        assert!(observer.messages().contains(&"re-attempting enhancement".to_string()));
    }

    #[tokio::test]
    async fn headingless_document_is_enhanced_as_one_section() {
        let original = format!("---\ntitle: Notes\ndate: 2024-05-01\n---\n\n{}\n", prose(200, false));
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::with_file(PATH, &original));
        let result = harness.run(&file_job(PATH, 1000, 2000)).await;
        assert!(result.is_success(), "{:?}", result.error);

        let saved = parse_document(&harness.storage.get(Path::new(PATH)).unwrap()).unwrap();
        assert!(!saved.body.contains("## "));
        assert!(result.word_count().unwrap() >= 1000);
    }

    #[tokio::test]
    async fn missing_file_fails_before_loading() {
        let harness = Harness::new(ScriptedCompletion::article(1.0), MemoryStorage::default());
        let result = harness.run(&file_job(PATH, 3000, 6000)).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::IoError);
        assert_eq!(error.last_stage, "pending");
    }

    #[tokio::test]
    async fn reports_stages_in_order() {
        let observer = Arc::new(RecordingObserver::default());
        let harness = Harness::new(
            ScriptedCompletion::article(1.0),
            MemoryStorage::with_file(PATH, &document(800)),
        );
        let ctx = JobContext {
            index: 1,
            observer: observer.clone(),
            cancel: CancellationToken::new(),
        };
        harness.enhancer().run(&file_job(PATH, 3000, 6000), &ctx).await;
        assert_eq!(
            observer.messages(),
            vec!["loaded", "analyzing", "enhancing", "validating", "saving", "done"]
        );
    }

    #[test]
    fn local_analysis_flags_issues() {
        let text = "---\ntitle: Guide\ndate: last tuesday\n---\n\n## Intro\n\nAs an AI, short.\n\n## Body\n\nTokio runtime details here.\n";
        let document = parse_document(text).unwrap();
        let sections = split_sections(&document.body).sections;
        let trends = vec![
            TrendKeyword { keyword: "tokio".into(), volume: 10, rising: true },
            TrendKeyword { keyword: "structured concurrency".into(), volume: 5, rising: true },
        ];
        let report = local_analysis(&document, &sections, 1000, &trends);

        assert_eq!(report.thin_sections.len(), 2);
        assert_eq!(report.thin_sections[0].target_words, 500);
        assert_eq!(report.missing_topics, vec!["structured concurrency".to_string()]);
        assert!(report.quality_issues.iter().any(|i| i.contains("as an ai")));
        assert!(report.front_matter_issues.iter().any(|i| i.starts_with("malformed date")));
        assert!(report.front_matter_issues.iter().any(|i| i == "missing description"));
        assert!(report.seo_issues.iter().any(|i| i.contains("tags")));
    }

    #[test]
    fn section_targets_sum_to_total() {
        assert_eq!(section_targets(1000, 3), vec![333, 333, 334]);
        assert!(section_targets(10, 0).is_empty());
    }

    #[tokio::test]
    async fn trends_feed_the_analysis() {
        let storage = Arc::new(MemoryStorage::with_file(PATH, &document(800)));
        let completion = Arc::new(ScriptedCompletion::article(1.0));
        let caps = capabilities(completion.clone(), Arc::new(StaticSearch::empty()), storage.clone())
            .with_trends(Arc::new(StubTrends::new(&[("async", 900, true), ("rust", 500, false)])));
        let result = Enhancer::new(caps, EnhancerSettings::default())
            .run(&file_job(PATH, 3000, 6000), &JobContext::standalone())
            .await;
        assert!(result.is_success());

        let prompts = completion.prompts();
        let analysis = prompts.iter().find(|p| p.contains("Analyze this existing blog post")).unwrap();
        assert!(analysis.contains("- async (volume 900, rising)"));
        let saved = parse_document(&storage.get(Path::new(PATH)).unwrap()).unwrap();
        assert!(saved.front_matter.tags.contains(&"async".to_string()));
    }
}
