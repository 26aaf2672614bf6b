//! Writing stage: outline + research → draft, expanded toward the word band.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use pencraft_markdown::{clean_generated, count_words};
use pencraft_shared::{
    Draft, DraftSection, Outline, OutlineSection, PencraftError, ResearchBundle, Result,
    SectionKind, WordBand,
};

use crate::capabilities::Capabilities;
use crate::citations::{strip_footnotes, strip_markers};
use crate::prompts::{self, TemplateId};
use crate::research::source_digest;

/// Sources quoted into each section prompt.
const PROMPT_SOURCES: usize = 10;

/// Smallest continuation requested from the model.
const MIN_EXPANSION_WORDS: usize = 100;

/// Attempts per section in the initial pass (first call plus one retry).
const SECTION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub band: WordBand,
    /// Expansion passes allowed per section.
    pub max_expansion_attempts: u32,
    pub include_citations: bool,
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub draft: Draft,
    /// Words after the initial pass, before any expansion.
    pub initial_word_count: usize,
}

/// Inputs shared by every expansion prompt.
#[derive(Debug, Clone)]
pub struct ExpansionContext<'a> {
    pub topic: &'a str,
    pub sources: String,
    pub keywords: String,
    pub include_citations: bool,
}

fn section_role(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::Introduction => "Open the article: hook the reader and preview what follows.",
        SectionKind::Body => "Cover this aspect in depth with concrete examples.",
        SectionKind::Outlook => "Look ahead: trends, open problems and what to watch.",
        SectionKind::Conclusion => "Close the article with key takeaways and next steps.",
    }
}

/// Words in generated text, not counting raw citation markers.
pub fn prose_words(text: &str) -> usize {
    count_words(&strip_markers(text))
}

fn review_marker(title: &str, error: &PencraftError) -> String {
    format!("<!-- REVIEW: section \"{title}\" could not be generated ({error}) -->")
}

/// Write every outline section, then expand short sections.
///
/// A section that fails twice becomes a review placeholder. The stage fails
/// only when no section could be written at all, or on cancellation.
#[instrument(skip_all, fields(sections = outline.sections.len(), min = options.band.min))]
pub async fn write(
    caps: &Capabilities,
    topic: &str,
    outline: &Outline,
    bundle: &ResearchBundle,
    options: &WriteOptions,
) -> Result<WriteReport> {
    let start = Instant::now();
    let sources = if options.include_citations {
        source_digest(bundle, PROMPT_SOURCES)
    } else {
        "Citations disabled for this article.".to_string()
    };
    let outline_titles: Vec<&str> = outline.sections.iter().map(|s| s.title.as_str()).collect();
    let outline_summary = outline_titles.join("; ");

    let mut draft = Draft {
        title: outline.title.clone(),
        sections: Vec::with_capacity(outline.sections.len()),
    };
    let mut last_error: Option<PencraftError> = None;

    for section in &outline.sections {
        let mut written = None;
        for attempt in 1..=SECTION_ATTEMPTS {
            match write_section(caps, topic, outline, &outline_summary, section, &sources, options).await {
                Ok(text) => {
                    written = Some(text);
                    break;
                }
                Err(e @ PencraftError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    warn!(section = %section.title, attempt, error = %e, "section generation failed");
                    last_error = Some(e);
                }
            }
        }

        let entry = match written {
            Some(text) => DraftSection {
                title: section.title.clone(),
                target_words: section.target_words,
                word_count: prose_words(&text),
                text,
                placeholder: false,
                expansions: 0,
            },
            None => {
                let marker = last_error
                    .as_ref()
                    .map(|e| review_marker(&section.title, e))
                    .unwrap_or_default();
                DraftSection {
                    title: section.title.clone(),
                    target_words: section.target_words,
                    word_count: 0,
                    text: marker,
                    placeholder: true,
                    expansions: 0,
                }
            }
        };
        debug!(section = %entry.title, words = entry.word_count, target = entry.target_words, "section drafted");
        draft.sections.push(entry);
    }

    if draft.sections.iter().all(|s| s.placeholder) {
        let detail = last_error.map_or_else(|| "outline has no sections".to_string(), |e| e.to_string());
        return Err(PencraftError::Writing(format!(
            "completion unavailable for every section: {detail}"
        )));
    }

    let initial_word_count = draft.word_count();
    let context = ExpansionContext {
        topic,
        sources,
        keywords: bundle.rising_keywords().join(", "),
        include_citations: options.include_citations,
    };
    expand_draft(caps, &context, &mut draft, options.band.min, options.max_expansion_attempts).await?;

    let placeholders = draft.sections.iter().filter(|s| s.placeholder).count();
    if placeholders > 0 {
        warn!(placeholders, "draft contains sections marked for review");
    }
    info!(
        initial_words = initial_word_count,
        words = draft.word_count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "draft written"
    );
    Ok(WriteReport {
        draft,
        initial_word_count,
    })
}

async fn write_section(
    caps: &Capabilities,
    topic: &str,
    outline: &Outline,
    outline_summary: &str,
    section: &OutlineSection,
    sources: &str,
    options: &WriteOptions,
) -> Result<String> {
    let key_points = if section.key_points.is_empty() {
        "- (choose the most useful points yourself)".to_string()
    } else {
        section
            .key_points
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let prompt = prompts::render(
        TemplateId::WriteSection,
        &[
            ("topic", topic),
            ("article_title", &outline.title),
            ("section_title", &section.title),
            ("section_role", section_role(section.kind)),
            ("target_words", &section.target_words.to_string()),
            ("key_points", &key_points),
            ("sources", sources),
            ("outline", outline_summary),
            ("additional_context", options.additional_context.as_deref().unwrap_or("none")),
        ],
    )?;
    let answer = caps.complete(&prompt).await?;
    finish_text(&answer, options.include_citations)
        .ok_or_else(|| PencraftError::parse(format!("empty answer for section {:?}", section.title)))
}

/// Clean model output; `None` when nothing usable is left.
///
/// Footnotes the model wrote itself are removed: citations only enter the
/// draft as `[@N]` markers, which assembly numbers.
fn finish_text(answer: &str, include_citations: bool) -> Option<String> {
    let cleaned = strip_footnotes(&clean_generated(answer), &BTreeSet::new());
    let cleaned = if include_citations {
        cleaned
    } else {
        strip_markers(&cleaned)
    };
    let cleaned = cleaned.trim().to_string();
    (prose_words(&cleaned) > 0).then_some(cleaned)
}

/// Expand the shortest under-budget sections until the draft reaches `min_words`.
///
/// Each section is expanded at most `max_attempts` times; failed calls count
/// as attempts. Text is only ever appended, so no section shrinks. Returns
/// the number of expansions that added text; cancellation is the only error.
pub async fn expand_draft(
    caps: &Capabilities,
    context: &ExpansionContext<'_>,
    draft: &mut Draft,
    min_words: usize,
    max_attempts: u32,
) -> Result<usize> {
    let mut applied = 0;
    loop {
        let total = draft.word_count();
        if total >= min_words {
            break;
        }
        let Some(index) = draft
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.placeholder && s.expansions < max_attempts && s.word_count < s.target_words)
            .min_by_key(|(i, s)| (s.word_count, *i))
            .map(|(i, _)| i)
        else {
            debug!(total, min_words, "no section left to expand");
            break;
        };

        let section = &mut draft.sections[index];
        section.expansions += 1;
        let additional = section
            .target_words
            .saturating_sub(section.word_count)
            .max(MIN_EXPANSION_WORDS);

        match expand_section(caps, context, section, additional).await {
            Ok(addition) => {
                let merged = format!("{}\n\n{addition}", section.text.trim_end());
                let words = prose_words(&merged);
                if words > section.word_count {
                    debug!(section = %section.title, before = section.word_count, after = words, "section expanded");
                    section.text = merged;
                    section.word_count = words;
                    applied += 1;
                }
            }
            Err(e @ PencraftError::Cancelled(_)) => return Err(e),
            Err(e) => warn!(section = %section.title, error = %e, "expansion failed"),
        }
    }
    Ok(applied)
}

async fn expand_section(
    caps: &Capabilities,
    context: &ExpansionContext<'_>,
    section: &DraftSection,
    additional: usize,
) -> Result<String> {
    let keywords = if context.keywords.is_empty() {
        "none"
    } else {
        context.keywords.as_str()
    };
    let prompt = prompts::render(
        TemplateId::ExpandSection,
        &[
            ("topic", context.topic),
            ("section_title", &section.title),
            ("current_text", &section.text),
            ("additional_words", &additional.to_string()),
            ("sources", &context.sources),
            ("keywords", keywords),
        ],
    )?;
    let answer = caps.complete(&prompt).await?;
    finish_text(&answer, context.include_citations)
        .ok_or_else(|| PencraftError::parse(format!("empty expansion for {:?}", section.title)))
}
