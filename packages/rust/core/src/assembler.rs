//! Assembly stage: draft + research + job → finished article document.
//!
//! Joins the draft sections under H2 headings, resolves citation markers
//! into footnotes with a references section, adds a table of contents,
//! synthesizes front matter and serializes everything into the document that
//! gets persisted. The table of contents is not counted as article words.

use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use pencraft_markdown::{
    Section, count_words, insert_toc, join_sections, render_document, slugify,
};
use pencraft_shared::{
    Article, Draft, FrontMatter, FrontMatterFormat, JobSpec, PencraftError, ResearchBundle, Result,
};

use crate::capabilities::Capabilities;
use crate::citations::{self, check_invariant, render_bibliography, repair_citations};
use crate::planner::is_fixed_section;
use crate::research::topic_keywords;
use crate::seo::{self, TaxonomyInputs};

/// Date format used in front matter and citation access dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Build the final article for a generation job.
///
/// Only an empty body is an error; it means an upstream stage broke its
/// contract.
#[instrument(skip_all, fields(title = %draft.title, sections = draft.sections.len()))]
pub async fn assemble(
    caps: &Capabilities,
    draft: &Draft,
    bundle: &ResearchBundle,
    job: &JobSpec,
    format: FrontMatterFormat,
    today: NaiveDate,
) -> Result<Article> {
    let sections: Vec<Section> = draft
        .sections
        .iter()
        .map(|s| Section::new(s.title.clone(), s.text.trim()))
        .collect();
    if draft.sections.iter().all(|s| count_words(&s.text) == 0) {
        return Err(PencraftError::Formatting("article body is empty".into()));
    }
    let main = join_sections("", &sections);

    // --- Citations ---
    let accessed = today.format(DATE_FORMAT).to_string();
    let (main, bibliography) = if job.flags.include_citations {
        citations::resolve_citations(&main, &bundle.sources, &accessed)
    } else {
        (citations::strip_markers(&main), Vec::new())
    };
    let references = render_bibliography(&bibliography);
    let (main, references) = repair_citations(&main, (!references.is_empty()).then_some(references.as_str()));
    let shown = if job.flags.include_toc {
        insert_toc(&main)
    } else {
        main.clone()
    };
    let body = match &references {
        Some(references) => format!("{}\n\n{references}\n", shown.trim_end()),
        None => format!("{}\n", shown.trim_end()),
    };
    check_invariant(&body).map_err(|e| PencraftError::Formatting(e.to_string()))?;
    let word_count = count_words(&main);
    debug!(citations = bibliography.len(), "citations resolved");

    // --- Front matter ---
    let topic = job.topic().unwrap_or(&draft.title);
    let title = if draft.title.trim().is_empty() {
        topic.to_string()
    } else {
        draft.title.trim().to_string()
    };
    let keywords = topic_keywords(topic);
    let description = seo::meta_description(caps, &title, &main, &keywords).await;

    let rising = bundle.rising_keywords();
    let content_topics: Vec<String> = draft
        .sections
        .iter()
        .filter(|s| !is_fixed_section(&s.title))
        .map(|s| s.title.clone())
        .collect();
    let suggested = if job.flags.suggest_tags {
        seo::suggest_taxonomy(caps, &title, &content_topics, &rising, &job.tags, &job.categories).await
    } else {
        None
    };
    let (tags, categories) = seo::merge_taxonomy(&TaxonomyInputs {
        caller_tags: &job.tags,
        caller_categories: &job.categories,
        suggested: suggested.as_ref(),
        rising: &rising,
        topic,
        suggest: job.flags.suggest_tags,
    });

    let front_matter = FrontMatter {
        title: title.clone(),
        date: accessed,
        tags,
        categories,
        draft: job.draft,
        author: job.author.clone(),
        cover_image: job.cover_image.clone(),
        description: Some(description),
        extra: Default::default(),
    };

    let path = job.output_dir.join(format!("{}.md", slugify(&title)));
    let document = render_document(&front_matter, format, &body)?;

    info!(
        words = word_count,
        citations = bibliography.len(),
        tags = front_matter.tags.len(),
        path = %path.display(),
        "article assembled"
    );

    Ok(Article {
        front_matter,
        body,
        bibliography,
        word_count,
        path,
        document,
    })
}
