//! Markdown utilities for Pencraft.
//!
//! - HTML → Markdown conversion for scraped pages ([`html_to_markdown`])
//! - Cleanup of model-generated section text ([`clean_generated`])
//! - Word counting, front-matter parsing/serialization, H2 section split/join
//!   slug helpers and the table of contents used by the pipelines.

mod cleanup;
pub mod frontmatter;
pub mod sections;
pub mod slug;
pub mod toc;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use pencraft_shared::{PencraftError, Result};

pub use cleanup::clean_generated;
pub use frontmatter::{Document, parse_document, render_document};
pub use sections::{Section, SplitBody, join_sections, split_sections};
pub use slug::{kebab_case, slugify};
pub use toc::{TOC_HEADING, insert_toc, remove_toc};

// ---------------------------------------------------------------------------
// HTML conversion
// ---------------------------------------------------------------------------

/// Tags whose content never contributes to readable text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "svg", "form",
];

/// Convert an HTML page to readable Markdown.
///
/// Extracts the main content container, converts with `htmd`, then runs the
/// cleanup passes (heading normalization, stray tag removal, relative link
/// resolution against `base_url`).
#[instrument(skip(html), fields(len = html.len()))]
pub fn html_to_markdown(html: &str, base_url: Option<&Url>) -> Result<String> {
    let content_html = extract_content_html(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| PencraftError::parse(format!("htmd conversion failed: {e}")))?;

    let cleaned = cleanup::run_pipeline(&raw, base_url);
    debug!(raw_len = raw.len(), cleaned_len = cleaned.len(), "conversion complete");
    Ok(cleaned)
}

/// Extract the main content HTML, stripping page chrome.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Known content containers in priority order
    let selectors = [
        "article",
        "main",
        "[role=\"main\"]",
        ".post-content",
        ".entry-content",
        ".content",
        "body",
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

/// Extract the `<title>` of an HTML page, if present and non-empty.
pub fn html_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = doc
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .trim()
        .to_string();
    (!title.is_empty()).then_some(title)
}

// ---------------------------------------------------------------------------
// Word counting
// ---------------------------------------------------------------------------

/// Count prose words in Markdown.
///
/// Fenced code blocks, HTML comments (review markers), bare markup tokens
/// (`##`, `-`, `|`) and standalone footnote references are not counted.
pub fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
    static FOOTNOTE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\[\^\d+\]:?$").expect("valid regex"));

    let without_code = CODE_BLOCK_RE.replace_all(md, " ");
    let without_comments = COMMENT_RE.replace_all(&without_code, " ");
    without_comments
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .filter(|w| !FOOTNOTE_RE.is_match(w))
        .count()
}

/// Extract the first H1 of a Markdown text.
pub fn extract_title(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
