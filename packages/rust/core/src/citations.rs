//! Inline citation markers and the references section.
//!
//! Generated text cites research sources as `[@N]` (1-based index into the
//! bundle). Assembly turns valid markers into Markdown footnotes `[^k]`,
//! numbered by first appearance, and renders one definition per footnote.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use pencraft_shared::{Citation, PencraftError, Result, Source};

/// Heading of the rendered references section.
pub const REFERENCES_HEADING: &str = "References";

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?\[@(\d+)\]").expect("valid regex"));

static FOOTNOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^(\d+)\](:)?").expect("valid regex"));

static DEFINITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\[\^(\d+)\]:").expect("valid regex"));

/// Any footnote label, numeric or not, as models write them unprompted.
static ANY_FOOTNOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^([^\]\s]+)\]").expect("valid regex"));

static ANY_DEFINITION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\[\^[^\]\s]+\]:.*(?:\r?\n)?").expect("valid regex"));

static REFERENCES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^##\s+(references|sources|bibliography)\s*$").expect("valid regex")
});

/// Replace `[@N]` markers with footnotes and collect the cited sources.
///
/// Markers pointing outside `sources` are dropped. Two markers for the same
/// URL share one footnote.
pub fn resolve_citations(body: &str, sources: &[Source], accessed: &str) -> (String, Vec<Citation>) {
    let mut citations: Vec<Citation> = Vec::new();
    let mut by_url: HashMap<&str, usize> = HashMap::new();

    let resolved = MARKER_RE.replace_all(body, |caps: &regex::Captures| {
        let source = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| sources.get(i));
        let Some(source) = source else {
            return String::new();
        };
        let id = *by_url.entry(source.url.as_str()).or_insert_with(|| {
            let id = citations.len() + 1;
            citations.push(Citation {
                id,
                url: source.url.clone(),
                title: source.title.clone(),
                accessed: accessed.to_string(),
            });
            id
        });
        format!("[^{id}]")
    });

    (resolved.into_owned(), citations)
}

/// Remove every `[@N]` marker.
pub fn strip_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "").into_owned()
}

/// Remove footnote definitions and every footnote reference whose label is
/// not in `keep`. Model text never gets to define footnotes of its own.
pub fn strip_footnotes(text: &str, keep: &BTreeSet<String>) -> String {
    let without_definitions = ANY_DEFINITION_LINE_RE.replace_all(text, "");
    ANY_FOOTNOTE_RE
        .replace_all(&without_definitions, |caps: &regex::Captures| {
            if keep.contains(&caps[1]) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Render the references section, or an empty string when nothing was cited.
pub fn render_bibliography(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = citations
        .iter()
        .map(|c| {
            let title = if c.title.trim().is_empty() {
                c.url.as_str()
            } else {
                c.title.trim()
            };
            format!(
                "[^{}]: [{}]({}) (accessed {})",
                c.id,
                escape_link_text(title),
                c.url,
                c.accessed
            )
        })
        .collect();
    format!("## {REFERENCES_HEADING}\n\n{}\n", entries.join("\n"))
}

fn escape_link_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

/// Split a body at its references heading into `(main, references)`.
pub fn split_references(body: &str) -> (String, Option<String>) {
    match REFERENCES_RE.find(body) {
        Some(m) => (
            body[..m.start()].trim_end().to_string(),
            Some(body[m.start()..].trim().to_string()),
        ),
        None => (body.trim_end().to_string(), None),
    }
}

fn references_and_definitions(text: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let definitions: BTreeSet<String> = DEFINITION_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    let references: BTreeSet<String> = FOOTNOTE_RE
        .captures_iter(text)
        .filter(|c| c.get(2).is_none())
        .map(|c| c[1].to_string())
        .collect();
    (references, definitions)
}

/// Footnote labels referenced (not defined) in `text`.
pub fn footnote_references(text: &str) -> BTreeSet<String> {
    references_and_definitions(text).0
}

/// Every footnote reference has exactly one definition and every definition
/// is referenced.
pub fn check_invariant(text: &str) -> Result<()> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let duplicated: BTreeSet<&str> = DEFINITION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|label| !seen.insert(*label))
        .collect();
    if !duplicated.is_empty() {
        return Err(PencraftError::validation(format!(
            "citation mismatch: defined more than once {duplicated:?}"
        )));
    }
    let (references, definitions) = references_and_definitions(text);
    let undefined: Vec<&String> = references.difference(&definitions).collect();
    let orphaned: Vec<&String> = definitions.difference(&references).collect();
    if undefined.is_empty() && orphaned.is_empty() {
        return Ok(());
    }
    Err(PencraftError::validation(format!(
        "citation mismatch: undefined {undefined:?}, unreferenced {orphaned:?}"
    )))
}

/// Drop footnote references without a definition, definitions nobody
/// references and repeated definitions of a label (the first one wins).
pub fn repair_citations(main: &str, references: Option<&str>) -> (String, Option<String>) {
    let combined = format!("{main}\n\n{}", references.unwrap_or_default());
    let (refs, defs) = references_and_definitions(&combined);

    let main = FOOTNOTE_RE
        .replace_all(main, |caps: &regex::Captures| {
            if caps.get(2).is_none() && !defs.contains(&caps[1]) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();

    let references = references.and_then(|block| {
        let mut defined: BTreeSet<String> = BTreeSet::new();
        let kept: Vec<&str> = block
            .lines()
            .filter(|line| match DEFINITION_RE.captures(line) {
                Some(c) => refs.contains(&c[1]) && defined.insert(c[1].to_string()),
                None => true,
            })
            .collect();
        let has_definitions = kept.iter().any(|line| DEFINITION_RE.is_match(line));
        has_definitions.then(|| kept.join("\n").trim().to_string())
    });

    (main, references)
}
