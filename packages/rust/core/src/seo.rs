//! Meta description and tag/category synthesis shared by both pipelines.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, warn};

use pencraft_markdown::kebab_case;

use crate::capabilities::Capabilities;
use crate::prompts::{self, TemplateId};

pub const MAX_DESCRIPTION_CHARS: usize = 160;
pub const MIN_TAGS: usize = 5;
pub const MAX_TAGS: usize = 8;
pub const MAX_CATEGORIES: usize = 3;
pub const FALLBACK_CATEGORY: &str = "Technology";

/// Filler used only when topic words cannot reach the minimum tag count.
const GENERIC_TAGS: &[&str] = &[
    "software-engineering",
    "programming",
    "best-practices",
    "tutorial",
    "developer-tools",
];

/// Words of leading prose fed to the description prompt.
const SUMMARY_WORDS: usize = 120;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TagSuggestion {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// First words of prose in a Markdown body, skipping headings, code and comments.
pub fn summarize(body: &str, max_words: usize) -> String {
    let mut words: Vec<&str> = Vec::new();
    let mut in_code = false;
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code || trimmed.starts_with('#') || trimmed.starts_with("<!--") || trimmed.starts_with("[^") {
            continue;
        }
        words.extend(trimmed.split_whitespace());
        if words.len() >= max_words {
            break;
        }
    }
    words.truncate(max_words);
    words.join(" ")
}

/// Cut to at most `max` characters at a word boundary.
pub fn cap_description(text: &str, max: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max {
        return text;
    }
    let cut = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];
    let head = match head.rfind(' ') {
        Some(pos) if pos > 0 => &head[..pos],
        _ => head,
    };
    head.trim_end_matches([',', ';', ':', '-', ' ']).to_string()
}

fn sanitize_description(answer: &str) -> String {
    let line = answer
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .trim_matches(['"', '\''])
        .trim();
    let line = line
        .strip_prefix("Meta description:")
        .or_else(|| line.strip_prefix("Description:"))
        .unwrap_or(line);
    let cleaned: String = line.chars().filter(|c| !matches!(c, '"' | '<' | '>')).collect();
    cap_description(cleaned.trim().trim_matches('\''), MAX_DESCRIPTION_CHARS)
}

/// Meta description of at most 160 characters.
///
/// Falls back to the opening prose of the body when the model is unavailable
/// or answers with nothing usable.
pub async fn meta_description(
    caps: &Capabilities,
    title: &str,
    body: &str,
    keywords: &[String],
) -> String {
    let summary = summarize(body, SUMMARY_WORDS);
    let fallback = || cap_description(&summary, MAX_DESCRIPTION_CHARS);
    let keywords = if keywords.is_empty() {
        title.to_string()
    } else {
        keywords.join(", ")
    };

    let prompt = match prompts::render(
        TemplateId::MetaDescription,
        &[("title", title), ("summary", &summary), ("keywords", &keywords)],
    ) {
        Ok(prompt) => prompt,
        Err(e) => {
            warn!(error = %e, "description prompt failed to render");
            return fallback();
        }
    };
    match caps.complete_with(&prompt, 200).await {
        Ok(answer) => {
            let description = sanitize_description(&answer);
            if description.is_empty() {
                fallback()
            } else {
                description
            }
        }
        Err(e) => {
            warn!(error = %e, "description generation failed, using opening text");
            fallback()
        }
    }
}

/// Ask the model for tags and categories. `None` on any failure.
pub async fn suggest_taxonomy(
    caps: &Capabilities,
    title: &str,
    topics: &[String],
    rising: &[&str],
    current_tags: &[String],
    current_categories: &[String],
) -> Option<TagSuggestion> {
    let or_none = |s: String| if s.is_empty() { "none".to_string() } else { s };
    let prompt = prompts::render(
        TemplateId::SuggestTags,
        &[
            ("title", title),
            ("topics", &or_none(topics.join(", "))),
            ("rising_keywords", &or_none(rising.join(", "))),
            ("current_tags", &or_none(current_tags.join(", "))),
            ("current_categories", &or_none(current_categories.join(", "))),
        ],
    )
    .ok()?;
    let answer = caps.complete_with(&prompt, 300).await;
    match answer.and_then(|a| prompts::parse_json_answer::<TagSuggestion>(&a)) {
        Ok(suggestion) => {
            debug!(tags = suggestion.tags.len(), categories = suggestion.categories.len(), "taxonomy suggested");
            Some(suggestion)
        }
        Err(e) => {
            warn!(error = %e, "tag suggestion unavailable");
            None
        }
    }
}

/// Everything that feeds the final tag and category lists.
#[derive(Debug, Clone, Copy)]
pub struct TaxonomyInputs<'a> {
    pub caller_tags: &'a [String],
    pub caller_categories: &'a [String],
    pub suggested: Option<&'a TagSuggestion>,
    pub rising: &'a [&'a str],
    /// Used to pad tags when the other sources come up short.
    pub topic: &'a str,
    /// Apply suggestion sources and enforce the 5-8 / 1-3 bounds.
    pub suggest: bool,
}

/// Merge caller, suggested and trend tags into deduplicated kebab-case lists.
///
/// Order is caller first, then suggestions, then rising keywords, so the
/// result is stable for identical inputs.
pub fn merge_taxonomy(inputs: &TaxonomyInputs<'_>) -> (Vec<String>, Vec<String>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut tags: Vec<String> = Vec::new();
    let mut push_tag = |raw: &str, tags: &mut Vec<String>| {
        let tag = kebab_case(raw);
        if !tag.is_empty() && seen.insert(tag.clone()) {
            tags.push(tag);
        }
    };

    for tag in inputs.caller_tags {
        push_tag(tag, &mut tags);
    }

    let mut seen_categories: HashSet<String> = HashSet::new();
    let mut categories: Vec<String> = Vec::new();
    let mut push_category = |raw: &str, categories: &mut Vec<String>| {
        let category = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if !category.is_empty() && seen_categories.insert(category.to_lowercase()) {
            categories.push(category);
        }
    };
    for category in inputs.caller_categories {
        push_category(category, &mut categories);
    }

    if !inputs.suggest {
        return (tags, categories);
    }

    if let Some(suggested) = inputs.suggested {
        for tag in &suggested.tags {
            push_tag(tag, &mut tags);
        }
        for category in &suggested.categories {
            push_category(category, &mut categories);
        }
    }
    for keyword in inputs.rising {
        push_tag(keyword, &mut tags);
    }

    if tags.len() < MIN_TAGS {
        push_tag(inputs.topic, &mut tags);
        for word in crate::research::topic_keywords(inputs.topic) {
            push_tag(&word, &mut tags);
        }
    }
    for generic in GENERIC_TAGS {
        if tags.len() >= MIN_TAGS {
            break;
        }
        push_tag(generic, &mut tags);
    }
    tags.truncate(MAX_TAGS);

    categories.truncate(MAX_CATEGORIES);
    if categories.is_empty() {
        categories.push(FALLBACK_CATEGORY.to_string());
    }
    (tags, categories)
}
