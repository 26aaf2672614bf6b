//! Prompt templates sent to the completion port.
//!
//! Templates are a closed set. [`render`] substitutes `{name}` placeholders
//! and rejects missing or unknown parameters, so prompt text is data rather
//! than code assembled ad hoc at each call site.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use pencraft_shared::{PencraftError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    PlanOutline,
    WriteSection,
    ExpandSection,
    MetaDescription,
    SuggestTags,
    AnalyzeContent,
    EnhanceSection,
}

impl TemplateId {
    pub const ALL: [TemplateId; 7] = [
        Self::PlanOutline,
        Self::WriteSection,
        Self::ExpandSection,
        Self::MetaDescription,
        Self::SuggestTags,
        Self::AnalyzeContent,
        Self::EnhanceSection,
    ];

    fn text(self) -> &'static str {
        match self {
            Self::PlanOutline => PLAN_OUTLINE,
            Self::WriteSection => WRITE_SECTION,
            Self::ExpandSection => EXPAND_SECTION,
            Self::MetaDescription => META_DESCRIPTION,
            Self::SuggestTags => SUGGEST_TAGS,
            Self::AnalyzeContent => ANALYZE_CONTENT,
            Self::EnhanceSection => ENHANCE_SECTION,
        }
    }

    /// Names of the parameters the template requires.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Self::PlanOutline => &[
                "topic",
                "target_words",
                "section_count",
                "research",
                "additional_context",
            ],
            Self::WriteSection => &[
                "topic",
                "article_title",
                "section_title",
                "section_role",
                "target_words",
                "key_points",
                "sources",
                "outline",
                "additional_context",
            ],
            Self::ExpandSection => &[
                "topic",
                "section_title",
                "current_text",
                "additional_words",
                "sources",
                "keywords",
            ],
            Self::MetaDescription => &["title", "summary", "keywords"],
            Self::SuggestTags => &[
                "title",
                "topics",
                "rising_keywords",
                "current_tags",
                "current_categories",
            ],
            Self::AnalyzeContent => &[
                "title",
                "word_count",
                "target_words",
                "content",
                "trends",
            ],
            Self::EnhanceSection => &[
                "title",
                "section_title",
                "current_text",
                "current_words",
                "target_words",
                "issues",
                "keywords",
            ],
        }
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"));

/// Render a template with the given `(name, value)` parameters.
///
/// Every parameter the template declares must be supplied exactly once and
/// no other parameter is accepted. Values are inserted verbatim and are not
/// themselves scanned for placeholders.
pub fn render(id: TemplateId, params: &[(&str, &str)]) -> Result<String> {
    let required: BTreeSet<&str> = id.params().iter().copied().collect();
    let mut supplied: BTreeSet<&str> = BTreeSet::new();

    for (name, _) in params {
        if !required.contains(name) {
            return Err(PencraftError::validation(format!(
                "unknown parameter '{name}' for template {id:?}"
            )));
        }
        if !supplied.insert(name) {
            return Err(PencraftError::validation(format!(
                "parameter '{name}' supplied twice for template {id:?}"
            )));
        }
    }
    if let Some(missing) = required.difference(&supplied).next() {
        return Err(PencraftError::validation(format!(
            "missing parameter '{missing}' for template {id:?}"
        )));
    }

    let template = expand_style(id.text());
    let rendered = PLACEHOLDER_RE.replace_all(&template, |caps: &regex::Captures| {
        let name = &caps[1];
        params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| (*v).to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });
    Ok(rendered.into_owned())
}

/// Parse the first JSON object in a model answer, tolerating code fences
/// and chatter around it.
pub fn parse_json_answer<T: DeserializeOwned>(answer: &str) -> Result<T> {
    let start = answer.find('{');
    let end = answer.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &answer[start..=end],
        _ => return Err(PencraftError::parse("no JSON object in model answer")),
    };
    serde_json::from_str(json)
        .map_err(|e| PencraftError::parse(format!("malformed JSON in model answer: {e}")))
}

// ---------------------------------------------------------------------------
// Template text
// ---------------------------------------------------------------------------

const STYLE_GUIDELINES: &str = "Style guidelines:
- Start directly with value. No \"In today's fast-paced world\" openers.
- Use \"we\" and \"I\" for a personal, authoritative tone.
- Include specific numbers, benchmarks, or data where possible.
- Keep paragraphs to 3-4 sentences.
- Use H3 subheadings and code examples with proper fencing where they help.
- End with an actionable takeaway.
- Never write meta-commentary about the article itself, and never write \"In conclusion\".";

const PLAN_OUTLINE: &str = "You are planning a long-form technical blog post.

Topic: {topic}
Target length: about {target_words} words.
Additional instructions: {additional_context}

Research findings:
{research}

Propose exactly {section_count} body sections. The introduction, future outlook and conclusion are added separately, so do not include them.
Each section needs a specific, descriptive title and 2-4 key points drawn from the research where possible.

Return ONLY a JSON object of this shape:
{\"title\": \"Article title\", \"sections\": [{\"title\": \"Section title\", \"key_points\": [\"point\", \"point\"]}]}";

const WRITE_SECTION: &str = "You are writing one section of a technical blog post.

Article topic: {topic}
Article title: {article_title}
Full outline: {outline}

Section to write: {section_title}
Role of this section: {section_role}
Target length: about {target_words} words.
Key points to cover:
{key_points}

Additional instructions: {additional_context}

Numbered sources you may cite:
{sources}

When a factual claim comes from a source, cite it inline as [@N] using the source number. Do not invent sources.

STYLE

Return ONLY the section body in Markdown. Do not repeat the section title and do not use H1 or H2 headings.";

const EXPAND_SECTION: &str = "The following section of a blog post about {topic} is too short.

Section: {section_title}
Current text:
{current_text}

Write about {additional_words} more words that continue this section. Add depth, concrete examples and practical detail; do not repeat what is already written.
Where natural, work in these keywords: {keywords}

Numbered sources you may cite inline as [@N]:
{sources}

Return ONLY the additional text in Markdown, without headings above H3.";

const META_DESCRIPTION: &str = "Generate an SEO-optimized meta description for this blog post.

Title: {title}
Content summary: {summary}
Primary keywords: {keywords}

Requirements:
- 150-160 characters maximum
- Include the primary keyword near the beginning
- Be compelling and encourage clicks
- No quotes or special characters that break HTML

Return ONLY the meta description text, nothing else.";

const SUGGEST_TAGS: &str = "Suggest optimized tags and categories for this blog post.

Title: {title}
Content topics: {topics}
Rising trend keywords: {rising_keywords}
Current tags: {current_tags}
Current categories: {current_categories}

Focus on high-search-volume, specific technical terms (not generic words like \"technology\"), rising keywords, and keep existing good tags.

Return ONLY a JSON object with 5-8 kebab-case tags and 1-3 categories:
{\"tags\": [\"tag-one\", \"tag-two\"], \"categories\": [\"Category\"]}";

const ANALYZE_CONTENT: &str = "Analyze this existing blog post and identify improvement opportunities.

Title: {title}
Current word count: {word_count}
Target word count: {target_words}

Trend data:
{trends}

Content:
{content}

Give a short, specific analysis under these headings: SEO Analysis, Content Analysis, Quality Issues, Front Matter Issues.
Name thin sections, missing topics from the trend data, claims needing citations and LLM artifacts to remove. Be actionable.";

const ENHANCE_SECTION: &str = "You are enhancing one section of an existing blog post titled \"{title}\".

Section: {section_title}
Current text ({current_words} words):
{current_text}

Rewrite and expand this section to about {target_words} words.
- Keep the author's voice, existing good content and all working code examples.
- Address these issues: {issues}
- Naturally integrate these keywords: {keywords}
- Keep any existing footnote references like [^1] exactly as they are and do not add new ones.
- Where it fits, mention enterprise concerns such as production deployment, security, scalability or cost.

STYLE

Return ONLY the new section body in Markdown. Do not repeat the section title and do not use H1 or H2 headings.";

/// Templates reference the shared style block through this marker.
const STYLE_MARKER: &str = "STYLE";

/// Full template text with the style block expanded.
fn expand_style(text: &'static str) -> String {
    text.replace(STYLE_MARKER, STYLE_GUIDELINES)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
