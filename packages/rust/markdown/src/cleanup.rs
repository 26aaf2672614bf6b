//! Cleanup passes for Markdown text.
//!
//! Each pass is a function `&str -> String` applied in sequence. Scraped pages
//! go through [`run_pipeline`]; model output for one article section goes
//! through [`clean_generated`].

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the scraped-page cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = demote_extra_h1(md);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);
    ensure_trailing_newline(&result)
}

/// Normalize the text a model produced for one section body.
///
/// The result never contains H1/H2 headings, so splicing it under a `## `
/// heading cannot change the article's section structure.
pub fn clean_generated(text: &str) -> String {
    let mut result = drop_preamble(text.trim());
    result = unwrap_fence(result.trim());
    result = drop_leading_headings(&result);
    result = demote_section_headings(&result);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);
    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

/// Keep the first H1 and demote any later ones to H2.
fn demote_extra_h1(md: &str) -> String {
    let mut seen_h1 = false;
    map_prose_lines(md, |line| match HEADING_RE.captures(line) {
        Some(caps) if &caps[1] == "#" => {
            if seen_h1 {
                format!("## {}", &caps[2])
            } else {
                seen_h1 = true;
                line.to_string()
            }
        }
        _ => line.to_string(),
    })
}

/// Rewrite H1/H2 headings as H3.
fn demote_section_headings(md: &str) -> String {
    map_prose_lines(md, |line| match HEADING_RE.captures(line) {
        Some(caps) if caps[1].len() <= 2 => format!("### {}", &caps[2]),
        _ => line.to_string(),
    })
}

/// Remove headings (and blank lines) before the first paragraph.
fn drop_leading_headings(md: &str) -> String {
    md.lines()
        .skip_while(|line| line.trim().is_empty() || HEADING_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Model chatter
// ---------------------------------------------------------------------------

/// Unwrap a response that is a single fenced block (```markdown ... ```).
fn unwrap_fence(text: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```(?:markdown|md)?\s*\n(.*?)\n```$").expect("valid regex")
    });

    match FENCE_RE.captures(text) {
        Some(caps) if !caps[1].contains("```") => caps[1].to_string(),
        _ => text.to_string(),
    }
}

/// Drop a conversational first line such as "Sure, here is the section:".
fn drop_preamble(text: &str) -> String {
    static PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(sure|certainly|of course|here is|here's)\b.*:\s*$").expect("valid regex")
    });

    let mut lines = text.lines();
    match lines.next() {
        Some(first) if PREAMBLE_RE.is_match(first.trim()) => lines.collect::<Vec<_>>().join("\n"),
        _ => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Scraped-page passes
// ---------------------------------------------------------------------------

/// Remove container tags that survived conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    map_prose_lines(md, |line| TAG_RE.replace_all(line, "").into_owned())
}

/// Resolve relative link targets against the page URL. Images and anchors are left alone.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
            let is_absolute = href.contains("://") || href.starts_with("mailto:");
            if !bang.is_empty() || is_absolute || href.starts_with('#') {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of blank lines to a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    BLANKS_RE.replace_all(md, "\n\n").into_owned()
}

fn ensure_trailing_newline(md: &str) -> String {
    format!("{}\n", md.trim_end_matches('\n'))
}

/// Apply `f` to every line outside fenced code blocks.
fn map_prose_lines(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut in_code = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                line.to_string()
            } else if in_code {
                line.to_string()
            } else {
                f(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
