//! Table of contents for an article body.
//!
//! Built from the body's H2 sections and placed between the preamble and the
//! first section. Anchors follow the GitHub heading-id scheme, so the links
//! work on most static-site renderers.

use std::collections::HashMap;

use tracing::debug;

use crate::sections::{Section, SplitBody, join_sections, split_sections};

/// Heading of the generated table of contents.
pub const TOC_HEADING: &str = "Table of Contents";

/// Anchor id for a heading: lowercase, spaces to dashes, punctuation dropped.
///
/// `"Error Handling & Retries"` → `"error-handling--retries"`
pub fn heading_anchor(heading: &str) -> String {
    heading
        .trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            '-' | '_' => Some(c),
            c if c.is_alphanumeric() => Some(c),
            _ => None,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

/// Bullet list linking every section, or `None` for a body without sections.
///
/// Repeated headings get `-1`, `-2`... suffixes like their rendered ids.
pub fn render_toc(sections: &[Section]) -> Option<String> {
    if sections.is_empty() {
        return None;
    }
    let mut used: HashMap<String, usize> = HashMap::new();
    let entries: Vec<String> = sections
        .iter()
        .map(|section| {
            let base = heading_anchor(&section.heading);
            let seen = used.entry(base.clone()).or_insert(0);
            let anchor = if *seen == 0 {
                base
            } else {
                format!("{base}-{seen}")
            };
            *seen += 1;
            format!("- [{}](#{anchor})", escape_link_text(section.heading.trim()))
        })
        .collect();
    Some(entries.join("\n"))
}

pub fn is_toc_heading(heading: &str) -> bool {
    let heading = heading.trim();
    heading.eq_ignore_ascii_case(TOC_HEADING) || heading.eq_ignore_ascii_case("Contents")
}

/// Remove a table-of-contents section; `true` if one was present.
pub fn remove_toc(split: &mut SplitBody) -> bool {
    let before = split.sections.len();
    split.sections.retain(|s| !is_toc_heading(&s.heading));
    split.sections.len() != before
}

/// Body with a fresh table of contents after the preamble.
///
/// An existing one is replaced. A body without H2 sections is returned as is.
pub fn insert_toc(body: &str) -> String {
    let mut split = split_sections(body);
    remove_toc(&mut split);
    let Some(toc) = render_toc(&split.sections) else {
        return body.to_string();
    };
    debug!(entries = split.sections.len(), "table of contents inserted");
    let mut sections = Vec::with_capacity(split.sections.len() + 1);
    sections.push(Section::new(TOC_HEADING, toc));
    sections.extend(split.sections);
    join_sections(&split.preamble, &sections)
}
