//! H2 section splitting and joining.

use crate::count_words;

/// One `## ` delimited section of an article body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    /// Section text without the heading line, trimmed.
    pub body: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        count_words(&self.body)
    }
}

/// A body split at its H2 headings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitBody {
    /// Text before the first H2 (often an H1 title or lead paragraph).
    pub preamble: String,
    pub sections: Vec<Section>,
}

/// Split a Markdown body at `## ` headings. Headings inside fenced code are ignored.
pub fn split_sections(body: &str) -> SplitBody {
    let mut split = SplitBody::default();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut preamble: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        let heading = (!in_code)
            .then(|| line.strip_prefix("## "))
            .flatten()
            .map(str::trim);

        if let Some(title) = heading {
            if let Some((heading, lines)) = current.take() {
                split.sections.push(Section::new(heading, lines.join("\n").trim()));
            }
            current = Some((title.to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        } else {
            preamble.push(line);
        }
    }

    if let Some((heading, lines)) = current {
        split.sections.push(Section::new(heading, lines.join("\n").trim()));
    }
    split.preamble = preamble.join("\n").trim().to_string();
    split
}

/// Join a preamble and sections back into a body ending in one newline.
pub fn join_sections(preamble: &str, sections: &[Section]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(sections.len() + 1);
    if !preamble.trim().is_empty() {
        parts.push(preamble.trim().to_string());
    }
    for section in sections {
        let body = section.body.trim();
        if body.is_empty() {
            parts.push(format!("## {}", section.heading));
        } else {
            parts.push(format!("## {}\n\n{body}", section.heading));
        }
    }
    format!("{}\n", parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_preamble_and_sections() {
        let body = "# Title\n\nLead.\n\n## One\n\nFirst.\n\n### Sub\n\nNested.\n\n## Two\nSecond.\n";
        let split = split_sections(body);
        assert_eq!(split.preamble, "# Title\n\nLead.");
        assert_eq!(split.sections.len(), 2);
        assert_eq!(split.sections[0].heading, "One");
        assert_eq!(split.sections[0].body, "First.\n\n### Sub\n\nNested.");
        assert_eq!(split.sections[1], Section::new("Two", "Second."));
    }

    #[test]
    fn ignores_headings_in_code() {
        let body = "## Real\n\n```md\n## Fake\n```\n";
        let split = split_sections(body);
        assert_eq!(split.sections.len(), 1);
        assert!(split.sections[0].body.contains("## Fake"));
    }

    #[test]
    fn join_then_split_is_stable() {
        let sections = vec![Section::new("A", "Alpha text."), Section::new("B", "Beta text.")];
        let joined = join_sections("Lead.", &sections);
        assert_eq!(joined, "Lead.\n\n## A\n\nAlpha text.\n\n## B\n\nBeta text.\n");
        let split = split_sections(&joined);
        assert_eq!(split.preamble, "Lead.");
        assert_eq!(split.sections, sections);
    }
}
