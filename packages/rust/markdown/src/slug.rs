//! Slug and kebab-case helpers for file names and tags.

/// Maximum length of a file-name slug.
const MAX_SLUG_LEN: usize = 80;

/// Lowercase ASCII alphanumerics joined by single dashes.
///
/// `"Async Rust: A Guide!"` → `"async-rust-a-guide"`
pub fn kebab_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// File-name slug for a title, cut at a dash boundary. Never empty.
pub fn slugify(title: &str) -> String {
    let mut slug = kebab_case(title);
    if slug.len() > MAX_SLUG_LEN {
        let cut = slug[..MAX_SLUG_LEN].rfind('-').unwrap_or(MAX_SLUG_LEN);
        slug.truncate(cut);
    }
    if slug.is_empty() {
        slug.push_str("untitled");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_collapses_separators() {
        assert_eq!(kebab_case("Async Rust: A Guide!"), "async-rust-a-guide");
        assert_eq!(kebab_case("  --MCP   vs  Function_Calling-- "), "mcp-vs-function-calling");
        assert_eq!(kebab_case("Ünïcode only"), "n-code-only");
    }

    #[test]
    fn slug_truncates_on_word_boundary() {
        let title = "word ".repeat(40);
        let slug = slugify(&title);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.ends_with("word"));
    }

    #[test]
    fn slug_never_empty() {
        assert_eq!(slugify("!!!"), "untitled");
    }
}
