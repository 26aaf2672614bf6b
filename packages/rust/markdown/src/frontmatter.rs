//! Front-matter parsing and serialization.
//!
//! Supports YAML headers delimited by `---` and TOML headers delimited by
//! `+++`. Keys outside the managed set survive a parse/render cycle through
//! [`FrontMatter::extra`].

use pencraft_shared::{FrontMatter, FrontMatterFormat, PencraftError, Result};

const YAML_DELIMITER: &str = "---";
const TOML_DELIMITER: &str = "+++";

/// A Markdown document split into its header and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub front_matter: FrontMatter,
    /// Header format found in the source (YAML when there was none).
    pub format: FrontMatterFormat,
    /// Whether the source had a header at all.
    pub has_front_matter: bool,
    pub body: String,
}

/// Split a document into front matter and body.
pub fn parse_document(text: &str) -> Result<Document> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let Some((format, header, body)) = split_header(text) else {
        return Ok(Document {
            front_matter: FrontMatter::default(),
            format: FrontMatterFormat::Yaml,
            has_front_matter: false,
            body: text.to_string(),
        });
    };

    let front_matter = match format {
        FrontMatterFormat::Yaml => parse_yaml(header)?,
        FrontMatterFormat::Toml => parse_toml(header)?,
    };

    Ok(Document {
        front_matter: normalize(front_matter),
        format,
        has_front_matter: true,
        body: body.trim_start_matches(['\r', '\n']).to_string(),
    })
}

/// Serialize front matter and body into one document.
pub fn render_document(
    front_matter: &FrontMatter,
    format: FrontMatterFormat,
    body: &str,
) -> Result<String> {
    let (delimiter, header) = match format {
        FrontMatterFormat::Yaml => (YAML_DELIMITER, render_yaml(front_matter)?),
        FrontMatterFormat::Toml => (TOML_DELIMITER, render_toml(front_matter)?),
    };
    let body = body.trim_matches('\n');
    Ok(format!(
        "{delimiter}\n{}\n{delimiter}\n\n{body}\n",
        header.trim_end()
    ))
}

// ---------------------------------------------------------------------------
// Header detection
// ---------------------------------------------------------------------------

/// Returns `(format, header, body)` when the text opens with a delimited header.
fn split_header(text: &str) -> Option<(FrontMatterFormat, &str, &str)> {
    let first_line_end = text.find('\n')?;
    let format = match text[..first_line_end].trim_end() {
        YAML_DELIMITER => FrontMatterFormat::Yaml,
        TOML_DELIMITER => FrontMatterFormat::Toml,
        _ => return None,
    };
    let delimiter = match format {
        FrontMatterFormat::Yaml => YAML_DELIMITER,
        FrontMatterFormat::Toml => TOML_DELIMITER,
    };

    let rest = &text[first_line_end + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == delimiter {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((format, header, body));
        }
        offset += line.len();
    }
    None
}

// ---------------------------------------------------------------------------
// YAML
// ---------------------------------------------------------------------------

fn parse_yaml(header: &str) -> Result<FrontMatter> {
    if header.trim().is_empty() {
        return Ok(FrontMatter::default());
    }
    serde_yaml::from_str(header)
        .map_err(|e| PencraftError::parse(format!("invalid YAML front matter: {e}")))
}

fn render_yaml(front_matter: &FrontMatter) -> Result<String> {
    serde_yaml::to_string(front_matter)
        .map_err(|e| PencraftError::parse(format!("failed to serialize front matter: {e}")))
}

// ---------------------------------------------------------------------------
// TOML
// ---------------------------------------------------------------------------

fn parse_toml(header: &str) -> Result<FrontMatter> {
    let table: toml::Table = toml::from_str(header)
        .map_err(|e| PencraftError::parse(format!("invalid TOML front matter: {e}")))?;
    let json = toml_to_json(toml::Value::Table(table));
    serde_json::from_value(json)
        .map_err(|e| PencraftError::parse(format!("unexpected front matter shape: {e}")))
}

fn render_toml(front_matter: &FrontMatter) -> Result<String> {
    let json = serde_json::to_value(front_matter)
        .map_err(|e| PencraftError::parse(format!("failed to serialize front matter: {e}")))?;
    let Some(toml::Value::Table(table)) = json_to_toml(json) else {
        return Err(PencraftError::parse("front matter is not a table"));
    };
    toml::to_string(&table)
        .map_err(|e| PencraftError::parse(format!("failed to serialize front matter: {e}")))
}

/// TOML datetimes become strings; everything else maps structurally.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        toml::Value::String(s) => J::String(s),
        toml::Value::Integer(i) => J::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(J::Null, J::Number),
        toml::Value::Boolean(b) => J::Bool(b),
        toml::Value::Datetime(dt) => J::String(dt.to_string()),
        toml::Value::Array(items) => J::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => J::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// TOML has no null; null values are dropped.
fn json_to_toml(value: serde_json::Value) -> Option<toml::Value> {
    use serde_json::Value as J;
    Some(match value {
        J::Null => return None,
        J::Bool(b) => toml::Value::Boolean(b),
        J::Number(n) => match n.as_i64() {
            Some(i) => toml::Value::Integer(i),
            None => toml::Value::Float(n.as_f64()?),
        },
        J::String(s) => toml::Value::String(s),
        J::Array(items) => toml::Value::Array(items.into_iter().filter_map(json_to_toml).collect()),
        J::Object(map) => toml::Value::Table(
            map.into_iter()
                .filter_map(|(k, v)| json_to_toml(v).map(|v| (k, v)))
                .collect(),
        ),
    })
}

/// Empty optional strings are treated as absent.
fn normalize(mut fm: FrontMatter) -> FrontMatter {
    for field in [&mut fm.author, &mut fm.cover_image, &mut fm.description] {
        if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
            *field = None;
        }
    }
    fm
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
