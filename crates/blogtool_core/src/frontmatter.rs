use chrono::NaiveDate;
use thiserror::Error;

pub const MARKER: &str = "---";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields coerced to booleans at parse time, whether or not the value is quoted.
const BOOL_FIELDS: &[&str] = &["draft", "publish"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header line has no `:` separator: {line:?}")]
    Structural { line: String },
    #[error("date is not YYYY-MM-DD: {value:?}")]
    DateFormat { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar { value: String, quoted: bool },
    Bool(bool),
    List(Vec<String>),
}

impl FieldValue {
    pub fn bare(value: impl Into<String>) -> Self {
        Self::Scalar {
            value: value.into(),
            quoted: false,
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Self::Scalar {
            value: value.into(),
            quoted: true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Scalar { value, quoted } => {
                if *quoted {
                    format!("\"{value}\"")
                } else {
                    value.clone()
                }
            }
            Self::Bool(value) => value.to_string(),
            Self::List(items) => {
                let quoted = items
                    .iter()
                    .map(|item| format!("\"{item}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{quoted}]")
            }
        }
    }
}

/// Order-preserving front-matter mapping. Keys are unique; setting an
/// existing key overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    fields: Vec<(String, FieldValue)>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn set(&mut self, key: &str, value: FieldValue) {
        if let Some(entry) = self.fields.iter_mut().find(|(name, _)| name == key) {
            entry.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: FieldValue) {
        self.set(&key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Parse a first-cell source into front matter. Returns `None` when the
/// trimmed text does not form a marker-delimited block at all; a block that
/// is present but malformed is an error the caller should report per
/// document.
pub fn parse(source: &str) -> Result<Option<FrontMatter>, HeaderError> {
    let trimmed = source.trim();
    let lines: Vec<&str> = trimmed.split('\n').collect();
    if lines.len() < 2
        || lines.first().map(|line| line.trim()) != Some(MARKER)
        || lines.last().map(|line| line.trim()) != Some(MARKER)
    {
        return Ok(None);
    }

    let mut front_matter = FrontMatter::default();
    for line in &lines[1..lines.len() - 1] {
        let Some((raw_key, raw_value)) = line.split_once(':') else {
            return Err(HeaderError::Structural {
                line: (*line).to_string(),
            });
        };
        let key = raw_key.trim();
        let value = parse_value(key, raw_value.trim());
        // Duplicate keys: last write wins, first occurrence keeps its slot.
        front_matter.set(key, value);
    }
    Ok(Some(front_matter))
}

fn parse_value(key: &str, raw: &str) -> FieldValue {
    let (unquoted, quoted) = strip_quotes(raw);
    if BOOL_FIELDS.contains(&key) {
        return FieldValue::Bool(unquoted.eq_ignore_ascii_case("true"));
    }
    if !quoted && unquoted.starts_with('[') && unquoted.ends_with(']') {
        return FieldValue::List(parse_list(&unquoted));
    }
    FieldValue::Scalar {
        value: unquoted,
        quoted,
    }
}

fn strip_quotes(raw: &str) -> (String, bool) {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        (raw[1..raw.len() - 1].to_string(), true)
    } else {
        (raw.to_string(), false)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw[1..raw.len() - 1]
        .split(',')
        .map(|item| strip_quotes(item.trim()).0)
        .filter(|item| !item.is_empty())
        .collect()
}

/// Re-emit the delimited block. Scalars keep the quoting they were read
/// with, booleans are bare tokens, lists are bracketed arrays.
pub fn serialize(front_matter: &FrontMatter) -> String {
    let mut lines = vec![MARKER.to_string()];
    for (key, value) in front_matter.iter() {
        lines.push(format!("{key}: {}", value.render()));
    }
    lines.push(MARKER.to_string());
    lines.join("\n")
}

/// Date-driven draft policy. A future-dated post is forced back to draft no
/// matter what; a past or current post is published only when `publish` says
/// so. Without a `date` field nothing changes.
pub fn apply_draft_policy(
    front_matter: &mut FrontMatter,
    today: NaiveDate,
) -> Result<(), HeaderError> {
    let Some(date_field) = front_matter.get("date") else {
        return Ok(());
    };
    let raw = date_field
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| date_field.render());
    let post_date =
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|_| HeaderError::DateFormat {
            value: raw.clone(),
        })?;

    if post_date > today {
        front_matter.set("draft", FieldValue::Bool(true));
    } else if front_matter.get("publish").and_then(FieldValue::as_bool) == Some(true) {
        front_matter.set("draft", FieldValue::Bool(false));
    }
    Ok(())
}

/// Point the `image` field at `image_path`. An existing field is overwritten
/// in place; a missing one is inserted as the second-to-last field, or
/// appended when the header has no fields yet.
pub fn ensure_image_field(front_matter: &mut FrontMatter, image_path: &str) {
    let value = FieldValue::quoted(image_path);
    if front_matter.get("image").is_some() {
        front_matter.set("image", value);
        return;
    }
    if front_matter.fields.is_empty() {
        front_matter.fields.push(("image".to_string(), value));
        return;
    }
    let slot = front_matter.fields.len() - 1;
    front_matter.fields.insert(slot, ("image".to_string(), value));
}

/// Skip gate for card generation: true iff an `image` field exists with a
/// non-empty value.
pub fn has_nonempty_image(front_matter: &FrontMatter) -> bool {
    match front_matter.get("image") {
        Some(FieldValue::Scalar { value, .. }) => !value.trim().is_empty(),
        Some(FieldValue::List(items)) => !items.is_empty(),
        Some(FieldValue::Bool(_)) => true,
        None => false,
    }
}
