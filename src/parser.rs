//! Tolerant parser for the model's camera-trap answer.
//!
//! Handles the formats vision models actually produce:
//! 1. JSON object, nested objects flattened: `{"tiere": "1 Fuchs", "metadaten": {"standort": "FP2"}}`
//! 2. JSON object inside a markdown code block
//! 3. `KEY: value` lines (German or English keys), with bullet/number
//!    prefixes stripped and list continuation for animals:
//!
//! ```text
//! TIERE:
//! - 2 Gämsen
//! - 1 Fuchs
//! STANDORT: NLP FP2
//! UHRZEIT: 14:30 Uhr
//! DATUM: 2024-05-12
//! ```
//!
//! Every field is normalized: location to `FP1`/`FP2`/`FP3`/`Nische`, time to
//! `HH:MM:SS`, date to `DD.MM.YYYY`.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Value used when the model saw no animals.
pub const NO_ANIMALS: &str = "Keine erkannt";

/// Camera locations the station labels carry.
pub const KNOWN_LOCATIONS: [&str; 4] = ["FP1", "FP2", "FP3", "Nische"];

/// Structured metadata for one camera-trap image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WildlifeObservation {
    /// Comma-separated species with counts, or [`NO_ANIMALS`].
    pub animals: String,
    pub location: String,
    /// `HH:MM:SS` when recognizable, otherwise the raw text.
    pub time: String,
    /// `DD.MM.YYYY` when recognizable, otherwise the raw text.
    pub date: String,
}

impl WildlifeObservation {
    pub fn has_animals(&self) -> bool {
        self.animals != NO_ANIMALS
    }

    pub fn has_known_location(&self) -> bool {
        KNOWN_LOCATIONS.contains(&self.location.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty model response")]
    EmptyResponse,

    #[error("Model returned a placeholder result: {0}")]
    Placeholder(String),

    #[error("Could not find any field in model response: {0}")]
    Unparseable(String),
}

#[derive(Debug, Default)]
struct RawFields {
    animals: Vec<String>,
    location: String,
    time: String,
    date: String,
}

impl RawFields {
    fn is_empty(&self) -> bool {
        self.animals.iter().all(|a| a.trim().is_empty())
            && self.location.is_empty()
            && self.time.is_empty()
            && self.date.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Animals,
    Location,
    Time,
    Date,
}

impl Field {
    fn from_key(key: &str) -> Option<Self> {
        match key.trim().trim_matches('*').trim().to_lowercase().as_str() {
            "tiere" | "animals" => Some(Field::Animals),
            "standort" | "location" => Some(Field::Location),
            "uhrzeit" | "time" => Some(Field::Time),
            "datum" | "date" => Some(Field::Date),
            _ => None,
        }
    }
}

/// Parse a model answer into a [`WildlifeObservation`].
///
/// # Errors
///
/// - [`ParseError::EmptyResponse`] for blank text
/// - [`ParseError::Placeholder`] when the model echoed an error placeholder
/// - [`ParseError::Unparseable`] when no field could be found at all
pub fn parse_observation(response: &str) -> Result<WildlifeObservation, ParseError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    // Strategy 1: JSON object
    // Strategy 2: JSON object in a code block
    // Strategy 3: KEY: value lines
    let raw = fields_from_json(trimmed)
        .or_else(|| fields_from_code_block(trimmed))
        .unwrap_or_else(|| fields_from_lines(trimmed));

    if raw.is_empty() {
        return Err(ParseError::Unparseable(trimmed.to_string()));
    }

    let observation = WildlifeObservation {
        animals: normalize_animals(&raw.animals),
        location: normalize_location(&raw.location),
        time: normalize_time(&raw.time),
        date: normalize_date(&raw.date),
    };

    if is_placeholder(&observation.animals) {
        return Err(ParseError::Placeholder(observation.animals));
    }
    Ok(observation)
}

/// True for the stand-in texts a failed analysis produces.
pub fn is_placeholder(animals: &str) -> bool {
    let lower = animals.trim().to_lowercase();
    ["error in analysis", "analysis error", "fehler bei analyse", "placeholder"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn fields_from_json(text: &str) -> Option<RawFields> {
    if !text.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;

    let mut flat = Vec::new();
    flatten(object, &mut flat);

    let mut raw = RawFields::default();
    for (key, value) in flat {
        let Some(field) = Field::from_key(&key) else {
            continue;
        };
        match field {
            Field::Animals if raw.animals.is_empty() => raw.animals = value_to_list(&value),
            Field::Location if raw.location.is_empty() => raw.location = value_to_text(&value),
            Field::Time if raw.time.is_empty() => raw.time = value_to_text(&value),
            Field::Date if raw.date.is_empty() => raw.date = value_to_text(&value),
            _ => {}
        }
    }
    Some(raw)
}

fn flatten(object: &serde_json::Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        match value {
            Value::Object(nested) => flatten(nested, out),
            other => out.push((key.to_lowercase(), other.clone())),
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Array(_) => value_to_list(value).join(", "),
        other => other.to_string(),
    }
}

fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect(),
        other => vec![value_to_text(other)],
    }
}

fn fields_from_code_block(text: &str) -> Option<RawFields> {
    for marker in ["```json", "```"] {
        let mut search_from = 0;
        while let Some(start) = text[search_from..].find(marker) {
            let abs_start = search_from + start + marker.len();
            // No line break after the marker means no later fence has one either.
            let Some(newline) = text[abs_start..].find('\n') else {
                break;
            };
            let content_start = abs_start + newline + 1;
            if let Some(end) = text[content_start..].find("```") {
                let candidate = text[content_start..content_start + end].trim();
                if let Some(raw) = fields_from_json(candidate) {
                    return Some(raw);
                }
            }
            search_from = abs_start;
        }
    }
    None
}

fn key_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<key>[A-Za-zÄÖÜäöü\s*]+?)\s*[:\-\u{2013}\u{2014}]\s*(?P<value>.*)$")
            .expect("valid key/value regex")
    })
}

fn key_space_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<key>[A-Za-zÄÖÜäöü]+)\s+(?P<value>.+)$").expect("valid key regex")
    })
}

fn list_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\s*").expect("valid list regex"))
}

fn digits_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("valid digits regex"))
}

fn fields_from_lines(text: &str) -> RawFields {
    let mut raw = RawFields::default();
    let mut pending: Option<Field> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            pending = None;
            continue;
        }

        let line = line.trim_start_matches(['•', '-', '*', '\t', ' ']).trim();
        let line = list_number_pattern().replace(line, "");
        let line = line.trim();

        // "KEY: value" or "KEY - value"
        if let Some(caps) = key_value_pattern().captures(line) {
            if let Some(field) = Field::from_key(&caps["key"]) {
                let value = clean_value(&caps["value"]);
                if value.is_empty() {
                    pending = Some(field);
                    continue;
                }
                match field {
                    Field::Animals => {
                        raw.animals.push(value);
                        pending = Some(Field::Animals);
                    }
                    Field::Location => {
                        raw.location = value;
                        pending = None;
                    }
                    Field::Time => {
                        raw.time = value;
                        pending = None;
                    }
                    Field::Date => {
                        raw.date = value;
                        pending = None;
                    }
                }
                continue;
            }
        }

        // Continuation of a key declared on an earlier line
        if let Some(field) = pending {
            let value = clean_value(line);
            match field {
                Field::Animals => raw.animals.push(value),
                Field::Location if raw.location.is_empty() => raw.location = value,
                Field::Time if raw.time.is_empty() => raw.time = value,
                Field::Date if raw.date.is_empty() => raw.date = value,
                _ => {}
            }
            continue;
        }

        // "KEY value" without separator
        if let Some(caps) = key_space_pattern().captures(line) {
            let value = clean_value(&caps["value"]);
            match Field::from_key(&caps["key"]) {
                Some(Field::Animals) => {
                    raw.animals.push(value);
                    pending = Some(Field::Animals);
                }
                Some(Field::Location) if raw.location.is_empty() => raw.location = value,
                Some(Field::Time) if raw.time.is_empty() => raw.time = value,
                Some(Field::Date) if raw.date.is_empty() => raw.date = value,
                _ => {}
            }
        }
    }

    raw
}

fn clean_value(value: &str) -> String {
    value.trim().trim_matches('*').trim().to_string()
}

fn normalize_animals(animals: &[String]) -> String {
    let joined = animals
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        NO_ANIMALS.to_string()
    } else {
        joined
    }
}

/// Map the station label to its canonical name, ignoring prefixes like `NLP`.
pub fn normalize_location(location: &str) -> String {
    let location = location.trim();
    let upper = location.to_uppercase();
    for canonical in KNOWN_LOCATIONS {
        if upper.contains(&canonical.to_uppercase()) {
            return canonical.to_string();
        }
    }
    location.to_string()
}

/// `14:30 Uhr` -> `14:30:00`. Unrecognizable text is returned trimmed.
pub fn normalize_time(time: &str) -> String {
    let time = time.replace("Uhr", "").replace("uhr", "");
    let time = time.trim();
    if time.is_empty() {
        return String::new();
    }

    let parts: Vec<&str> = digits_pattern().find_iter(time).map(|m| m.as_str()).collect();
    if parts.len() >= 2 {
        let seconds = parts.get(2).copied().unwrap_or("0");
        return format!("{:0>2}:{:0>2}:{:0>2}", parts[0], parts[1], seconds);
    }
    time.to_string()
}

/// Bring a date into `DD.MM.YYYY`. Unrecognizable text is returned compacted.
pub fn normalize_date(date: &str) -> String {
    let compact: String = date
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' || c == '-' { '.' } else { c })
        .collect();
    if compact.is_empty() {
        return String::new();
    }

    // %y before %Y so "12.05.24" means 2024, not year 24
    for format in ["%d.%m.%y", "%d.%m.%Y", "%Y.%m.%d", "%Y%m%d"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(&compact, format) {
            return parsed.format("%d.%m.%Y").to_string();
        }
    }

    let parts: Vec<&str> = digits_pattern().find_iter(&compact).map(|m| m.as_str()).collect();
    if parts.len() >= 3 {
        let year = if parts[2].len() == 2 {
            format!("20{}", parts[2])
        } else {
            parts[2].to_string()
        };
        return format!("{:0>2}.{:0>2}.{}", parts[0], parts[1], year);
    }
    compact
}
