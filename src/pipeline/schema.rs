//! Schema validation for generated flashcards.
//!
//! The model's JSON is validated field by field against [`serde_json::Value`]
//! rather than deserialised straight into [`Flashcard`], so a failure can name
//! the exact field path and constraint (`flashcards[3].difficulty must be
//! between 1 and 100`) instead of serde's positional message.

use crate::error::SchemaViolation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lowest accepted difficulty score.
pub const MIN_DIFFICULTY: i64 = 1;
/// Highest accepted difficulty score.
pub const MAX_DIFFICULTY: i64 = 100;

/// One validated, generated flashcard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_concept: Option<String>,
    /// Filename of the document the card was generated from.
    pub source: String,
    /// Page locator: a page number or `"page:line"`.
    pub page: String,
    pub difficulty: i64,
    #[serde(default)]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CardMetadata>,
}

/// Optional structured provenance for a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMetadata {
    pub chapter: String,
    #[serde(default)]
    pub section: String,
    pub topic: String,
    pub language: String,
    pub line_number: u32,
    pub page_number: u32,
}

/// Validate a batch envelope: `{ "flashcards": [ … ] }`.
pub fn validate_envelope(value: &Value) -> Result<Vec<Flashcard>, SchemaViolation> {
    let obj = value
        .as_object()
        .ok_or_else(|| SchemaViolation::new("$", "must be a JSON object"))?;
    let cards = obj
        .get("flashcards")
        .ok_or_else(|| SchemaViolation::new("flashcards", "is required"))?
        .as_array()
        .ok_or_else(|| SchemaViolation::new("flashcards", "must be an array"))?;

    cards
        .iter()
        .enumerate()
        .map(|(i, card)| validate_card_at(card, &format!("flashcards[{i}]")))
        .collect()
}

/// Validate a single card object.
pub fn validate_card(value: &Value) -> Result<Flashcard, SchemaViolation> {
    validate_card_at(value, "card")
}

fn validate_card_at(value: &Value, path: &str) -> Result<Flashcard, SchemaViolation> {
    let obj = value
        .as_object()
        .ok_or_else(|| SchemaViolation::new(path, "must be an object"))?;
    let field = |name: &str| format!("{path}.{name}");

    let difficulty = required_integer(obj, "difficulty", &field("difficulty"))?;
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        return Err(SchemaViolation::new(
            field("difficulty"),
            format!("must be between {MIN_DIFFICULTY} and {MAX_DIFFICULTY}, got {difficulty}"),
        ));
    }

    let language = optional_string(obj, "language", &field("language"))?;
    if let Some(ref lang) = language {
        if lang.chars().count() < 2 {
            return Err(SchemaViolation::new(
                field("language"),
                "must be at least 2 characters",
            ));
        }
    }

    let index = match obj.get("index") {
        None | Some(Value::Null) => 0,
        Some(_) => required_integer(obj, "index", &field("index"))?,
    };

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => None,
        Some(m) => Some(validate_metadata(m, &field("metadata"))?),
    };

    Ok(Flashcard {
        term: required_string(obj, "term", &field("term"))?,
        definition: required_string(obj, "definition", &field("definition"))?,
        hint: optional_string(obj, "hint", &field("hint"))?,
        explanation: optional_string(obj, "explanation", &field("explanation"))?,
        key_concept: optional_string(obj, "keyConcept", &field("keyConcept"))?,
        source: required_string(obj, "source", &field("source"))?,
        page: required_string(obj, "page", &field("page"))?,
        difficulty,
        index,
        language,
        metadata,
    })
}

fn validate_metadata(value: &Value, path: &str) -> Result<CardMetadata, SchemaViolation> {
    let obj = value
        .as_object()
        .ok_or_else(|| SchemaViolation::new(path, "must be an object"))?;
    let field = |name: &str| format!("{path}.{name}");

    let language = string_field(obj, "language", &field("language"))?;
    if language.chars().count() < 2 {
        return Err(SchemaViolation::new(
            field("language"),
            "must be at least 2 characters",
        ));
    }

    Ok(CardMetadata {
        chapter: string_field(obj, "chapter", &field("chapter"))?,
        section: optional_string(obj, "section", &field("section"))?.unwrap_or_default(),
        topic: string_field(obj, "topic", &field("topic"))?,
        language,
        line_number: positive_integer(obj, "lineNumber", &field("lineNumber"))?,
        page_number: positive_integer(obj, "pageNumber", &field("pageNumber"))?,
    })
}

// ── Field helpers ────────────────────────────────────────────────────────────

/// A string that must be present (may be empty).
fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, SchemaViolation> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        None | Some(Value::Null) => Err(SchemaViolation::new(path, "is required")),
        Some(_) => Err(SchemaViolation::new(path, "must be a string")),
    }
}

/// A string that must be present and non-empty.
fn required_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<String, SchemaViolation> {
    let s = string_field(obj, key, path)?;
    if s.trim().is_empty() {
        return Err(SchemaViolation::new(path, "must not be empty"));
    }
    Ok(s)
}

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, SchemaViolation> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(SchemaViolation::new(path, "must be a string")),
    }
}

/// An integral JSON number. `50.0` is accepted; `50.5` is not.
fn required_integer(obj: &Map<String, Value>, key: &str, path: &str) -> Result<i64, SchemaViolation> {
    let v = obj
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| SchemaViolation::new(path, "is required"))?;
    if let Some(i) = v.as_i64() {
        return Ok(i);
    }
    match v.as_f64() {
        Some(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
        Some(_) => Err(SchemaViolation::new(path, "must be an integer")),
        None => Err(SchemaViolation::new(path, "must be a number")),
    }
}

fn positive_integer(obj: &Map<String, Value>, key: &str, path: &str) -> Result<u32, SchemaViolation> {
    let i = required_integer(obj, key, path)?;
    if i < 1 {
        return Err(SchemaViolation::new(path, "must be a positive integer"));
    }
    u32::try_from(i).map_err(|_| SchemaViolation::new(path, "is out of range"))
}
