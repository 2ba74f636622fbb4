//! Judgment schema contract
//!
//! The judge answers in free text. `Judgment::parse` is the only way that text
//! becomes a typed value; anything that does not meet the contract is a
//! `SchemaParse` error.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub importance_score: u8,
    pub category: String,
    pub description: String,
    pub summary: String,
}

impl Judgment {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let value = extract_json_from_response(raw).ok_or_else(|| {
            AppError::SchemaParse(format!("no JSON object in response ({} chars)", raw.len()))
        })?;
        let object = value
            .as_object()
            .ok_or_else(|| AppError::SchemaParse("response is not a JSON object".into()))?;

        let score = object
            .get("importance_score")
            .ok_or_else(|| AppError::SchemaParse("missing importance_score".into()))?;
        let importance_score = parse_score(score)?;

        Ok(Self {
            importance_score,
            category: required_text(object, "category")?.to_lowercase(),
            description: required_text(object, "description")?,
            summary: required_text(object, "summary")?,
        })
    }

    pub fn is_accepted(&self, quality_threshold: u8) -> bool {
        self.importance_score >= quality_threshold
    }
}

/// Integer in 1..=10. Whole-valued floats (`8.0`) and numeric strings are tolerated.
fn parse_score(value: &serde_json::Value) -> Result<u8, AppError> {
    let number = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AppError::SchemaParse(format!("importance_score is not a number: {}", value)))?;

    if number.fract() != 0.0 {
        return Err(AppError::SchemaParse(format!(
            "importance_score is not an integer: {}",
            number
        )));
    }
    if !(1.0..=10.0).contains(&number) {
        return Err(AppError::SchemaParse(format!(
            "importance_score out of range: {}",
            number
        )));
    }
    Ok(number as u8)
}

fn required_text(
    object: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<String, AppError> {
    match object.get(field).and_then(|v| v.as_str()) {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Some(_) => Err(AppError::SchemaParse(format!("{} is blank", field))),
        None => Err(AppError::SchemaParse(format!("missing {}", field))),
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
fn extract_json_from_response(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();

    // Try direct parse first
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(json);
    }

    // Try to extract from markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            let json_str = after_marker[..end].trim();
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(json_str) {
                return Some(json);
            }
        }
    }

    // First balanced {...} that parses as an object; prose like "{8/10}" is skipped
    trimmed
        .match_indices('{')
        .filter_map(|(start, _)| {
            let end = balanced_object_end(trimmed, start)?;
            serde_json::from_str::<serde_json::Value>(&trimmed[start..end]).ok()
        })
        .find(|json| json.is_object())
}

/// Byte offset just past the `}` closing the `{` at `start`, ignoring braces in strings.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
