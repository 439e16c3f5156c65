//! Lenient decoding of the model's per-window answer.
//!
//! The model is asked for `{"issue": [...], "faq": [...]}` but tends to wrap it
//! in prose or code fences, double its braces, or leave raw newlines inside
//! strings. Everything outside the outermost braces is ignored.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LabelEntry {
    pub index: usize,
    #[serde(default)]
    pub topic: Vec<String>,
    #[serde(default)]
    pub subtopic: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WindowResponse {
    pub issue: Vec<LabelEntry>,
    pub faq: Vec<LabelEntry>,
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response contains no JSON object")]
    NoObject,

    #[error("response is not valid JSON")]
    Malformed(#[from] serde_json::Error),

    #[error("response is missing the {0:?} list")]
    MissingField(&'static str),
}

pub fn parse_window_response(raw: &str) -> Result<WindowResponse, ResponseError> {
    let start = raw.find('{').ok_or(ResponseError::NoObject)?;
    let end = raw.rfind('}').ok_or(ResponseError::NoObject)?;
    if end < start {
        return Err(ResponseError::NoObject);
    }

    let span = raw[start..=end].replace("{{", "{").replace("}}", "}");
    let value: Value = serde_json::from_str(&escape_control_chars(&span))?;

    for field in ["issue", "faq"] {
        if value.get(field).is_none() {
            return Err(ResponseError::MissingField(field));
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Escape raw control characters that appear inside string literals.
fn escape_control_chars(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if c.is_control() {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    other => out.push_str(&format!("\\u{:04x}", other as u32)),
                }
                continue;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}
