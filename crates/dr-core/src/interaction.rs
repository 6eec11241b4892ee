//! Typed view over the loosely-typed interaction payloads returned by the
//! research backend.
//!
//! Backend payloads are read through [`field`], which treats a missing key and
//! an explicit `null` the same way and accepts either snake_case or camelCase
//! spellings. Downstream code only ever sees `Option`s; nothing is defaulted to
//! a placeholder value.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Statuses after which a job's outputs are final.
pub const TERMINAL_STATUSES: [&str; 3] = ["completed", "failed", "cancelled"];

/// Label reported when the backend did not include a status.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Look up `key` on a JSON object, falling back to its camelCase spelling.
///
/// Returns `None` for non-objects, missing keys and `null` values.
pub fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    let direct = obj.get(key).filter(|v| !v.is_null());
    if direct.is_some() {
        return direct;
    }
    let camel = camel_case(key);
    if camel == key {
        return None;
    }
    obj.get(&camel).filter(|v| !v.is_null())
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Non-empty string field.
fn string_field(value: &Value, key: &str) -> Option<String> {
    field(value, key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// String or number field rendered as a string (ids are not always strings).
fn scalar_field(value: &Value, key: &str) -> Option<String> {
    match field(value, key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer_field(value: &Value, key: &str) -> Option<i64> {
    field(value, key).and_then(Value::as_i64)
}

/// An asynchronous research job as last observed on the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Interaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub outputs: Vec<Output>,
    /// Failure description attached by the backend, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Interaction {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: Some(status.into()),
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<Output>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn from_value(value: &Value) -> Self {
        let outputs = field(value, "outputs")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Output::from_value).collect())
            .unwrap_or_default();

        let error = field(value, "error").and_then(|err| match err {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            other => string_field(other, "message"),
        });

        Self {
            id: scalar_field(value, "id"),
            status: string_field(value, "status"),
            outputs,
            error,
        }
    }

    /// True once the status is one of [`TERMINAL_STATUSES`]; absent or
    /// unrecognised statuses are non-terminal.
    pub fn is_terminal(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| TERMINAL_STATUSES.contains(&s))
    }

    pub fn status_label(&self) -> &str {
        self.status.as_deref().unwrap_or(UNKNOWN_STATUS)
    }

    /// Why the job failed, as reported by the backend.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<'de> Deserialize<'de> for Interaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Interaction::from_value(&value))
    }
}

/// One part of a (possibly multi-part) interaction response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Output {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn from_value(value: &Value) -> Self {
        // Whitespace-only text is kept here; report assembly decides what counts.
        let text = field(value, "text").and_then(Value::as_str).map(str::to_string);
        let annotations = field(value, "annotations")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Annotation::from_value).collect())
            .unwrap_or_default();
        Self { text, annotations }
    }
}

/// A normalised annotation record. Fields absent from the payload stay `None`
/// and are omitted when serialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,
}

impl Annotation {
    pub fn from_value(value: &Value) -> Self {
        Self {
            kind: string_field(value, "type"),
            id: scalar_field(value, "id"),
            url: string_field(value, "url"),
            title: string_field(value, "title"),
            start_index: integer_field(value, "start_index"),
            end_index: integer_field(value, "end_index"),
            cited_text: string_field(value, "cited_text"),
            extras: field(value, "extras").cloned(),
        }
    }

    pub fn is_citation(&self) -> bool {
        self.kind.as_deref() == Some("citation")
    }

    /// Whether the record points at a source (has a link or a title).
    pub fn has_url_or_title(&self) -> bool {
        self.url.is_some() || self.title.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_treats_null_as_absent() {
        let v = json!({"status": null, "id": "abc"});
        assert!(field(&v, "status").is_none());
        assert!(field(&v, "missing").is_none());
        assert_eq!(field(&v, "id"), Some(&json!("abc")));
    }

    #[test]
    fn test_field_camel_case_fallback() {
        let v = json!({"startIndex": 4, "cited_text": "quote"});
        assert_eq!(field(&v, "start_index"), Some(&json!(4)));
        assert_eq!(field(&v, "cited_text"), Some(&json!("quote")));
    }

    #[test]
    fn test_field_on_non_object() {
        assert!(field(&json!([1, 2]), "id").is_none());
        assert!(field(&json!("text"), "id").is_none());
    }

    #[test]
    fn test_interaction_from_value() {
        let v = json!({
            "id": "int-1",
            "status": "completed",
            "outputs": [
                {"type": "text", "text": "Hello", "annotations": [
                    {"type": "citation", "url": "https://example.com", "title": "Example"}
                ]},
                {"type": "tool_call", "text": 42}
            ]
        });
        let interaction = Interaction::from_value(&v);
        assert_eq!(interaction.id.as_deref(), Some("int-1"));
        assert!(interaction.is_terminal());
        assert_eq!(interaction.outputs.len(), 2);
        assert_eq!(interaction.outputs[0].text.as_deref(), Some("Hello"));
        assert_eq!(interaction.outputs[0].annotations.len(), 1);
        // Non-string text is absent, not coerced.
        assert!(interaction.outputs[1].text.is_none());
    }

    #[test]
    fn test_missing_outputs_and_status() {
        let interaction = Interaction::from_value(&json!({"id": "x"}));
        assert!(interaction.outputs.is_empty());
        assert!(!interaction.is_terminal());
        assert_eq!(interaction.status_label(), UNKNOWN_STATUS);
    }

    #[test]
    fn test_terminal_statuses() {
        for status in ["completed", "failed", "cancelled"] {
            assert!(Interaction::new("id", status).is_terminal());
        }
        for status in ["in_progress", "running", "requires_action", "COMPLETED"] {
            assert!(!Interaction::new("id", status).is_terminal());
        }
    }

    #[test]
    fn test_error_message_extraction() {
        let nested = Interaction::from_value(&json!({
            "id": "x", "status": "failed", "error": {"code": 13, "message": "agent crashed"}
        }));
        assert_eq!(nested.error_message(), Some("agent crashed"));

        let flat = Interaction::from_value(&json!({"status": "failed", "error": "boom"}));
        assert_eq!(flat.error_message(), Some("boom"));
        assert_eq!(Interaction::new("x", "completed").error_message(), None);
    }

    #[test]
    fn test_annotation_omits_absent_fields() {
        let a = Annotation::from_value(&json!({
            "type": "citation",
            "start_index": 6,
            "end_index": 15
        }));
        let serialized = serde_json::to_value(&a).unwrap();
        assert_eq!(serialized, json!({"type": "citation", "start_index": 6, "end_index": 15}));
        assert!(!a.has_url_or_title());
    }

    #[test]
    fn test_annotation_numeric_id_and_empty_strings() {
        let a = Annotation::from_value(&json!({"id": 7, "url": "", "title": "T"}));
        assert_eq!(a.id.as_deref(), Some("7"));
        assert!(a.url.is_none());
        assert_eq!(a.title.as_deref(), Some("T"));
    }

    #[test]
    fn test_deserialize_via_serde() {
        let interaction: Interaction =
            serde_json::from_str(r#"{"id": "a", "status": "in_progress"}"#).unwrap();
        assert_eq!(interaction.status_label(), "in_progress");
    }
}
