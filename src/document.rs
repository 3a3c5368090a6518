use crate::text::extract_field_text;
use serde_json::{Map, Value};

/// A record fetched from an upstream dataset.
///
/// No schema is assumed: every read goes through [`extract_field_text`], so a
/// missing field or an unexpected shape simply reads as empty text.
#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    fields: Map<String, Value>,
}

impl RawDocument {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Wrap a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::new(fields)),
            _ => None,
        }
    }

    pub fn field_text(&self, name: &str) -> String {
        extract_field_text(self.fields.get(name))
    }

    /// Text of every listed field that has any, joined by newlines.
    pub fn joined_text(&self, names: &[&str]) -> String {
        names
            .iter()
            .map(|name| self.field_text(name))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_text(&self, names: &[&str]) -> bool {
        names.iter().any(|name| !self.field_text(name).trim().is_empty())
    }
}
