use serde_json::Value;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Lowercase `text` and replace every character that is neither a word
/// character nor whitespace with a single space.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if is_word_char(c) || c.is_whitespace() { c } else { ' ' })
        .collect()
}

/// Like [`normalize`], but collapses whitespace runs into one space and trims.
pub fn normalize_collapsed(text: &str) -> String {
    normalize(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull usable text out of an untyped field value.
///
/// Strings are returned as is, arrays contribute their string elements
/// joined by newlines, and everything else (absent, null, numbers, objects)
/// yields an empty string.
pub fn extract_field_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
