//! Batch payload model and the recursive `output4` extractor.
use serde::Serialize;
use serde_json::Value;

use crate::inputs::value_as_text;

const MAX_DEPTH: usize = 8;

/// Keys under which callers have been seen nesting the real payload.
const NESTED_KEYS: &[&str] = &["value", "payload", "output4", "photoPayload", "data"];

pub const DEFAULT_FILENAME: &str = "upload.bin";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub version: u64,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub custom_field_name: String,
    pub photo_id: Option<String>,
    pub new_files: Vec<FileInput>,
    pub kept_urls: Vec<String>,
    pub removed_urls: Vec<String>,
    /// Explicit size override; the URL count is used when absent.
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileInput {
    pub base64: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl FileInput {
    pub fn filename_or_default(&self) -> &str {
        self.filename
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

impl BatchPayload {
    /// Lenient conversion: a missing or non-array `items` yields an empty batch.
    pub fn from_value(value: &Value) -> Self {
        let version = value.get("version").and_then(Value::as_u64).unwrap_or(1);
        let items = value
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Item::from_value).collect())
            .unwrap_or_default();
        Self { version, items }
    }
}

impl Item {
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(value_as_text).unwrap_or_default();
        let photo_id = value
            .get("photoId")
            .and_then(value_as_text)
            .filter(|s| !s.is_empty());
        let new_files = value
            .get("newFiles")
            .and_then(Value::as_array)
            .map(|files| files.iter().map(FileInput::from_value).collect())
            .unwrap_or_default();
        let size = value.get("size").and_then(Value::as_u64);

        Self {
            custom_field_name: text("customFieldName"),
            photo_id,
            new_files,
            kept_urls: string_list(value.get("keptUrls")),
            removed_urls: string_list(value.get("removedUrls")),
            size,
        }
    }
}

impl FileInput {
    pub fn from_value(value: &Value) -> Self {
        let opt = |key: &str| value.get(key).and_then(value_as_text);
        Self {
            base64: value
                .get("base64")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            filename: opt("filename"),
            content_type: opt("contentType"),
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_as_text).collect())
        .unwrap_or_default()
}

/// Outcome of [`parse_output4_payload`]; `reason` is a diagnostic tag for the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadParse {
    pub payload: Option<BatchPayload>,
    pub reason: String,
}

impl PayloadParse {
    fn ok(value: &Value, reason: impl Into<String>) -> Self {
        Self {
            payload: Some(BatchPayload::from_value(value)),
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            payload: None,
            reason: reason.into(),
        }
    }

    fn nested(self, prefix: &str) -> Self {
        Self {
            payload: self.payload,
            reason: format!("{}>{}", prefix, self.reason),
        }
    }
}

const NO_ITEMS: &str = "object.no-items";

/// Locate a `{ items: [...] }` batch inside whatever shape the caller delivered.
///
/// A top-level object (or JSON string holding one) without any recognizable batch is
/// itself the batch, with `items` treated as empty.
pub fn parse_output4_payload(value: &Value) -> PayloadParse {
    let parsed = parse_at(value, 0);
    if parsed.payload.is_some() || !parsed.reason.ends_with(NO_ITEMS) {
        return parsed;
    }
    match top_level_object(value) {
        Some(object) => PayloadParse::ok(&object, parsed.reason),
        None => parsed,
    }
}

fn top_level_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(parsed @ Value::Object(_)) => Some(parsed),
            _ => None,
        },
        _ => None,
    }
}

fn has_items_array(value: &Value) -> bool {
    value.get("items").map(Value::is_array).unwrap_or(false)
}

fn parse_at(value: &Value, depth: usize) -> PayloadParse {
    if depth > MAX_DEPTH {
        return PayloadParse::fail("depth-exceeded");
    }
    match value {
        Value::Null => PayloadParse::fail("empty"),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return PayloadParse::fail("empty");
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(parsed) if has_items_array(&parsed) => PayloadParse::ok(&parsed, "json-string"),
                Ok(parsed) => parse_at(&parsed, depth + 1).nested("json-string"),
                Err(err) => PayloadParse::fail(format!("json-parse-failed:{}", err)),
            }
        }
        Value::Object(map) => {
            if has_items_array(value) {
                return PayloadParse::ok(value, "object.items");
            }
            let mut first_failure: Option<PayloadParse> = None;
            for key in NESTED_KEYS {
                if let Some(inner) = map.get(*key) {
                    let parsed = parse_at(inner, depth + 1).nested(&format!("object.{}", key));
                    if parsed.payload.is_some() {
                        return parsed;
                    }
                    first_failure.get_or_insert(parsed);
                }
            }
            if let Some(first) = value.pointer("/query/data/0") {
                let parsed = parse_at(first, depth + 1).nested("wrapper.query.data");
                if parsed.payload.is_some() {
                    return parsed;
                }
                first_failure.get_or_insert(parsed);
            }
            first_failure.unwrap_or_else(|| PayloadParse::fail(NO_ITEMS))
        }
        Value::Array(items) => {
            if items.is_empty() {
                return PayloadParse::fail("array-empty");
            }
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| parse_at(item, depth + 1).nested(&format!("array[{}]", idx)))
                .find(|parsed| parsed.payload.is_some())
                .unwrap_or_else(|| PayloadParse::fail("array-no-match"))
        }
        Value::Bool(_) => PayloadParse::fail("unsupported:bool"),
        Value::Number(_) => PayloadParse::fail("unsupported:number"),
    }
}
