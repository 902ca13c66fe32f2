//! Key/value forwarder: uploads base64 field values as photos, then hands the whole
//! field set to the backend `apicreateobject` workflow.
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::bubble::model::{extract_record_id, normalize_url};
use crate::bubble::{ApiError, WorkflowApi};
use crate::inputs::value_as_text;

static BASE64_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:data:[^;]+;base64,)?[A-Za-z0-9+/]+={0,2}$").unwrap());

const BASE64_MIN_LENGTH: usize = 64;

/// Input keys that travel as top-level fields and are not forwarded as pairs.
pub const EXCLUDED_KEYS: &[&str] = &[
    "Value",
    "sheet",
    "organisation_id",
    "fieldtosearch",
    "action",
    "referencevalue",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("upload for field `{0}` returned no url")]
    MissingUrl(String),
    #[error("photo for field `{0}` was created without an id")]
    MissingPhotoId(String),
}

pub fn is_base64_string(value: &Value) -> bool {
    let Some(s) = value.as_str() else {
        return false;
    };
    if s.starts_with("data:") && s.contains(";base64,") {
        return true;
    }
    let trimmed = s.trim();
    trimmed.len() >= BASE64_MIN_LENGTH && BASE64_RE.is_match(trimmed)
}

/// Strip a `data:...;base64,` prefix.
pub fn normalize_base64(s: &str) -> &str {
    const MARKER: &str = ";base64,";
    match (s.starts_with("data:"), s.find(MARKER)) {
        (true, Some(idx)) => &s[idx + MARKER.len()..],
        _ => s,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    pub fields: Map<String, Value>,
}

impl ForwardRequest {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    fn field(&self, key: &str) -> Value {
        self.fields.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Upload owner; numeric ids are stringified.
    pub fn organisation_id(&self) -> Option<String> {
        self.fields
            .get("organisation_id")
            .and_then(value_as_text)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardResult {
    pub created_photos: Vec<String>,
    pub key_value_pairs: Vec<KeyValuePair>,
    pub response: Value,
}

struct Forwarder<'a> {
    api: &'a dyn WorkflowApi,
    attach_to: Option<String>,
    created: Vec<String>,
}

impl<'a> Forwarder<'a> {
    async fn photo_from_base64(&mut self, key: &str, raw: &str) -> Result<String, ForwardError> {
        let filename = format!("{}-{}.jpg", key, Utc::now().timestamp_millis());
        let uploaded = self
            .api
            .upload_workflow_file(self.attach_to.as_deref(), &filename, normalize_base64(raw))
            .await?;
        let url = ["/url", "/file_url", "/response/url", "/response/file_url"]
            .iter()
            .find_map(|ptr| uploaded.pointer(ptr).and_then(Value::as_str))
            .map(normalize_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ForwardError::MissingUrl(key.to_string()))?;
        let photo = self.api.create_photo(&url).await?;
        let id = extract_record_id(&photo).ok_or_else(|| ForwardError::MissingPhotoId(key.to_string()))?;
        debug!(key, %id, "created photo from base64 field");
        self.created.push(id.clone());
        Ok(id)
    }

    async fn convert(&mut self, key: &str, value: &Value) -> Result<Value, ForwardError> {
        match value {
            Value::Array(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry.as_str() {
                        Some(raw) if is_base64_string(entry) => {
                            out.push(Value::String(self.photo_from_base64(key, raw).await?));
                        }
                        _ => out.push(entry.clone()),
                    }
                }
                Ok(Value::Array(out))
            }
            Value::String(raw) if is_base64_string(value) => {
                Ok(Value::String(self.photo_from_base64(key, raw).await?))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Forward every non-reserved field, replacing base64 values with new photo ids.
#[instrument(skip_all)]
pub async fn forward(api: &dyn WorkflowApi, request: &ForwardRequest) -> Result<ForwardResult, ForwardError> {
    let mut forwarder = Forwarder {
        api,
        attach_to: request.organisation_id(),
        created: Vec::new(),
    };

    let mut pairs = Vec::new();
    for (key, value) in &request.fields {
        if EXCLUDED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = forwarder.convert(key, value).await?;
        pairs.push(KeyValuePair {
            key: key.clone(),
            value,
        });
    }

    let body = json!({
        "sheet": request.field("sheet"),
        "organisation_id": request.field("organisation_id"),
        "action": request.field("action"),
        "referencevalue": request.field("referencevalue"),
        "createdphotos": forwarder.created,
        "keyValuePairs": pairs,
    });
    let response = api.create_object(&body).await?;
    info!(pairs = pairs.len(), photos = forwarder.created.len(), "object forwarded");

    Ok(ForwardResult {
        created_photos: forwarder.created,
        key_value_pairs: pairs,
        response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_detection() {
        let long = "A".repeat(64);
        assert!(is_base64_string(&json!(long)));
        assert!(is_base64_string(&json!(format!("{}==", "QUJD".repeat(16)))));
        assert!(is_base64_string(&json!("data:image/png;base64,xyz")));
        assert!(!is_base64_string(&json!("A".repeat(63))));
        assert!(!is_base64_string(&json!(format!("{} with spaces", long))));
        assert!(!is_base64_string(&json!(42)));
        assert!(!is_base64_string(&json!("https://example.com/a.jpg")));
    }

    #[test]
    fn normalize_strips_only_data_urls() {
        assert_eq!(normalize_base64("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(normalize_base64("QUJD"), "QUJD");
        assert_eq!(normalize_base64("x;base64,QUJD"), "x;base64,QUJD");
    }
}
