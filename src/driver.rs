//! Batch driver: resolve config and payload, then upload, reconcile and write each item.
//!
//! A run only stops early when no token is available or no payload can be parsed.
//! Every other failure is recorded against its item and the loop moves on.
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bubble::model::record_field;
use crate::bubble::{ApiError, PhotoStore};
use crate::config::{Config, PhotoFields, RunConfig};
use crate::inputs::{InputKey, InputSources};
use crate::model::{ErrorKind, LogDetail, RunError, RunResult, RunState, VerifyMode};
use crate::payload::{parse_output4_payload, BatchPayload, Item};
use crate::reconcile::compute_final_urls;
use crate::upload;

/// Name -> id lookup tables supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMaps {
    pub custom_field: HashMap<String, String>,
    pub created_photo: HashMap<String, String>,
}

/// Parse a name -> id map from an object or a JSON string holding one.
/// Numeric ids are stringified; other values are ignored.
pub fn parse_id_map(value: &Value) -> Result<HashMap<String, String>, String> {
    let object = match value {
        Value::Object(map) => map.clone(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err("expected a JSON object".into()),
            Err(e) => return Err(e.to_string()),
        },
        Value::Null => Map::new(),
        _ => return Err("expected a JSON object".into()),
    };
    Ok(object
        .into_iter()
        .filter_map(|(k, v)| {
            let id = match v {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            (!id.is_empty()).then(|| (k.trim().to_string(), id))
        })
        .collect())
}

pub fn build_record_body(fields: &PhotoFields, custom_field_id: &str, urls: &[String], size: u64) -> Value {
    let mut body = Map::new();
    body.insert(fields.custom_field.clone(), json!(custom_field_id));
    body.insert(fields.urls.clone(), json!(urls));
    body.insert(fields.size.clone(), json!(size));
    Value::Object(body)
}

/// Whether a fetched URL list matches what was written.
pub fn urls_match(expected: &[String], actual: Option<&Value>, mode: VerifyMode) -> bool {
    let actual: Vec<String> = match actual.and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        None => Vec::new(),
    };
    match mode {
        VerifyMode::Ordered => actual == expected,
        VerifyMode::Unordered => {
            let a: HashSet<&String> = actual.iter().collect();
            let e: HashSet<&String> = expected.iter().collect();
            a == e
        }
    }
}

fn note(result: &mut RunResult, line: impl Into<String>) {
    let line = line.into();
    debug!(run_id = %result.run_id, "{}", line);
    result.log_lines.push(line);
}

fn record_error(result: &mut RunResult, kind: ErrorKind, item: Option<usize>, message: impl Into<String>) {
    let err = RunError {
        kind,
        item,
        message: message.into(),
    };
    warn!(run_id = %result.run_id, kind = kind.as_str(), item = ?item, "{}", err.message);
    result.errors.push(err);
}

/// Run one batch. `connect` builds the store once config and payload are known,
/// so terminal failures never touch the network.
#[instrument(skip_all)]
pub async fn run_batch<S, F>(defaults: &Config, sources: &InputSources, connect: F) -> RunResult
where
    S: PhotoStore,
    F: FnOnce(&RunConfig) -> Result<S, ApiError>,
{
    let started = Utc::now();
    let mut result = RunResult::new(Uuid::new_v4().to_string());
    info!(run_id = %result.run_id, "batch started");

    let cfg = match RunConfig::resolve(defaults, sources) {
        Ok(cfg) => cfg,
        Err(err) => {
            note(&mut result, "[config] token missing, aborting");
            record_error(&mut result, ErrorKind::ConfigError, None, err.to_string());
            result.state = RunState::ConfigMissing;
            return result;
        }
    };
    result.state = RunState::ConfigResolved;
    note(&mut result, format!("[config] env={}", cfg.env.as_str()));
    note(&mut result, format!("[config] base={}", cfg.api_base()));
    note(
        &mut result,
        format!(
            "[config] photoType={} fields={{{}, {}, {}}}",
            cfg.photo_type, cfg.fields.custom_field, cfg.fields.urls, cfg.fields.size
        ),
    );

    let maps = resolve_maps(sources, &mut result);

    let Some(payload) = resolve_payload(sources, &mut result) else {
        result.state = RunState::PayloadMissing;
        return result;
    };
    result.state = RunState::PayloadParsed;

    let store = match connect(&cfg) {
        Ok(store) => store,
        Err(err) => {
            record_error(&mut result, ErrorKind::ConfigError, None, err.to_string());
            result.state = RunState::ConfigMissing;
            return result;
        }
    };

    let driver = BatchDriver::new(&store, &cfg, &maps);
    driver.process(&payload, &mut result).await;

    let elapsed = Utc::now() - started;
    let summary = format!(
        "[done] created={} updated={} uploaded={} errors={} elapsedMs={}",
        result.created_ids.len(),
        result.updated_ids.len(),
        result.uploaded_urls.len(),
        result.errors.len(),
        elapsed.num_milliseconds()
    );
    note(&mut result, summary);
    result.state = RunState::Done;
    info!(
        run_id = %result.run_id,
        created = result.created_ids.len(),
        updated = result.updated_ids.len(),
        errors = result.errors.len(),
        "batch finished"
    );
    result
}

fn resolve_maps(sources: &InputSources, result: &mut RunResult) -> FieldMaps {
    let mut load = |key: InputKey| -> HashMap<String, String> {
        let Some(resolved) = sources.resolve(key) else {
            return HashMap::new();
        };
        match parse_id_map(&resolved.value) {
            Ok(map) => {
                note(
                    result,
                    format!("[config] {} keys={} (from {})", key.name(), map.len(), resolved.source),
                );
                map
            }
            Err(e) => {
                record_error(
                    result,
                    ErrorKind::ConfigError,
                    None,
                    format!("{} could not be parsed, treating as empty: {}", key.name(), e),
                );
                HashMap::new()
            }
        }
    };
    FieldMaps {
        custom_field: load(InputKey::CustomFieldMap),
        created_photo: load(InputKey::CreatedPhotoMap),
    }
}

fn resolve_payload(sources: &InputSources, result: &mut RunResult) -> Option<BatchPayload> {
    let Some(resolved) = sources.resolve(InputKey::Payload) else {
        note(result, "[input] output4 missing");
        record_error(result, ErrorKind::PayloadError, None, "payload input missing");
        return None;
    };
    let parsed = parse_output4_payload(&resolved.value);
    note(
        result,
        format!("[input] output4 from {} reason={}", resolved.source, parsed.reason),
    );
    match parsed.payload {
        Some(payload) => {
            note(result, format!("[input] items={}", payload.items.len()));
            Some(payload)
        }
        None => {
            record_error(
                result,
                ErrorKind::PayloadError,
                None,
                format!("payload could not be parsed ({})", parsed.reason),
            );
            None
        }
    }
}

/// Sequential per-item processing against one store.
pub struct BatchDriver<'a> {
    store: &'a dyn PhotoStore,
    cfg: &'a RunConfig,
    maps: &'a FieldMaps,
}

impl<'a> BatchDriver<'a> {
    pub fn new(store: &'a dyn PhotoStore, cfg: &'a RunConfig, maps: &'a FieldMaps) -> Self {
        Self { store, cfg, maps }
    }

    fn verbose(&self) -> bool {
        self.cfg.log_detail == LogDetail::Verbose
    }

    pub async fn process(&self, payload: &BatchPayload, result: &mut RunResult) {
        result.state = RunState::ItemProcessing;
        for (idx, item) in payload.items.iter().enumerate() {
            self.process_item(idx, item, result).await;
        }
    }

    #[instrument(skip(self, item, result), fields(run_id = %result.run_id))]
    async fn process_item(&self, idx: usize, item: &Item, result: &mut RunResult) {
        let name = item.custom_field_name.trim();
        note(result, format!("[item {}] customFieldName=\"{}\"", idx, name));

        if name.is_empty() {
            record_error(result, ErrorKind::MappingError, Some(idx), "customFieldName empty");
            return;
        }
        let Some(custom_field_id) = self.maps.custom_field.get(name) else {
            record_error(
                result,
                ErrorKind::MappingError,
                Some(idx),
                format!("custom field map missing key \"{}\"", name),
            );
            return;
        };

        let Some(uploaded) = self.upload_files(idx, item, result).await else {
            note(result, format!("[item {}] skipped: upload failed", idx));
            return;
        };

        let final_urls = compute_final_urls(&item.kept_urls, &item.removed_urls, &uploaded);
        let size = item.size.unwrap_or(final_urls.len() as u64);
        note(result, format!("[item {}] finalUrls={} size={}", idx, final_urls.len(), size));
        if self.verbose() {
            note(result, format!("[item {}] urls={:?}", idx, final_urls));
        }

        let body = build_record_body(&self.cfg.fields, custom_field_id, &final_urls, size);
        let target = item
            .photo_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.maps.created_photo.get(name).map(String::as_str));

        let written = match target {
            Some(target) => match self.store.update_record(target, &body).await {
                Ok(id) => {
                    note(result, format!("[item {}] updatedPhotoId={}", idx, id));
                    result.updated_ids.push(id.clone());
                    Some(id)
                }
                Err(e) => {
                    record_error(result, ErrorKind::WriteError, Some(idx), format!("update {}: {}", target, e));
                    None
                }
            },
            None => match self.store.create_record(&body).await {
                Ok(id) => {
                    note(result, format!("[item {}] createdPhotoId={}", idx, id));
                    result.created_ids.push(id.clone());
                    Some(id)
                }
                Err(e) => {
                    record_error(result, ErrorKind::WriteError, Some(idx), format!("create: {}", e));
                    None
                }
            },
        };

        if let (Some(id), true) = (written, self.cfg.verify_after_write) {
            self.verify(idx, &id, &final_urls, result).await;
        }
    }

    /// Uploaded URLs for the item, or `None` when an upload failure should stop it.
    async fn upload_files(&self, idx: usize, item: &Item, result: &mut RunResult) -> Option<Vec<String>> {
        let mut uploaded = Vec::new();
        if self.verbose() {
            note(result, format!("[item {}] newFiles={}", idx, item.new_files.len()));
        }
        for (file_idx, file) in item.new_files.iter().enumerate() {
            if self.verbose() {
                note(
                    result,
                    format!(
                        "[item {}] file {} uploading filename=\"{}\" type=\"{}\" b64len={}",
                        idx,
                        file_idx,
                        file.filename_or_default(),
                        file.content_type_or_default(),
                        file.base64.len()
                    ),
                );
            }
            match upload::upload(self.store, file).await {
                Ok(Some(url)) => {
                    if self.verbose() {
                        note(result, format!("[item {}] file {} uploadedUrl={}", idx, file_idx, url));
                    }
                    result.uploaded_urls.push(url.clone());
                    uploaded.push(url);
                }
                Ok(None) => {
                    note(result, format!("[item {}] file {} skip: base64 empty", idx, file_idx));
                }
                Err(e) if e.keeps_item() => {
                    record_error(result, ErrorKind::UploadError, Some(idx), format!("file {}: {}", file_idx, e));
                }
                Err(e) => {
                    record_error(result, ErrorKind::UploadError, Some(idx), format!("file {}: {}", file_idx, e));
                    return None;
                }
            }
        }
        Some(uploaded)
    }

    async fn verify(&self, idx: usize, id: &str, expected: &[String], result: &mut RunResult) {
        match self.store.fetch_record(id).await {
            Ok(record) => {
                let actual = record_field(&record, &self.cfg.fields.urls);
                if urls_match(expected, actual, self.cfg.verify_mode) {
                    note(result, format!("[item {}] verified {}", idx, id));
                } else {
                    record_error(
                        result,
                        ErrorKind::VerificationMismatch,
                        Some(idx),
                        format!(
                            "write verification failed for {}: expected {} got {}",
                            id,
                            json!(expected),
                            actual.cloned().unwrap_or(Value::Null)
                        ),
                    );
                }
            }
            Err(e) => record_error(
                result,
                ErrorKind::VerificationMismatch,
                Some(idx),
                format!("verification read failed for {}: {}", id, e),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_map_accepts_objects_and_strings() {
        let map = parse_id_map(&json!("{\"Roof\":\"cf1\",\"Door\":7,\"Bad\":[1]}")).unwrap();
        assert_eq!(map.get("Roof").map(String::as_str), Some("cf1"));
        assert_eq!(map.get("Door").map(String::as_str), Some("7"));
        assert!(!map.contains_key("Bad"));

        let map = parse_id_map(&json!({ "Roof": "cf1" })).unwrap();
        assert_eq!(map.len(), 1);
        assert!(parse_id_map(&json!("")).unwrap().is_empty());
    }

    #[test]
    fn id_map_rejects_garbage() {
        assert!(parse_id_map(&json!("{nope")).is_err());
        assert!(parse_id_map(&json!("[1,2]")).is_err());
        assert!(parse_id_map(&json!(12)).is_err());
    }

    #[test]
    fn record_body_uses_configured_field_names() {
        let fields = PhotoFields {
            custom_field: "CF".into(),
            urls: "Links".into(),
            size: "Count".into(),
        };
        let body = build_record_body(&fields, "cf-1", &["a".to_string()], 1);
        assert_eq!(body, json!({ "CF": "cf-1", "Links": ["a"], "Count": 1 }));
    }

    #[test]
    fn verification_modes() {
        let expected = vec!["a".to_string(), "b".to_string()];
        let reordered = json!(["b", "a"]);
        assert!(urls_match(&expected, Some(&json!(["a", "b"])), VerifyMode::Ordered));
        assert!(!urls_match(&expected, Some(&reordered), VerifyMode::Ordered));
        assert!(urls_match(&expected, Some(&reordered), VerifyMode::Unordered));
        assert!(!urls_match(&expected, None, VerifyMode::Unordered));
        assert!(urls_match(&[], None, VerifyMode::Ordered));
    }
}
