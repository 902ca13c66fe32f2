//! Tolerant input resolution.
//!
//! Callers deliver the same logical inputs under different container shapes and key
//! casings. [`InputSources`] holds every container we accept, and [`InputSources::resolve`]
//! probes them in a fixed order, falling back to shape heuristics over the loose
//! `dataValues` list when no container names the key.
use serde_json::{Map, Value};
use std::fmt;

/// Prefix for process environment variables that act as an input source.
pub const ENV_PREFIX: &str = "PHOTO_WORKFLOW_";

const ENV_LITERALS: &[&str] = &[
    "live",
    "version-test",
    "test",
    "prod",
    "production",
    "version-live",
    "dev",
];

const MIN_TOKEN_LEN: usize = 20;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ListWrapped,
    Data,
    Properties,
    Context,
    Environment,
    Heuristic,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ListWrapped => "list-wrapped",
            Source::Data => "data",
            Source::Properties => "properties",
            Source::Context => "context",
            Source::Environment => "environment",
            Source::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape predicate used when scanning `dataValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    Payload,
    Token,
    Env,
    Domain,
    /// JSON object without an `items` array, filling map slot n (zero based).
    JsonMap(usize),
}

impl Heuristic {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Heuristic::Payload => looks_like_payload(value),
            Heuristic::Token => looks_like_token(value),
            Heuristic::Env => looks_like_env(value),
            Heuristic::Domain => looks_like_domain(value),
            Heuristic::JsonMap(_) => looks_like_json_map(value),
        }
    }

}

/// Inputs filled from JSON maps in `dataValues`, in slot order.
const JSON_MAP_SLOTS: [InputKey; 2] = [InputKey::CustomFieldMap, InputKey::CreatedPhotoMap];

/// Every input the batch driver knows how to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKey {
    Payload,
    Token,
    Env,
    Domain,
    CustomFieldMap,
    CreatedPhotoMap,
    PhotoType,
    FieldCustomField,
    FieldUrls,
    FieldSize,
    OrganisationId,
}

impl InputKey {
    pub const ALL: [InputKey; 11] = [
        InputKey::Payload,
        InputKey::Token,
        InputKey::Env,
        InputKey::Domain,
        InputKey::CustomFieldMap,
        InputKey::CreatedPhotoMap,
        InputKey::PhotoType,
        InputKey::FieldCustomField,
        InputKey::FieldUrls,
        InputKey::FieldSize,
        InputKey::OrganisationId,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InputKey::Payload => "output4",
            InputKey::Token => "token",
            InputKey::Env => "env",
            InputKey::Domain => "domain",
            InputKey::CustomFieldMap => "customFieldMapJson",
            InputKey::CreatedPhotoMap => "createdPhotoMapJson",
            InputKey::PhotoType => "photoType",
            InputKey::FieldCustomField => "photoFieldCustomField",
            InputKey::FieldUrls => "photoFieldUrls",
            InputKey::FieldSize => "photoFieldSize",
            InputKey::OrganisationId => "organisationId",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            InputKey::Payload => &["photoPayload", "payload"],
            InputKey::Token => &["apiToken", "bubbleToken"],
            InputKey::Env => &["environment"],
            InputKey::Domain => &["appDomain", "baseUrl"],
            InputKey::CustomFieldMap => &["customFieldMap"],
            InputKey::CreatedPhotoMap => &["createdPhotoMap"],
            InputKey::OrganisationId => &["organizationId", "attachTo"],
            InputKey::PhotoType
            | InputKey::FieldCustomField
            | InputKey::FieldUrls
            | InputKey::FieldSize => &[],
        }
    }

    pub fn heuristic(&self) -> Option<Heuristic> {
        match self {
            InputKey::Payload => Some(Heuristic::Payload),
            InputKey::Token => Some(Heuristic::Token),
            InputKey::Env => Some(Heuristic::Env),
            InputKey::Domain => Some(Heuristic::Domain),
            InputKey::CustomFieldMap => Some(Heuristic::JsonMap(0)),
            InputKey::CreatedPhotoMap => Some(Heuristic::JsonMap(1)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub source: Source,
}

impl Resolved {
    pub fn text(&self) -> Option<String> {
        value_as_text(&self.value)
    }
}

/// The closed set of containers an invocation may carry inputs in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSources {
    pub list_wrapped: Map<String, Value>,
    pub data: Map<String, Value>,
    pub properties: Map<String, Value>,
    pub context: Map<String, Value>,
    pub environment: Map<String, Value>,
    pub data_values: Vec<Value>,
}

impl InputSources {
    /// Build sources from an input bag:
    /// `{ data?, properties?, context?, keys?, values?, keyValues?, dataValues? }`.
    pub fn from_bag(bag: &Value) -> Self {
        let object = |key: &str| {
            lookup(bag.as_object(), key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };

        let mut list_wrapped = Map::new();
        let keys = lookup(bag.as_object(), "keys").and_then(unwrap_list);
        let values = lookup(bag.as_object(), "values").and_then(unwrap_list);
        if let (Some(keys), Some(values)) = (keys, values) {
            for (key, value) in keys.iter().zip(values.iter()) {
                if let Some(key) = value_as_text(key) {
                    list_wrapped.insert(key, unwrap_single(value));
                }
            }
        }
        if let Some(kv) = lookup(bag.as_object(), "keyValues").and_then(Value::as_object) {
            for (key, value) in kv {
                list_wrapped.insert(key.clone(), unwrap_single(value));
            }
        }

        let data_values = lookup(bag.as_object(), "dataValues")
            .and_then(unwrap_list)
            .unwrap_or_default();

        Self {
            list_wrapped,
            data: object("data"),
            properties: object("properties"),
            context: object("context"),
            environment: Map::new(),
            data_values,
        }
    }

    /// Attach environment variables carrying [`ENV_PREFIX`]; the prefix is stripped.
    pub fn with_environment<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if !key.is_empty() {
                    self.environment.insert(key.to_string(), Value::String(value));
                }
            }
        }
        self
    }

    fn direct_sources(&self) -> [(Source, &Map<String, Value>); 5] {
        [
            (Source::ListWrapped, &self.list_wrapped),
            (Source::Data, &self.data),
            (Source::Properties, &self.properties),
            (Source::Context, &self.context),
            (Source::Environment, &self.environment),
        ]
    }

    /// First defined, non-blank value for `key` or one of its aliases.
    pub fn resolve(&self, key: InputKey) -> Option<Resolved> {
        self.resolve_named(key.name(), key.aliases(), key.heuristic())
    }

    pub fn resolve_named(
        &self,
        name: &str,
        aliases: &[&str],
        heuristic: Option<Heuristic>,
    ) -> Option<Resolved> {
        self.resolve_direct(name, aliases)
            .or_else(|| heuristic.and_then(|h| self.scan_data_values(h)))
    }

    fn resolve_direct(&self, name: &str, aliases: &[&str]) -> Option<Resolved> {
        for (source, map) in self.direct_sources() {
            let candidates = std::iter::once(name).chain(aliases.iter().copied());
            for candidate in candidates {
                if let Some(value) = lookup(Some(map), candidate) {
                    if !is_blank(value) {
                        return Some(Resolved {
                            value: value.clone(),
                            source,
                        });
                    }
                }
            }
        }
        None
    }

    pub fn resolve_text(&self, key: InputKey) -> Option<String> {
        self.resolve(key).and_then(|r| r.text())
    }

    /// Heuristic scan of the loose `dataValues` list.
    ///
    /// JSON maps are matched by position, counting only the map slots that no
    /// direct source has filled, and never returning a map a direct source supplied.
    pub fn scan_data_values(&self, heuristic: Heuristic) -> Option<Resolved> {
        let (ordinal, claimed) = match heuristic {
            Heuristic::JsonMap(slot) => self.unclaimed_map_slot(slot),
            _ => (0, Vec::new()),
        };
        self.data_values
            .iter()
            .filter(|v| !is_blank(v) && heuristic.matches(v))
            .filter(|v| !claimed.iter().any(|c| same_json_map(c, v)))
            .nth(ordinal)
            .map(|value| Resolved {
                value: value.clone(),
                source: Source::Heuristic,
            })
    }

    fn unclaimed_map_slot(&self, slot: usize) -> (usize, Vec<Value>) {
        let mut ordinal = 0;
        let mut claimed = Vec::new();
        for (idx, key) in JSON_MAP_SLOTS.iter().enumerate() {
            if idx == slot {
                continue;
            }
            match self.resolve_direct(key.name(), key.aliases()) {
                Some(resolved) => claimed.push(resolved.value),
                None if idx < slot => ordinal += 1,
                None => {}
            }
        }
        (ordinal, claimed)
    }

    /// Where each known input resolves from, for diagnostics.
    pub fn trace(&self) -> Vec<(InputKey, Option<Source>)> {
        InputKey::ALL
            .iter()
            .map(|key| (*key, self.resolve(*key).map(|r| r.source)))
            .collect()
    }
}

/// Case-insensitive key lookup, exact match first.
fn lookup<'a>(map: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Value> {
    let map = map?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Items of a JSON array, or of a list wrapper exposing `query.data`.
pub fn unwrap_list(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(_) => value
            .pointer("/query/data")
            .and_then(Value::as_array)
            .cloned(),
        _ => None,
    }
}

/// Collapse single-element lists to their element.
pub fn unwrap_single(value: &Value) -> Value {
    match unwrap_list(value) {
        Some(items) if items.len() == 1 => items[0].clone(),
        _ => value.clone(),
    }
}

/// Text form of a scalar input; objects and arrays are re-serialized.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

fn parse_json_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn same_json_map(a: &Value, b: &Value) -> bool {
    match (parse_json_object(a), parse_json_object(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

pub fn looks_like_payload(value: &Value) -> bool {
    parse_json_object(value)
        .map(|map| map.get("items").map(Value::is_array).unwrap_or(false))
        .unwrap_or(false)
}

pub fn looks_like_token(value: &Value) -> bool {
    let Some(s) = value.as_str().map(str::trim) else {
        return false;
    };
    s.chars().count() >= MIN_TOKEN_LEN
        && !s.chars().any(char::is_whitespace)
        && !looks_like_domain(value)
        && !s.starts_with('{')
        && !s.starts_with('[')
}

pub fn looks_like_env(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| {
            let s = s.trim();
            ENV_LITERALS.iter().any(|lit| lit.eq_ignore_ascii_case(s))
        })
        .unwrap_or(false)
}

pub fn looks_like_domain(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| {
            let s = s.trim().to_ascii_lowercase();
            s.starts_with("http://") || s.starts_with("https://")
        })
        .unwrap_or(false)
}

pub fn looks_like_json_map(value: &Value) -> bool {
    parse_json_object(value)
        .map(|map| !map.get("items").map(Value::is_array).unwrap_or(false))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_order_prefers_list_wrapped_over_data() {
        let bag = json!({
            "keys": ["token"],
            "values": [["from-list"]],
            "data": { "token": "from-data" },
            "properties": { "token": "from-props" }
        });
        let sources = InputSources::from_bag(&bag);
        let resolved = sources.resolve(InputKey::Token).unwrap();
        assert_eq!(resolved.value, json!("from-list"));
        assert_eq!(resolved.source, Source::ListWrapped);
    }

    #[test]
    fn blank_values_fall_through_to_next_source() {
        let bag = json!({
            "data": { "token": "   " },
            "properties": { "token": null },
            "context": { "apiToken": "ctx-token" }
        });
        let sources = InputSources::from_bag(&bag);
        let resolved = sources.resolve(InputKey::Token).unwrap();
        assert_eq!(resolved.source, Source::Context);
        assert_eq!(resolved.text().as_deref(), Some("ctx-token"));
    }

    #[test]
    fn key_matching_ignores_case() {
        let bag = json!({ "data": { "PhotoType": "Pictures" } });
        let sources = InputSources::from_bag(&bag);
        assert_eq!(
            sources.resolve_text(InputKey::PhotoType).as_deref(),
            Some("Pictures")
        );
    }

    #[test]
    fn list_wrapper_query_data_is_unwrapped() {
        let bag = json!({
            "keys": { "query": { "data": ["env", "domain"] } },
            "values": { "query": { "data": ["live", { "query": { "data": ["https://a.io"] } }] } }
        });
        let sources = InputSources::from_bag(&bag);
        assert_eq!(sources.resolve_text(InputKey::Env).as_deref(), Some("live"));
        assert_eq!(
            sources.resolve_text(InputKey::Domain).as_deref(),
            Some("https://a.io")
        );
    }

    #[test]
    fn environment_source_strips_prefix() {
        let sources = InputSources::default().with_environment(vec![
            ("PHOTO_WORKFLOW_TOKEN".to_string(), "env-token".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        let resolved = sources.resolve(InputKey::Token).unwrap();
        assert_eq!(resolved.source, Source::Environment);
        assert_eq!(resolved.value, json!("env-token"));
        assert_eq!(sources.environment.len(), 1);
    }

    #[test]
    fn heuristic_scan_finds_values_by_shape() {
        let bag = json!({
            "dataValues": [
                "live",
                "https://app.example.com",
                "abcdefghijklmnopqrstuvwxyz012345",
                "{\"version\":1,\"items\":[]}",
                "{\"Roof\":\"cf-1\"}",
                "{\"Roof\":\"photo-9\"}"
            ]
        });
        let sources = InputSources::from_bag(&bag);
        let env = sources.resolve(InputKey::Env).unwrap();
        assert_eq!(env.source, Source::Heuristic);
        assert_eq!(env.value, json!("live"));
        assert_eq!(
            sources.resolve_text(InputKey::Domain).as_deref(),
            Some("https://app.example.com")
        );
        assert_eq!(
            sources.resolve_text(InputKey::Token).as_deref(),
            Some("abcdefghijklmnopqrstuvwxyz012345")
        );
        assert!(looks_like_payload(
            &sources.resolve(InputKey::Payload).unwrap().value
        ));
        assert_eq!(
            sources.resolve_text(InputKey::CustomFieldMap).as_deref(),
            Some("{\"Roof\":\"cf-1\"}")
        );
        assert_eq!(
            sources.resolve_text(InputKey::CreatedPhotoMap).as_deref(),
            Some("{\"Roof\":\"photo-9\"}")
        );
    }

    #[test]
    fn unresolvable_key_returns_none() {
        let sources = InputSources::from_bag(&json!({ "dataValues": ["short"] }));
        assert!(sources.resolve(InputKey::Token).is_none());
        assert!(sources.resolve(InputKey::PhotoType).is_none());
        assert!(InputSources::from_bag(&json!("not an object"))
            .resolve(InputKey::Payload)
            .is_none());
    }

    #[test]
    fn token_predicate_rejects_urls_json_and_whitespace() {
        assert!(looks_like_token(&json!("0123456789abcdef0123")));
        assert!(!looks_like_token(&json!("0123456789abcdef012")));
        assert!(!looks_like_token(&json!("https://example.com/some/long/path")));
        assert!(!looks_like_token(&json!("has some whitespace inside it ok")));
        assert!(!looks_like_token(&json!("{\"a\":\"bbbbbbbbbbbbbbbbbbbb\"}")));
        assert!(!looks_like_token(&json!(12345678901234567890u64)));
    }

    #[test]
    fn env_and_map_predicates() {
        assert!(looks_like_env(&json!(" Version-Test ")));
        assert!(!looks_like_env(&json!("staging")));
        assert!(looks_like_json_map(&json!({ "a": "b" })));
        assert!(!looks_like_json_map(&json!({ "items": [] })));
        assert!(!looks_like_json_map(&json!("[1,2]")));
        assert!(looks_like_payload(&json!({ "items": [] })));
        assert!(!looks_like_payload(&json!({ "items": "nope" })));
    }

    #[test]
    fn map_slots_skip_maps_supplied_directly() {
        let bag = json!({
            "data": { "customFieldMapJson": "{\"Roof\":\"cf-1\"}" },
            "dataValues": ["{\"Roof\":\"photo-9\"}"]
        });
        let sources = InputSources::from_bag(&bag);
        let created = sources.resolve(InputKey::CreatedPhotoMap).unwrap();
        assert_eq!(created.source, Source::Heuristic);
        assert_eq!(created.value, json!("{\"Roof\":\"photo-9\"}"));

        let bag = json!({
            "data": { "customFieldMapJson": { "Roof": "cf-1" } },
            "dataValues": ["{\"Roof\":\"cf-1\"}", "{\"Roof\":\"photo-9\"}"]
        });
        let sources = InputSources::from_bag(&bag);
        assert_eq!(
            sources.resolve_text(InputKey::CreatedPhotoMap).as_deref(),
            Some("{\"Roof\":\"photo-9\"}")
        );

        let bag = json!({
            "data": { "createdPhotoMapJson": "{\"Roof\":\"photo-9\"}" },
            "dataValues": ["{\"Roof\":\"photo-9\"}", "{\"Roof\":\"cf-1\"}"]
        });
        let sources = InputSources::from_bag(&bag);
        assert_eq!(
            sources.resolve_text(InputKey::CustomFieldMap).as_deref(),
            Some("{\"Roof\":\"cf-1\"}")
        );
    }

    #[test]
    fn trace_reports_sources() {
        let bag = json!({ "data": { "token": "t" }, "properties": { "env": "live" } });
        let trace = InputSources::from_bag(&bag).trace();
        assert!(trace.contains(&(InputKey::Token, Some(Source::Data))));
        assert!(trace.contains(&(InputKey::Env, Some(Source::Properties))));
        assert!(trace.contains(&(InputKey::Domain, None)));
    }
}
