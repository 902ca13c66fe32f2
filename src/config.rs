//! Configuration: YAML defaults file plus the per-run [`RunConfig`].
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::inputs::{InputKey, InputSources};
use crate::model::{LogDetail, OutputShape, UploadMode, VerifyMode};

pub const DEFAULT_DOMAIN: &str = "https://gaiasphere.io";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("API token is empty; supply `token` in the input or bubble.token in config")]
    MissingToken,
}

/// Root configuration struct mirroring the YAML schema. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub bubble: Bubble,
}

/// Run-level behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub domain: String,
    pub env: String,
    pub http_timeout_secs: u64,
    pub max_log_chars: usize,
    pub output_shape: OutputShape,
    pub log_detail: LogDetail,
}

impl Default for App {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.into(),
            env: "version-test".into(),
            http_timeout_secs: 60,
            max_log_chars: 20_000,
            output_shape: OutputShape::Legacy,
            log_detail: LogDetail::Summary,
        }
    }
}

/// Remote object store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Bubble {
    pub token: Option<String>,
    pub photo_type: String,
    pub fields: PhotoFields,
    pub upload_mode: UploadMode,
    pub upload_token_in_query: bool,
    pub verify_after_write: bool,
    pub verify_mode: VerifyMode,
}

impl Default for Bubble {
    fn default() -> Self {
        Self {
            token: None,
            photo_type: "Photos".into(),
            fields: PhotoFields::default(),
            upload_mode: UploadMode::Multipart,
            upload_token_in_query: false,
            verify_after_write: false,
            verify_mode: VerifyMode::Ordered,
        }
    }
}

/// Field names on the photo object type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhotoFields {
    pub custom_field: String,
    pub urls: String,
    pub size: String,
}

impl Default for PhotoFields {
    fn default() -> Self {
        Self {
            custom_field: "CustomField".into(),
            urls: "Urls".into(),
            size: "Size".into(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Like [`load`], but a missing default file yields built-in defaults.
/// An explicitly given path must exist.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(p) => load(Some(p)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load(None),
        None => Ok(Config::default()),
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.domain.trim().is_empty() {
        return Err(ConfigError::Invalid("app.domain must be non-empty"));
    }
    if cfg.app.http_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_secs must be > 0"));
    }
    if cfg.app.max_log_chars < 200 {
        return Err(ConfigError::Invalid("app.max_log_chars must be >= 200"));
    }
    if cfg.bubble.photo_type.trim().is_empty() {
        return Err(ConfigError::Invalid("bubble.photo_type must be non-empty"));
    }
    let f = &cfg.bubble.fields;
    if f.custom_field.trim().is_empty() {
        return Err(ConfigError::Invalid("bubble.fields.custom_field must be non-empty"));
    }
    if f.urls.trim().is_empty() {
        return Err(ConfigError::Invalid("bubble.fields.urls must be non-empty"));
    }
    if f.size.trim().is_empty() {
        return Err(ConfigError::Invalid("bubble.fields.size must be non-empty"));
    }
    Ok(())
}

/// Example YAML content, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  domain: "https://gaiasphere.io"
  env: "version-test"
  http_timeout_secs: 60
  max_log_chars: 20000
  output_shape: legacy
  log_detail: summary

bubble:
  # usually supplied per run through the input bag
  token: null
  photo_type: "Photos"
  fields:
    custom_field: "CustomField"
    urls: "Urls"
    size: "Size"
  upload_mode: multipart
  upload_token_in_query: false
  verify_after_write: false
  verify_mode: ordered
"#
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Live,
    VersionTest,
}

impl Environment {
    /// `live`, `prod`, `production` (optionally `version-` prefixed) are live;
    /// anything else is the test version.
    pub fn parse_loose(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let stripped = lowered.strip_prefix("version-").unwrap_or(&lowered);
        match stripped {
            "live" | "prod" | "production" => Environment::Live,
            _ => Environment::VersionTest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::VersionTest => "version-test",
        }
    }
}

/// Trim, drop trailing slashes, add `https://` to bare hosts.
pub fn normalize_domain(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

pub fn api_base(domain: &str, env: Environment) -> String {
    match env {
        Environment::VersionTest => format!("{}/version-test/api/1.1", domain),
        Environment::Live => format!("{}/api/1.1", domain),
    }
}

/// Immutable configuration for one batch, built once from the defaults file and
/// the resolved inputs.
#[derive(Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub env: Environment,
    pub domain: String,
    pub token: String,
    pub photo_type: String,
    pub fields: PhotoFields,
    pub attach_to: Option<String>,
    pub upload_mode: UploadMode,
    pub upload_token_in_query: bool,
    pub verify_after_write: bool,
    pub verify_mode: VerifyMode,
    pub log_detail: LogDetail,
    pub output_shape: OutputShape,
    pub max_log_chars: usize,
    pub http_timeout: Duration,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("env", &self.env)
            .field("domain", &self.domain)
            .field("photo_type", &self.photo_type)
            .field("fields", &self.fields)
            .field("attach_to", &self.attach_to)
            .field("upload_mode", &self.upload_mode)
            .field("verify_after_write", &self.verify_after_write)
            .finish_non_exhaustive()
    }
}

impl RunConfig {
    /// Input values win over the defaults file. Fails only when no token is found.
    pub fn resolve(defaults: &Config, sources: &InputSources) -> Result<Self, ConfigError> {
        let pick = |key: InputKey, fallback: &str| -> String {
            sources
                .resolve_text(key)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.trim().to_string())
        };

        let token = sources
            .resolve_text(InputKey::Token)
            .or_else(|| defaults.bubble.token.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let env = Environment::parse_loose(&pick(InputKey::Env, &defaults.app.env));
        let domain = normalize_domain(&pick(InputKey::Domain, &defaults.app.domain));
        let fields = PhotoFields {
            custom_field: pick(InputKey::FieldCustomField, &defaults.bubble.fields.custom_field),
            urls: pick(InputKey::FieldUrls, &defaults.bubble.fields.urls),
            size: pick(InputKey::FieldSize, &defaults.bubble.fields.size),
        };

        Ok(Self {
            env,
            domain,
            token,
            photo_type: pick(InputKey::PhotoType, &defaults.bubble.photo_type),
            fields,
            attach_to: sources
                .resolve_text(InputKey::OrganisationId)
                .filter(|s| !s.is_empty()),
            upload_mode: defaults.bubble.upload_mode,
            upload_token_in_query: defaults.bubble.upload_token_in_query,
            verify_after_write: defaults.bubble.verify_after_write,
            verify_mode: defaults.bubble.verify_mode,
            log_detail: defaults.app.log_detail,
            output_shape: defaults.app.output_shape,
            max_log_chars: defaults.app.max_log_chars,
            http_timeout: Duration::from_secs(defaults.app.http_timeout_secs),
        })
    }

    /// Data API root, e.g. `https://app.io/version-test/api/1.1`.
    pub fn api_base(&self) -> String {
        api_base(&self.domain, self.env)
    }

    pub fn fileupload_url(&self) -> String {
        let url = match self.env {
            Environment::VersionTest => format!("{}/version-test/fileupload", self.domain),
            Environment::Live => format!("{}/fileupload", self.domain),
        };
        if self.upload_token_in_query {
            format!("{}?api_token={}", url, self.token)
        } else {
            url
        }
    }
}
