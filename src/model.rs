use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one batch invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ConfigResolved,
    PayloadParsed,
    ItemProcessing,
    Done,
    ConfigMissing,
    PayloadMissing,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::ConfigResolved => "config_resolved",
            RunState::PayloadParsed => "payload_parsed",
            RunState::ItemProcessing => "item_processing",
            RunState::Done => "done",
            RunState::ConfigMissing => "config_missing",
            RunState::PayloadMissing => "payload_missing",
        }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, RunState::ConfigMissing | RunState::PayloadMissing)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigError,
    PayloadError,
    MappingError,
    UploadError,
    WriteError,
    VerificationMismatch,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::PayloadError => "PayloadError",
            ErrorKind::MappingError => "MappingError",
            ErrorKind::UploadError => "UploadError",
            ErrorKind::WriteError => "WriteError",
            ErrorKind::VerificationMismatch => "VerificationMismatch",
        }
    }
}

/// One entry of the ordered error list carried by [`RunResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub item: Option<usize>,
    pub message: String,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item {
            Some(idx) => write!(f, "[{}] item {}: {}", self.kind.as_str(), idx, self.message),
            None => write!(f, "[{}] {}", self.kind.as_str(), self.message),
        }
    }
}

/// Accumulated outcome of a batch. Returned even when the run stops early.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub run_id: String,
    pub state: RunState,
    pub created_ids: Vec<String>,
    pub updated_ids: Vec<String>,
    pub uploaded_urls: Vec<String>,
    pub log_lines: Vec<String>,
    pub errors: Vec<RunError>,
}

impl RunResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Idle,
            created_ids: Vec::new(),
            updated_ids: Vec::new(),
            uploaded_urls: Vec::new(),
            log_lines: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &RunError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

/// How much per-file detail goes into the run log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogDetail {
    #[default]
    Summary,
    Verbose,
}

/// Shape of the JSON document handed back to the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    /// `{ createdPhotoIds, updatedPhotoIds, photoIds, log }`
    #[default]
    Legacy,
    /// `{ output1, outputlist1 }`
    Toolbox,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// multipart/form-data with a single `file` part
    #[default]
    Multipart,
    /// JSON `{ name, contents }` with inline base64
    Json,
}

/// Comparison used by the post-write read-back.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    #[default]
    Ordered,
    Unordered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_error_display_includes_kind_and_item() {
        let err = RunError {
            kind: ErrorKind::MappingError,
            item: Some(2),
            message: "missing key \"Roof\"".into(),
        };
        assert_eq!(err.to_string(), "[MappingError] item 2: missing key \"Roof\"");

        let err = RunError {
            kind: ErrorKind::ConfigError,
            item: None,
            message: "token empty".into(),
        };
        assert_eq!(err.to_string(), "[ConfigError] token empty");
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::ConfigMissing.is_terminal_failure());
        assert!(RunState::PayloadMissing.is_terminal_failure());
        assert!(!RunState::Done.is_terminal_failure());
    }

    #[test]
    fn enums_deserialize_from_snake_case() {
        let shape: OutputShape = serde_yaml::from_str("toolbox").unwrap();
        assert_eq!(shape, OutputShape::Toolbox);
        let mode: VerifyMode = serde_yaml::from_str("unordered").unwrap();
        assert_eq!(mode, VerifyMode::Unordered);
        let detail: LogDetail = serde_yaml::from_str("verbose").unwrap();
        assert_eq!(detail, LogDetail::Verbose);
    }
}
