//! Error types for each pipeline stage.
//!
//! Config, fetch and export errors abort a run. Normalization errors are
//! per-row: the row is skipped and counted.

use std::path::PathBuf;
use thiserror::Error;

/// A required setting is missing or malformed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    MissingVar(&'static str),

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Retrieving or unwrapping a source payload failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected response shape from {url}: {message}")]
    Shape { url: String, message: String },

    #[error("failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid source URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// A single raw row could not be turned into a typed record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("field '{field}' has unusable value {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("embedded data payload is malformed: {0}")]
    InvalidData(String),
}

/// Writing a report table or archive failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ExportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Any error that aborts a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Export(#[from] ExportError),
}
