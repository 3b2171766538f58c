use std::path::PathBuf;

use thiserror::Error;

/// Errors raised anywhere below the session loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not locate the executable directory: {0}")]
    ExecutableDir(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{0}")]
    Backend(String),

    #[error("malformed backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// A command payload that could not be turned into its typed form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("entry {index} has unsupported role '{role}'")]
    Role { index: usize, role: String },

    #[error("entry {index} is missing '{field}'")]
    MissingField { index: usize, field: &'static str },
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Json(err.to_string())
    }
}
