use std::path::PathBuf;

use crate::outcome::FailureReason;

/// Errors that stop a tool or a whole batch.
///
/// Per-item problems never show up here: they are recorded as
/// [`crate::Outcome::Failure`] and the batch carries on. The one exception is
/// [`Error::Escalated`], produced when a batch runs under
/// [`crate::executor::FailurePolicy::Abort`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("output partition {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch {batch} aborted at item {index}: {reason}")]
    Escalated {
        batch: String,
        index: usize,
        reason: FailureReason,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Error processing file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>, source: Error) -> Self {
        Self::File {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
