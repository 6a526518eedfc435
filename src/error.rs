use std::path::PathBuf;

use thiserror::Error;

/// Unified result type for the experiment crate.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Errors surfaced while setting up or running a session.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("eye tracker error: {0}")]
    Device(String),
    #[error("display error: {0}")]
    Display(String),
    #[error("failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("session aborted: {0}")]
    Aborted(String),
    #[error("scripted input exhausted while waiting for a key")]
    InputExhausted,
}
