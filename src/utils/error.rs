//! Crate-wide error type
//!
//! Library code returns [`AgronomicareError`]; the binaries wrap it in
//! `anyhow` at the top level.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgronomicareError {
    /// An image file on disk could not be opened or decoded
    #[error("cannot read image {0:?}: {1}")]
    ImageLoadError(PathBuf, String),

    /// Uploaded bytes are not a supported image
    #[error("cannot decode image: {0}")]
    ImageDecode(String),

    #[error("dataset: {0}")]
    Dataset(String),

    /// Building, saving or restoring a classifier
    #[error("model: {0}")]
    Model(String),

    #[error("training: {0}")]
    Training(String),

    #[error("inference: {0}")]
    Inference(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed remedy table
    #[error("remedy table: {0}")]
    Csv(#[from] csv::Error),

    /// JSON catalogs, configs and histories
    #[error("serialization: {0}")]
    Serialization(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no such file or directory: {0:?}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for AgronomicareError {
    fn from(err: serde_json::Error) -> Self {
        AgronomicareError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgronomicareError>;
