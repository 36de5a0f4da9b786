use chunk_upload::{TransmitError, ValidationError};
use std::path::PathBuf;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base url: {0}")]
    BaseUrl(String),

    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to open {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] TransmitError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
