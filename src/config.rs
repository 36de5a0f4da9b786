//! Client configuration, passed explicitly to [`crate::Uploader`]

use chunk_upload::{UploadLimits, UploadPolicy, DEFAULT_MAX_CONCURRENT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_DIRECT_UPLOAD_MB: u64 = 50;
pub const DEFAULT_CHUNK_MB: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API root, e.g. `https://vault.example.com/api/v1`
    pub base_url: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Used when `/system/config` cannot be fetched
    #[serde(default = "default_direct_upload_mb")]
    pub fallback_direct_upload_mb: u64,
    #[serde(default = "default_chunk_mb")]
    pub fallback_chunk_mb: u64,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub policy: UploadPolicy,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_direct_upload_mb() -> u64 {
    DEFAULT_DIRECT_UPLOAD_MB
}

fn default_chunk_mb() -> u64 {
    DEFAULT_CHUNK_MB
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            fallback_direct_upload_mb: DEFAULT_DIRECT_UPLOAD_MB,
            fallback_chunk_mb: DEFAULT_CHUNK_MB,
            request_timeout_secs: None,
            policy: UploadPolicy::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Reads a JSON config file
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ClientError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ClientConfig =
            serde_json::from_str(&text).map_err(|source| ClientError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ClientError::BaseUrl(self.base_url.clone()));
        }
        Ok(())
    }

    /// Limits used when the server does not report its own
    pub fn fallback_limits(&self) -> UploadLimits {
        UploadLimits::from_mb(self.fallback_direct_upload_mb, self.fallback_chunk_mb)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
