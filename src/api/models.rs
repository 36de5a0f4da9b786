use serde::{Deserialize, Serialize};

/// Body of a non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
}

/// `GET /system/config`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemConfig {
    #[serde(rename = "maxDirectUploadSizeMB")]
    pub max_direct_upload_size_mb: u64,
    #[serde(rename = "maxChunkSizeMB")]
    pub max_chunk_size_mb: u64,
}
