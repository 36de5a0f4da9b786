//! Upload task records, events and batch statistics

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::TransmitError;
use crate::source::ByteSource;

/// Committed file record returned by the server (`FileInfo`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: serde_json::Value,
    pub owner_id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<serde_json::Value>,
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub mime_type: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Success | UploadStatus::Error)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Success => write!(f, "success"),
            UploadStatus::Error => write!(f, "error"),
        }
    }
}

/// A file selected for upload, before it is handed to a coordinator
#[derive(Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub source: Arc<dyn ByteSource>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, source: Arc<dyn ByteSource>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source,
        }
    }

    pub fn size(&self) -> u64 {
        self.source.len()
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

/// Per-file upload state owned by the coordinator
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub status: UploadStatus,
    pub progress_percent: f64,
    pub last_error: Option<String>,
}

impl UploadTask {
    pub fn new(id: String, file: &UploadFile) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size_bytes: file.size(),
            mime_type: file.mime_type.clone(),
            status: UploadStatus::Pending,
            progress_percent: 0.0,
            last_error: None,
        }
    }
}

/// Lifecycle event emitted by an upload session
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started,
    /// Byte-level progress of a direct upload
    BytesSent { sent: u64, total: u64 },
    ChunkCompleted { index: u32, total_chunks: u32 },
    ChunkFailed { index: u32, error: TransmitError },
    DirectFailed { error: TransmitError },
    /// The record is committed, either by finalize or by a direct upload response
    Finalized { record: FileRecord },
    FinalizeFailed { error: TransmitError },
}

/// Progress notification delivered to collaborators
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub percent: f64,
    pub status: UploadStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub error: usize,
}

impl BatchStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a UploadTask>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut stats, task| {
            stats.total += 1;
            match task.status {
                UploadStatus::Pending => stats.pending += 1,
                UploadStatus::Uploading => stats.uploading += 1,
                UploadStatus::Success => stats.success += 1,
                UploadStatus::Error => stats.error += 1,
            }
            stats
        })
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }
}

/// Category for a MIME type, matching the server's classification
pub fn category_for_mime(mime_type: &str) -> &'static str {
    match mime_type.split('/').next().unwrap_or_default() {
        "image" => "image",
        "video" => "video",
        "audio" => "audio",
        "text" => "text",
        _ => "other",
    }
}
