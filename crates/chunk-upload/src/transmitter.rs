//! Transport seam: one attempt per call, no retry

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::error::TransmitError;
use crate::planner::ChunkDescriptor;
use crate::types::FileRecord;

/// Byte-level progress callback: `(sent, total)`
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// File metadata sent with the first chunk and with finalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

/// One chunk of a chunked upload
#[derive(Debug, Clone)]
pub struct ChunkRequest<'a> {
    pub folder_id: &'a str,
    pub upload_id: &'a str,
    pub chunk: ChunkDescriptor,
    pub total_chunks: u32,
    /// Present on chunk 0 only
    pub meta: Option<&'a FileMeta>,
    pub data: Vec<u8>,
}

/// Body of the finalize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[serde(flatten)]
    pub meta: FileMeta,
    pub total_chunks: u32,
}

/// Sends upload requests to the remote store.
///
/// Every method performs exactly one attempt. Retry policy, if any, belongs to
/// the caller.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Whole-file upload; the returned record is already committed
    async fn send_whole(
        &self,
        folder_id: &str,
        meta: &FileMeta,
        data: Vec<u8>,
        progress: ByteProgress,
    ) -> Result<FileRecord, TransmitError>;

    /// One chunk; success is a bare acknowledgement
    async fn send_chunk(&self, request: ChunkRequest<'_>) -> Result<(), TransmitError>;

    /// Asks the server to assemble every chunk stored under `upload_id`
    async fn finalize(
        &self,
        folder_id: &str,
        upload_id: &str,
        request: &FinalizeRequest,
    ) -> Result<FileRecord, TransmitError>;
}
