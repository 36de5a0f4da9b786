//! reqwest implementation of the upload [`Transmitter`]

use async_trait::async_trait;
use chunk_upload::{
    ByteProgress, ChunkRequest, FileMeta, FileRecord, FinalizeRequest, TransmitError, Transmitter,
};
use futures_util::stream::{self, Stream, StreamExt};
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::client::{decode_json, ApiClient};

/// Granularity of byte progress for whole-file uploads
const PROGRESS_PIECE: usize = 64 * 1024;

/// Sends files to the `media/folders/{folderId}/files` endpoints
#[derive(Debug, Clone)]
pub struct MediaTransmitter {
    client: ApiClient,
}

impl MediaTransmitter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn files_path(folder_id: &str) -> String {
    format!("media/folders/{}/files", folder_id)
}

fn with_mime(part: Part, mime_type: &str) -> Result<Part, TransmitError> {
    part.mime_str(mime_type)
        .map_err(|e| TransmitError::Request(format!("mime type {}: {}", mime_type, e)))
}

/// Splits `data` into pieces, reporting `(sent, total)` as each one is pulled
fn progress_stream(
    data: Vec<u8>,
    progress: ByteProgress,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    let total = data.len() as u64;
    let sent = Arc::new(AtomicU64::new(0));
    let pieces: Vec<Vec<u8>> = data.chunks(PROGRESS_PIECE).map(<[u8]>::to_vec).collect();

    stream::iter(pieces).map(move |piece| {
        let len = piece.len() as u64;
        let now = sent.fetch_add(len, Ordering::SeqCst) + len;
        progress(now, total);
        Ok(piece)
    })
}

#[async_trait]
impl Transmitter for MediaTransmitter {
    async fn send_whole(
        &self,
        folder_id: &str,
        meta: &FileMeta,
        data: Vec<u8>,
        progress: ByteProgress,
    ) -> Result<FileRecord, TransmitError> {
        let total = data.len() as u64;
        let part = Part::stream_with_length(Body::wrap_stream(progress_stream(data, progress)), total)
            .file_name(meta.file_name.clone());
        let form = Form::new().part("file", with_mime(part, &meta.mime_type)?);

        debug!("media_upload_start: {} bytes={}", meta.file_name, total);
        let response = self.client.post_form(&files_path(folder_id), form).await?;
        decode_json(response).await
    }

    async fn send_chunk(&self, request: ChunkRequest<'_>) -> Result<(), TransmitError> {
        let file_name = request
            .meta
            .map(|meta| meta.file_name.clone())
            .unwrap_or_else(|| "blob".to_string());
        let chunk = Part::bytes(request.data).file_name(file_name);
        let mut form = Form::new()
            .part("chunk", with_mime(chunk, "application/octet-stream")?)
            .text("uploadId", request.upload_id.to_string())
            .text("chunkIndex", request.chunk.index.to_string())
            .text("totalChunks", request.total_chunks.to_string());
        if let Some(meta) = request.meta {
            form = form
                .text("fileName", meta.file_name.clone())
                .text("fileSize", meta.file_size.to_string())
                .text("mimeType", meta.mime_type.clone());
        }

        let path = format!("{}/chunks", files_path(request.folder_id));
        self.client.post_form(&path, form).await?;
        debug!(
            "media_chunk_done: {} {}/{}",
            request.upload_id,
            request.chunk.index + 1,
            request.total_chunks
        );
        Ok(())
    }

    async fn finalize(
        &self,
        folder_id: &str,
        upload_id: &str,
        request: &FinalizeRequest,
    ) -> Result<FileRecord, TransmitError> {
        let path = format!("{}/chunks/{}/finalize", files_path(folder_id), upload_id);
        self.client.post_json(&path, request).await
    }
}
