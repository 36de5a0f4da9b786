//! Entry point for callers: builds coordinators with server limits and uploads files

use chunk_upload::{FileSource, ProgressUpdate, TaskOutcome, UploadBatchCoordinator, UploadFile};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::{fetch_upload_limits, ApiClient, MediaTransmitter};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

pub struct Uploader {
    config: ClientConfig,
    client: ApiClient,
    transmitter: Arc<MediaTransmitter>,
}

impl Uploader {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = ApiClient::new(&config)?;
        let transmitter = Arc::new(MediaTransmitter::new(client.clone()));
        Ok(Self {
            config,
            client,
            transmitter,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Fetches the server's upload limits and returns a coordinator using them.
    ///
    /// Limits are read once here; a coordinator never refetches them.
    pub async fn prepare(&self) -> UploadBatchCoordinator {
        let limits = fetch_upload_limits(&self.client, self.config.fallback_limits()).await;
        UploadBatchCoordinator::new(self.transmitter.clone(), limits, self.config.max_concurrent)
            .with_policy(self.config.policy.clone())
    }

    /// Same as [`Uploader::prepare`], with progress updates sent to `listener`
    pub async fn prepare_with_listener(
        &self,
        listener: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> UploadBatchCoordinator {
        self.prepare().await.with_listener(listener)
    }

    /// Uploads a batch and waits until every file has settled
    pub async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        folder_id: Option<&str>,
    ) -> ClientResult<Vec<TaskOutcome>> {
        let coordinator = self.prepare().await;
        Ok(coordinator.run_to_end(files, folder_id).await?)
    }

    /// Opens each path and uploads the files as one batch
    pub async fn upload_paths(
        &self,
        paths: &[PathBuf],
        folder_id: Option<&str>,
    ) -> ClientResult<Vec<TaskOutcome>> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(open_file(path).await?);
        }
        info!("uploader: {} paths queued", files.len());
        self.upload_files(files, folder_id).await
    }
}

/// Opens a file on disk, taking its name and MIME type from the path
pub async fn open_file(path: impl AsRef<Path>) -> ClientResult<UploadFile> {
    let path = path.as_ref();
    let source = FileSource::open(path)
        .await
        .map_err(|source| ClientError::Source {
            path: path.to_path_buf(),
            source,
        })?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let mime_type = detect_content_type(&name).unwrap_or("application/octet-stream");
    Ok(UploadFile::new(name, mime_type, Arc::new(source)))
}

/// MIME type from a file name extension
pub fn detect_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        Some("svg") => Some("image/svg+xml"),
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        Some("mov") => Some("video/quicktime"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("ogg") => Some("audio/ogg"),
        Some("txt" | "log") => Some("text/plain"),
        Some("md") => Some("text/markdown"),
        Some("csv") => Some("text/csv"),
        Some("html" | "htm") => Some("text/html"),
        Some("pdf") => Some("application/pdf"),
        Some("doc") => Some("application/msword"),
        Some("docx") => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        Some("xls") => Some("application/vnd.ms-excel"),
        Some("xlsx") => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        Some("zip") => Some("application/zip"),
        Some("rar") => Some("application/x-rar-compressed"),
        Some("7z") => Some("application/x-7z-compressed"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_content_type_known() {
        assert_eq!(detect_content_type("photo.JPG"), Some("image/jpeg"));
        assert_eq!(detect_content_type("notes.txt"), Some("text/plain"));
        assert_eq!(detect_content_type("archive.7z"), Some("application/x-7z-compressed"));
    }

    #[test]
    fn detect_content_type_unknown() {
        assert_eq!(detect_content_type("binary"), None);
        assert_eq!(detect_content_type("setup.exe"), None);
    }

    #[tokio::test]
    async fn open_file_reads_name_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 42]).unwrap();

        let file = open_file(&path).await.unwrap();
        assert_eq!(file.name, "clip.mp4");
        assert_eq!(file.mime_type, "video/mp4");
        assert_eq!(file.size(), 42);
    }

    #[tokio::test]
    async fn open_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_file(dir.path().join("gone.txt")).await.unwrap_err();
        assert!(matches!(err, ClientError::Source { .. }));
    }
}
