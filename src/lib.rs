//! SkyVault upload client.
//!
//! [`Uploader`] is the entry point: it reads the server's upload limits, then
//! drives batches through the [`chunk_upload`] engine using
//! [`api::MediaTransmitter`] for the HTTP side.

pub mod api;
pub mod config;
pub mod error;
pub mod uploader;

pub use chunk_upload;
pub use chunk_upload::{
    BatchStats, FileRecord, ProgressUpdate, TaskOutcome, UploadError, UploadFile, UploadPolicy,
    UploadStatus, UploadTask,
};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use uploader::{detect_content_type, open_file, Uploader};
