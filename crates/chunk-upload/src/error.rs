//! Error taxonomy for the upload engine

use thiserror::Error;

pub type UploadResult<T> = Result<T, UploadError>;

/// Generic user-facing message, also used for unrecognized server codes
pub const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

pub const NETWORK_MESSAGE: &str = "Network error. Please check your connection and try again.";

/// Failure of a single transmission attempt (one chunk, one whole file, or a finalize call)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransmitError {
    /// Transport level failure: DNS, connect, timeout, broken body
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status
    #[error("HTTP {status}{}", code_suffix(.code))]
    Http { status: u16, code: Option<String> },

    /// The server answered 2xx but the body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request could not be built, e.g. a malformed MIME type
    #[error("invalid request: {0}")]
    Request(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl TransmitError {
    /// Server-provided error code, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            TransmitError::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Humanized message keyed by the server error code
    pub fn user_message(&self) -> String {
        match self {
            TransmitError::Network(_) => NETWORK_MESSAGE.to_string(),
            TransmitError::Http { code, .. } => humanize(code.as_deref()).to_string(),
            TransmitError::Decode(_) | TransmitError::Request(_) => GENERIC_MESSAGE.to_string(),
        }
    }
}

/// Client-side rejection, detected before any network call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File name \"{name}\" is invalid. Max length is {max_len}.")]
    InvalidName { name: String, max_len: usize },

    #[error("File \"{name}\" is too large. Max size is {limit}.")]
    FileTooLarge { name: String, limit: String },

    #[error("File type \"{mime_type}\" is not supported.")]
    DisallowedType { mime_type: String },

    #[error("Duplicate file \"{name}\" in the same folder is not allowed.")]
    DuplicateName { name: String },

    #[error("Too many files selected. Max is {max} files.")]
    TooManyFiles { max: usize },

    #[error("Total size of all files is too large. Max is {limit}.")]
    TotalTooLarge { limit: String },

    #[error("Please select at least one file")]
    Empty,
}

/// Terminal error of one file's upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: u32,
        #[source]
        source: TransmitError,
    },

    #[error("upload failed: {0}")]
    Direct(#[source] TransmitError),

    /// All chunks were accepted but the server did not commit them.
    /// The chunks stay orphaned under `upload_id` until the server collects them.
    #[error("finalize failed for upload {upload_id}: {source}")]
    Finalize {
        upload_id: String,
        #[source]
        source: TransmitError,
    },

    #[error("only {completed} of {total} chunks were accepted")]
    IncompleteChunks { completed: u32, total: u32 },

    #[error("failed to read file data: {0}")]
    Source(#[from] std::io::Error),

    #[error("concurrency limiter closed")]
    LimiterClosed,

    /// The spawned upload task panicked or was aborted by its runtime
    #[error("upload task stopped unexpectedly: {0}")]
    TaskFailed(String),
}

impl UploadError {
    /// The transmission error behind this failure, if any
    pub fn transmit_error(&self) -> Option<&TransmitError> {
        match self {
            UploadError::Chunk { source, .. }
            | UploadError::Direct(source)
            | UploadError::Finalize { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_finalize(&self) -> bool {
        matches!(self, UploadError::Finalize { .. })
    }

    /// Humanized message for display next to the file
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Validation(err) => err.to_string(),
            other => other
                .transmit_error()
                .map(TransmitError::user_message)
                .unwrap_or_else(|| GENERIC_MESSAGE.to_string()),
        }
    }
}

/// Maps a server error code to a user-visible message
pub fn humanize(code: Option<&str>) -> &'static str {
    match code.unwrap_or_default() {
        "COMMON_DUPLICATE_DATA" => "A file with this name already exists in this folder.",
        "COMMON_NO_DATA" => "The target folder no longer exists.",
        "COMMON_INVALID_VALUE" => "Please check your input and try again.",
        "COMMON_NO_ACCESS" => "You do not have access to this folder.",
        "MEDIA_FILE_SIZE_LIMIT_EXCEEDED" => "The file is larger than the server allows.",
        "STORAGE_QUOTA_EXCEEDED" => "Your storage quota has been exceeded.",
        "AUTH_INVALID_TOKEN" => "Your session is invalid. Please sign in again.",
        "AUTH_TOKEN_EXPIRED" => "Your session has expired. Please sign in again.",
        _ => GENERIC_MESSAGE,
    }
}
