//! Chunked file upload engine.
//!
//! Files at or below the direct threshold go up in one request; larger files
//! are split into fixed-size chunks that are sent concurrently and committed
//! with a finalize call. Every transmission in a batch, chunk or whole file,
//! passes through one shared [`ConcurrencyLimiter`].
//!
//! The HTTP side lives behind the [`Transmitter`] trait so the engine can be
//! driven by any transport.

pub mod coordinator;
pub mod error;
pub mod limiter;
pub mod planner;
pub mod progress;
pub mod session;
pub mod source;
pub mod transmitter;
pub mod types;
pub mod validation;

pub use coordinator::{OutcomeStream, TaskOutcome, UploadBatchCoordinator, ROOT_FOLDER_ID};
pub use error::{humanize, TransmitError, UploadError, UploadResult, ValidationError};
pub use limiter::{ConcurrencyLimiter, Permit, DEFAULT_MAX_CONCURRENT};
pub use planner::{plan, ChunkDescriptor, Strategy, UploadLimits};
pub use progress::ProgressAggregator;
pub use session::{SessionPhase, SessionReport, UploadSession, UploadSessionState};
pub use source::{ByteSource, FileSource, MemorySource};
pub use transmitter::{ByteProgress, ChunkRequest, FileMeta, FinalizeRequest, Transmitter};
pub use types::{
    category_for_mime, BatchStats, FileRecord, ProgressUpdate, UploadEvent, UploadFile,
    UploadStatus, UploadTask,
};
pub use validation::{format_size, FileCandidate, UploadPolicy};
