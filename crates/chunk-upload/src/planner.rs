//! Chunk planning: direct vs chunked strategy and byte-range layout

use serde::{Deserialize, Serialize};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Direct upload threshold used when the server config is unavailable (50MB)
pub const DEFAULT_DIRECT_THRESHOLD: u64 = 50 * BYTES_PER_MB;

/// Chunk size used when the server config is unavailable (10MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * BYTES_PER_MB;

/// Size parameters for [`plan`], normally fetched from the server once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    pub direct_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
}

impl UploadLimits {
    /// Saturates at `u64::MAX` bytes; use [`UploadLimits::checked_from_mb`] to reject such values
    pub fn from_mb(direct_threshold_mb: u64, chunk_size_mb: u64) -> Self {
        Self {
            direct_threshold_bytes: direct_threshold_mb.saturating_mul(BYTES_PER_MB),
            chunk_size_bytes: chunk_size_mb.saturating_mul(BYTES_PER_MB),
        }
    }

    /// `None` if either value overflows when converted to bytes
    pub fn checked_from_mb(direct_threshold_mb: u64, chunk_size_mb: u64) -> Option<Self> {
        Some(Self {
            direct_threshold_bytes: direct_threshold_mb.checked_mul(BYTES_PER_MB)?,
            chunk_size_bytes: chunk_size_mb.checked_mul(BYTES_PER_MB)?,
        })
    }

    pub fn plan(&self, file_size: u64) -> Strategy {
        plan(file_size, self.direct_threshold_bytes, self.chunk_size_bytes)
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            direct_threshold_bytes: DEFAULT_DIRECT_THRESHOLD,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// One contiguous byte range `[start_offset, end_offset)` of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl ChunkDescriptor {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Chunked(Vec<ChunkDescriptor>),
}

impl Strategy {
    pub fn total_chunks(&self) -> u32 {
        match self {
            Strategy::Direct => 0,
            Strategy::Chunked(chunks) => chunks.len() as u32,
        }
    }
}

/// Decides how a file of `file_size` bytes is sent.
///
/// Files up to and including `direct_threshold` go in one request. Larger files are
/// split into `ceil(file_size / chunk_size)` ranges covering `[0, file_size)`.
/// A `chunk_size` of 0 is treated as [`DEFAULT_CHUNK_SIZE`].
pub fn plan(file_size: u64, direct_threshold: u64, chunk_size: u64) -> Strategy {
    if file_size <= direct_threshold {
        return Strategy::Direct;
    }

    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };

    let total = file_size.div_ceil(chunk_size);
    let chunks = (0..total)
        .map(|i| {
            let start = i * chunk_size;
            ChunkDescriptor {
                index: i as u32,
                start_offset: start,
                end_offset: std::cmp::min(start + chunk_size, file_size),
            }
        })
        .collect();

    Strategy::Chunked(chunks)
}
