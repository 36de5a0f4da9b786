//! Byte sources a file's data is read from

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Random-access, read-only handle to a file's bytes
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `[start, end)`. Fails if the range runs past the end.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;

    /// Reads the whole content
    async fn read_all(&self) -> io::Result<Vec<u8>> {
        self.read_range(0, self.len()).await
    }
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        self.data
            .get(start as usize..end as usize)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range {}..{} outside {} bytes", start, end, self.data.len()),
                )
            })
    }
}

/// File on disk; each range read opens, seeks and reads exactly
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Captures the file size at open time
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a file: {}", path.display()),
            ));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        if end < start || end > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {}..{} outside {} bytes", start, end, self.len),
            ));
        }
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }
}
