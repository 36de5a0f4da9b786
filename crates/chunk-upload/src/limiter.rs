//! Batch-wide admission gate for transmissions

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{UploadError, UploadResult};

/// Default number of transmissions in flight across a batch
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Counting semaphore bounding in-flight transmissions.
///
/// Waiters are admitted in FIFO order. A permit is returned when the
/// [`Permit`] guard drops, so an erroring transmission cannot leak it.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Scoped admission; releases on drop
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// `max_concurrent` of 0 is raised to 1
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Waits until a permit is free
    pub async fn acquire(&self) -> UploadResult<Permit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| UploadError::LimiterClosed)?;
        Ok(Permit { _permit: permit })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.available()
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}
