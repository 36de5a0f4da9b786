//! Per-file progress and status, driven by session events

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::error::UploadError;
use crate::types::{BatchStats, FileRecord, ProgressUpdate, UploadEvent, UploadStatus, UploadTask};

/// Share of progress covered by chunk transmission; finalize takes the rest
pub const CHUNK_PHASE_PERCENT: f64 = 90.0;

/// Owns the task table and turns [`UploadEvent`]s into progress.
///
/// Percent values never decrease for a task, whatever order events arrive in.
/// Batch statistics are derived from task states on every query.
pub struct ProgressAggregator {
    inner: Mutex<AggregatorInner>,
    listener: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

#[derive(Default)]
struct AggregatorInner {
    tasks: HashMap<String, UploadTask>,
    order: Vec<String>,
    completed_chunks: HashMap<String, HashSet<u32>>,
}

impl ProgressAggregator {
    pub fn new(listener: Option<mpsc::UnboundedSender<ProgressUpdate>>) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner::default()),
            listener,
        }
    }

    pub fn register(&self, task: UploadTask) {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&task.id) {
            inner.order.push(task.id.clone());
        }
        inner.tasks.insert(task.id.clone(), task);
    }

    /// Applies one session event
    pub fn apply(&self, task_id: &str, event: &UploadEvent) {
        let update = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(task) = inner.tasks.get_mut(task_id) else {
                debug!("progress: event for unknown task {}", task_id);
                return;
            };
            if task.status.is_terminal() {
                return;
            }

            let completed = match event {
                UploadEvent::ChunkCompleted { index, total_chunks } => {
                    let set = inner
                        .completed_chunks
                        .entry(task_id.to_string())
                        .or_default();
                    set.insert(*index);
                    Some((set.len(), *total_chunks))
                }
                _ => None,
            };

            let before = (task.status, task.progress_percent);
            match event {
                UploadEvent::Started => {
                    task.status = UploadStatus::Uploading;
                }
                UploadEvent::BytesSent { sent, total } => {
                    task.status = UploadStatus::Uploading;
                    if *total > 0 {
                        raise(task, *sent as f64 * 100.0 / *total as f64);
                    }
                }
                UploadEvent::ChunkCompleted { .. } => {
                    task.status = UploadStatus::Uploading;
                    if let Some((done, total)) = completed {
                        if total > 0 {
                            raise(task, done as f64 * CHUNK_PHASE_PERCENT / total as f64);
                        }
                    }
                }
                UploadEvent::Finalized { .. } => {
                    raise(task, 100.0);
                    task.status = UploadStatus::Success;
                }
                UploadEvent::ChunkFailed { error, .. }
                | UploadEvent::DirectFailed { error }
                | UploadEvent::FinalizeFailed { error } => {
                    task.status = UploadStatus::Error;
                    task.last_error = Some(error.user_message());
                }
            }

            let update = if before == (task.status, task.progress_percent) {
                None
            } else {
                Some(update_for(task))
            };
            if task.status.is_terminal() {
                inner.completed_chunks.remove(task_id);
            }
            update
        };

        if let Some(update) = update {
            self.notify(update);
        }
    }

    /// Records the terminal result of a task.
    ///
    /// Covers failures that never produced a transmission event, such as
    /// validation or read errors.
    pub fn settle(&self, task_id: &str, result: &Result<FileRecord, UploadError>) {
        let update = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.completed_chunks.remove(task_id);
            let Some(task) = inner.tasks.get_mut(task_id) else {
                return;
            };
            if task.status.is_terminal() {
                return;
            }
            match result {
                Ok(_) => {
                    raise(task, 100.0);
                    task.status = UploadStatus::Success;
                }
                Err(err) => {
                    task.status = UploadStatus::Error;
                    task.last_error = Some(err.user_message());
                }
            }
            update_for(task)
        };
        self.notify(update);
    }

    pub fn task(&self, task_id: &str) -> Option<UploadTask> {
        let inner = self.lock();
        inner.tasks.get(task_id).cloned()
    }

    /// Tasks in registration order
    pub fn snapshot(&self) -> Vec<UploadTask> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect()
    }

    pub fn stats(&self) -> BatchStats {
        let inner = self.lock();
        BatchStats::from_tasks(inner.tasks.values())
    }

    /// Drops every task, e.g. when the batch view is dismissed
    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = AggregatorInner::default();
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, update: ProgressUpdate) {
        if let Some(listener) = &self.listener {
            let _ = listener.send(update);
        }
    }
}

fn raise(task: &mut UploadTask, percent: f64) {
    let percent = percent.clamp(0.0, 100.0);
    if percent > task.progress_percent {
        task.progress_percent = percent;
    }
}

fn update_for(task: &UploadTask) -> ProgressUpdate {
    ProgressUpdate {
        task_id: task.id.clone(),
        percent: task.progress_percent,
        status: task.status,
        error: task.last_error.clone(),
    }
}
