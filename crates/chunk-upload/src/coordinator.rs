//! Batch orchestration: one session per file, one limiter per batch

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{BoxStream, FuturesUnordered, StreamExt};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{UploadError, UploadResult, ValidationError};
use crate::limiter::ConcurrencyLimiter;
use crate::planner::UploadLimits;
use crate::progress::ProgressAggregator;
use crate::session::{EventSink, SessionContext, SessionPhase, UploadSession, UploadSessionState};
use crate::transmitter::Transmitter;
use crate::types::{BatchStats, FileRecord, ProgressUpdate, UploadEvent, UploadFile, UploadTask};
use crate::validation::{FileCandidate, UploadPolicy};

/// Folder id used when the caller does not name one
pub const ROOT_FOLDER_ID: &str = "0";

/// Settled result of one file in a batch
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: String,
    pub name: String,
    pub phase: SessionPhase,
    /// Present for chunked uploads only
    pub state: Option<UploadSessionState>,
    pub result: UploadResult<FileRecord>,
}

/// Outcomes in settlement order.
///
/// Each upload runs on its own spawned task, so dropping the stream only
/// discards the outcomes; the uploads still run and settle in the aggregator.
pub type OutcomeStream = BoxStream<'static, TaskOutcome>;

/// Accepts batches of files and drives them to completion.
///
/// Every batch shares one [`ConcurrencyLimiter`], so the bound applies to all
/// transmissions in flight, not to each file. A failing file never cancels or
/// blocks its siblings.
pub struct UploadBatchCoordinator {
    transmitter: Arc<dyn Transmitter>,
    limits: UploadLimits,
    limiter: ConcurrencyLimiter,
    policy: UploadPolicy,
    aggregator: Arc<ProgressAggregator>,
}

impl UploadBatchCoordinator {
    pub fn new(transmitter: Arc<dyn Transmitter>, limits: UploadLimits, max_concurrent: usize) -> Self {
        Self {
            transmitter,
            limits,
            limiter: ConcurrencyLimiter::new(max_concurrent),
            policy: UploadPolicy::default(),
            aggregator: Arc::new(ProgressAggregator::new(None)),
        }
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends a [`ProgressUpdate`] for every visible progress or status change
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        self.aggregator = Arc::new(ProgressAggregator::new(Some(listener)));
        self
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Registers one task per file, spawns its upload and returns the outcomes as they settle.
    ///
    /// Must be called from within a Tokio runtime. Batch rules (count, duplicate names, total size) reject the whole
    /// submission before any task is registered. A file failing its own checks
    /// settles as an error without touching the network.
    pub fn submit(
        &self,
        files: Vec<UploadFile>,
        folder_id: Option<&str>,
    ) -> Result<OutcomeStream, ValidationError> {
        {
            let candidates: Vec<FileCandidate<'_>> = files.iter().map(candidate).collect();
            self.policy.validate_batch_limits(&candidates)?;
        }

        let folder_id = folder_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(ROOT_FOLDER_ID)
            .to_string();
        info!(
            "upload_batch: {} files -> folder {} (max {} in flight)",
            files.len(),
            folder_id,
            self.limiter.max_concurrent()
        );

        let ctx = SessionContext {
            folder_id,
            limits: self.limits,
            limiter: self.limiter.clone(),
            transmitter: self.transmitter.clone(),
        };

        let outcomes: FuturesUnordered<BoxFuture<'static, TaskOutcome>> = files
            .into_iter()
            .map(|file| self.start_task(file, ctx.clone()))
            .collect();
        Ok(outcomes.boxed())
    }

    /// Submits a batch and waits for every file to settle
    pub async fn run_to_end(
        &self,
        files: Vec<UploadFile>,
        folder_id: Option<&str>,
    ) -> Result<Vec<TaskOutcome>, ValidationError> {
        let outcomes: Vec<TaskOutcome> = self.submit(files, folder_id)?.collect().await;
        let stats = self.stats();
        info!(
            "upload_batch: settled {} files ({} ok, {} failed)",
            outcomes.len(),
            stats.success,
            stats.error
        );
        Ok(outcomes)
    }

    pub fn task(&self, task_id: &str) -> Option<UploadTask> {
        self.aggregator.task(task_id)
    }

    /// Tasks in submission order
    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.aggregator.snapshot()
    }

    pub fn stats(&self) -> BatchStats {
        self.aggregator.stats()
    }

    /// Forgets every task; running uploads keep going but are no longer tracked
    pub fn clear(&self) {
        self.aggregator.clear();
    }

    fn start_task(&self, file: UploadFile, ctx: SessionContext) -> BoxFuture<'static, TaskOutcome> {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.aggregator.register(UploadTask::new(task_id.clone(), &file));

        if let Err(err) = self.policy.validate_file(&candidate(&file)) {
            warn!("upload_batch: {} rejected: {}", file.name, err);
            let result = Err(UploadError::Validation(err));
            self.aggregator.settle(&task_id, &result);
            return future::ready(TaskOutcome {
                task_id,
                name: file.name,
                phase: SessionPhase::Failed,
                state: None,
                result,
            })
            .boxed();
        }

        let aggregator = self.aggregator.clone();
        let events: EventSink = {
            let aggregator = aggregator.clone();
            let task_id = task_id.clone();
            Arc::new(move |event: UploadEvent| aggregator.apply(&task_id, &event))
        };
        let name = file.name.clone();
        let session = UploadSession::new(task_id.clone(), file, ctx, events);

        let handle = {
            let aggregator = aggregator.clone();
            let task_id = task_id.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let report = session.run().await;
                aggregator.settle(&task_id, &report.result);
                TaskOutcome {
                    task_id,
                    name,
                    phase: report.phase,
                    state: report.state,
                    result: report.result,
                }
            })
        };

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!("upload_batch: {} task died: {}", name, err);
                    let result = Err(UploadError::TaskFailed(err.to_string()));
                    aggregator.settle(&task_id, &result);
                    TaskOutcome {
                        task_id,
                        name,
                        phase: SessionPhase::Failed,
                        state: None,
                        result,
                    }
                }
            }
        }
        .boxed()
    }
}

fn candidate(file: &UploadFile) -> FileCandidate<'_> {
    FileCandidate {
        name: &file.name,
        size: file.size(),
        mime_type: &file.mime_type,
    }
}
