//! Per-file upload state machine
//!
//! `Planning -> Transmitting -> Finalizing -> Completed`, or `Failed` from any
//! step. Chunks are dispatched together and gated only by the shared limiter,
//! so they may complete in any order. The first failed chunk fails the whole
//! file; failed chunks are not retried.

use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Once};

use crate::error::{UploadError, UploadResult};
use crate::limiter::ConcurrencyLimiter;
use crate::planner::{ChunkDescriptor, Strategy, UploadLimits};
use crate::source::ByteSource;
use crate::transmitter::{ByteProgress, ChunkRequest, FileMeta, FinalizeRequest, Transmitter};
use crate::types::{FileRecord, UploadEvent, UploadFile};

/// Receives session events, normally forwarding them to a progress aggregator
pub type EventSink = Arc<dyn Fn(UploadEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Planning,
    Transmitting,
    Finalizing,
    Completed,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }
}

/// Bookkeeping for a chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSessionState {
    pub upload_id: String,
    pub total_chunks: u32,
    pub completed_chunks: BTreeSet<u32>,
    pub failed_chunks: BTreeSet<u32>,
    pub finalized: bool,
}

impl UploadSessionState {
    pub fn new(upload_id: String, total_chunks: u32) -> Self {
        Self {
            upload_id,
            total_chunks,
            completed_chunks: BTreeSet::new(),
            failed_chunks: BTreeSet::new(),
            finalized: false,
        }
    }

    /// Returns false if the chunk is unknown or already marked failed
    pub fn mark_completed(&mut self, index: u32) -> bool {
        if index >= self.total_chunks || self.failed_chunks.contains(&index) {
            return false;
        }
        self.completed_chunks.insert(index)
    }

    /// Returns false if the chunk is unknown or already marked completed
    pub fn mark_failed(&mut self, index: u32) -> bool {
        if index >= self.total_chunks || self.completed_chunks.contains(&index) {
            return false;
        }
        self.failed_chunks.insert(index)
    }

    pub fn ready_to_finalize(&self) -> bool {
        self.failed_chunks.is_empty() && self.completed_chunks.len() as u32 == self.total_chunks
    }
}

/// Emits [`UploadEvent::Started`] once, when the first transmission is admitted
struct StartSignal {
    once: Once,
    events: EventSink,
}

impl StartSignal {
    fn new(events: EventSink) -> Self {
        Self {
            once: Once::new(),
            events,
        }
    }

    fn fire(&self) {
        self.once.call_once(|| (self.events)(UploadEvent::Started));
    }
}

/// Everything a session needs besides its file; shared across a batch
#[derive(Clone)]
pub struct SessionContext {
    pub folder_id: String,
    pub limits: UploadLimits,
    pub limiter: ConcurrencyLimiter,
    pub transmitter: Arc<dyn Transmitter>,
}

/// Final phase, chunk bookkeeping and result of one session
#[derive(Debug)]
pub struct SessionReport {
    pub phase: SessionPhase,
    pub state: Option<UploadSessionState>,
    pub result: UploadResult<FileRecord>,
}

pub struct UploadSession {
    task_id: String,
    file: UploadFile,
    ctx: SessionContext,
    events: EventSink,
    phase: SessionPhase,
    state: Option<UploadSessionState>,
}

/// Fresh correlation id for one chunked upload attempt
pub fn new_upload_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

impl UploadSession {
    pub fn new(task_id: String, file: UploadFile, ctx: SessionContext, events: EventSink) -> Self {
        Self {
            task_id,
            file,
            ctx,
            events,
            phase: SessionPhase::Planning,
            state: None,
        }
    }

    /// Runs the session to a terminal phase. The session is consumed, so a
    /// finished upload cannot transmit again.
    ///
    /// The task stays pending until the limiter admits its first transmission.
    pub async fn run(mut self) -> SessionReport {
        let result = match self.ctx.limits.plan(self.file.size()) {
            Strategy::Direct => self.run_direct().await,
            Strategy::Chunked(chunks) => self.run_chunked(chunks).await,
        };

        match &result {
            Ok(_) => self.enter(SessionPhase::Completed),
            Err(err) => {
                warn!("upload_session: {} failed: {}", self.task_id, err);
                self.enter(SessionPhase::Failed);
            }
        }

        SessionReport {
            phase: self.phase,
            state: self.state,
            result,
        }
    }

    fn meta(&self) -> FileMeta {
        FileMeta {
            file_name: self.file.name.clone(),
            file_size: self.file.size(),
            mime_type: self.file.mime_type.clone(),
        }
    }

    fn enter(&mut self, next: SessionPhase) {
        info!(
            "upload_session: {} {:?} -> {:?}",
            self.task_id, self.phase, next
        );
        self.phase = next;
    }

    async fn run_direct(&mut self) -> UploadResult<FileRecord> {
        self.enter(SessionPhase::Transmitting);
        let meta = self.meta();

        let result = {
            let _permit = self.ctx.limiter.acquire().await?;
            (self.events)(UploadEvent::Started);
            let data = self.file.source.read_all().await?;

            let sink = self.events.clone();
            let progress: ByteProgress =
                Arc::new(move |sent, total| sink(UploadEvent::BytesSent { sent, total }));

            self.ctx
                .transmitter
                .send_whole(&self.ctx.folder_id, &meta, data, progress)
                .await
        };

        match result {
            Ok(record) => {
                (self.events)(UploadEvent::Finalized {
                    record: record.clone(),
                });
                Ok(record)
            }
            Err(error) => {
                (self.events)(UploadEvent::DirectFailed {
                    error: error.clone(),
                });
                Err(UploadError::Direct(error))
            }
        }
    }

    async fn run_chunked(&mut self, chunks: Vec<ChunkDescriptor>) -> UploadResult<FileRecord> {
        let mut state = UploadSessionState::new(new_upload_id(), chunks.len() as u32);
        info!(
            "upload_session: {} chunked upload {} ({} chunks, {} bytes)",
            self.task_id,
            state.upload_id,
            state.total_chunks,
            self.file.size()
        );
        let result = self.drive_chunks(&mut state, chunks).await;
        self.state = Some(state);
        result
    }

    async fn drive_chunks(
        &mut self,
        state: &mut UploadSessionState,
        chunks: Vec<ChunkDescriptor>,
    ) -> UploadResult<FileRecord> {
        self.enter(SessionPhase::Transmitting);
        let total_chunks = state.total_chunks;
        let meta = self.meta();
        let started = Arc::new(StartSignal::new(self.events.clone()));

        let mut in_flight: FuturesUnordered<_> = chunks
            .into_iter()
            .map(|chunk| {
                let limiter = self.ctx.limiter.clone();
                let transmitter = self.ctx.transmitter.clone();
                let source = self.file.source.clone();
                let folder_id = self.ctx.folder_id.clone();
                let upload_id = state.upload_id.clone();
                let meta = (chunk.index == 0).then(|| meta.clone());
                let started = started.clone();

                async move {
                    let result = transmit_chunk(
                        &limiter,
                        transmitter.as_ref(),
                        source.as_ref(),
                        ChunkJob {
                            folder_id: &folder_id,
                            upload_id: &upload_id,
                            chunk,
                            total_chunks,
                            meta: meta.as_ref(),
                            started: &started,
                        },
                    )
                    .await;
                    (chunk.index, result)
                }
            })
            .collect();

        while let Some((index, result)) = in_flight.next().await {
            match result {
                Ok(()) => {
                    state.mark_completed(index);
                    (self.events)(UploadEvent::ChunkCompleted {
                        index,
                        total_chunks,
                    });
                }
                Err(err) => {
                    state.mark_failed(index);
                    if let UploadError::Chunk { source, .. } = &err {
                        (self.events)(UploadEvent::ChunkFailed {
                            index,
                            error: source.clone(),
                        });
                    }
                    // Dropping the set stops every chunk not yet finished.
                    return Err(err);
                }
            }
        }
        drop(in_flight);

        if !state.ready_to_finalize() {
            return Err(UploadError::IncompleteChunks {
                completed: state.completed_chunks.len() as u32,
                total: total_chunks,
            });
        }

        self.enter(SessionPhase::Finalizing);
        let request = FinalizeRequest { meta, total_chunks };
        match self
            .ctx
            .transmitter
            .finalize(&self.ctx.folder_id, &state.upload_id, &request)
            .await
        {
            Ok(record) => {
                state.finalized = true;
                (self.events)(UploadEvent::Finalized {
                    record: record.clone(),
                });
                Ok(record)
            }
            Err(error) => {
                warn!(
                    "upload_session: {} finalize failed, chunks left under upload {}",
                    self.task_id, state.upload_id
                );
                (self.events)(UploadEvent::FinalizeFailed {
                    error: error.clone(),
                });
                Err(UploadError::Finalize {
                    upload_id: state.upload_id.clone(),
                    source: error,
                })
            }
        }
    }
}

struct ChunkJob<'a> {
    folder_id: &'a str,
    upload_id: &'a str,
    chunk: ChunkDescriptor,
    total_chunks: u32,
    meta: Option<&'a FileMeta>,
    started: &'a StartSignal,
}

/// Holds a permit for the read and the send of one chunk
async fn transmit_chunk(
    limiter: &ConcurrencyLimiter,
    transmitter: &dyn Transmitter,
    source: &dyn ByteSource,
    job: ChunkJob<'_>,
) -> UploadResult<()> {
    let _permit = limiter.acquire().await?;
    job.started.fire();
    let data = source
        .read_range(job.chunk.start_offset, job.chunk.end_offset)
        .await?;

    transmitter
        .send_chunk(ChunkRequest {
            folder_id: job.folder_id,
            upload_id: job.upload_id,
            chunk: job.chunk,
            total_chunks: job.total_chunks,
            meta: job.meta,
            data,
        })
        .await
        .map_err(|source| UploadError::Chunk {
            index: job.chunk.index,
            source,
        })
}
