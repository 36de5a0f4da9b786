use async_trait::async_trait;
use futures_util::StreamExt;
use chunk_upload::{
    category_for_mime, BatchStats, ByteProgress, ChunkRequest, FileMeta, FileRecord,
    FinalizeRequest, MemorySource, SessionPhase, TaskOutcome, TransmitError, Transmitter,
    UploadBatchCoordinator, UploadError, UploadFile, UploadLimits, UploadStatus,
    ValidationError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// 100 byte direct threshold, 40 byte chunks: a 160 byte file is 4 chunks
const LIMITS: UploadLimits = UploadLimits {
    direct_threshold_bytes: 100,
    chunk_size_bytes: 40,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Whole {
        folder: String,
        name: String,
    },
    Chunk {
        folder: String,
        tag: u8,
        index: u32,
        total: u32,
        has_meta: bool,
    },
    Finalize {
        folder: String,
        name: String,
        total: u32,
    },
}

/// In-process transmitter. Every byte of a file equals its tag, so chunks
/// without metadata can still be traced back to their file.
#[derive(Default)]
struct ScriptedTransmitter {
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    failing_chunks: HashSet<(u8, u32)>,
    failing_finalize: HashSet<String>,
    failing_whole: HashSet<String>,
    chunk_delay_ms: u64,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransmitter {
    fn enter(&self, call: Call) -> InFlight<'_> {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn chunk_calls(&self, tag: u8) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Chunk { tag: t, index, .. } if t == tag => Some(index),
                _ => None,
            })
            .collect()
    }

    fn finalized_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Finalize { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

fn record(folder_id: &str, meta: &FileMeta) -> FileRecord {
    FileRecord {
        id: serde_json::json!(1),
        owner_id: serde_json::json!(1),
        folder_id: Some(serde_json::json!(folder_id)),
        name: meta.file_name.clone(),
        size: meta.file_size,
        extension: None,
        mime_type: meta.mime_type.clone(),
        category: category_for_mime(&meta.mime_type).to_string(),
        preview: None,
        created_at: "2025-01-01T00:00:00Z".into(),
        updated_at: "2025-01-01T00:00:00Z".into(),
    }
}

fn server_error(code: &str) -> TransmitError {
    TransmitError::Http {
        status: 500,
        code: Some(code.to_string()),
    }
}

#[async_trait]
impl Transmitter for ScriptedTransmitter {
    async fn send_whole(
        &self,
        folder_id: &str,
        meta: &FileMeta,
        data: Vec<u8>,
        progress: ByteProgress,
    ) -> Result<FileRecord, TransmitError> {
        let _guard = self.enter(Call::Whole {
            folder: folder_id.to_string(),
            name: meta.file_name.clone(),
        });
        let total = data.len() as u64;
        progress(total / 2, total);
        tokio::time::sleep(Duration::from_millis(self.chunk_delay_ms)).await;
        if self.failing_whole.contains(&meta.file_name) {
            return Err(server_error("COMMON_DUPLICATE_DATA"));
        }
        progress(total, total);
        Ok(record(folder_id, meta))
    }

    async fn send_chunk(&self, request: ChunkRequest<'_>) -> Result<(), TransmitError> {
        let tag = request.data.first().copied().unwrap_or_default();
        let index = request.chunk.index;
        let _guard = self.enter(Call::Chunk {
            folder: request.folder_id.to_string(),
            tag,
            index,
            total: request.total_chunks,
            has_meta: request.meta.is_some(),
        });
        // Later chunks finish first.
        let delay = self.chunk_delay_ms * u64::from(request.total_chunks - index);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if self.failing_chunks.contains(&(tag, index)) {
            return Err(server_error("COMMON_GENERIC_ERROR"));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        folder_id: &str,
        _upload_id: &str,
        request: &FinalizeRequest,
    ) -> Result<FileRecord, TransmitError> {
        self.calls.lock().unwrap().push(Call::Finalize {
            folder: folder_id.to_string(),
            name: request.meta.file_name.clone(),
            total: request.total_chunks,
        });
        if self.failing_finalize.contains(&request.meta.file_name) {
            return Err(TransmitError::Http {
                status: 507,
                code: Some("STORAGE_QUOTA_EXCEEDED".into()),
            });
        }
        Ok(record(folder_id, &request.meta))
    }
}

fn file(name: &str, tag: u8, size: usize) -> UploadFile {
    UploadFile::new(
        name,
        "application/zip",
        Arc::new(MemorySource::new(vec![tag; size])),
    )
}

fn coordinator(transmitter: &Arc<ScriptedTransmitter>, max_concurrent: usize) -> UploadBatchCoordinator {
    UploadBatchCoordinator::new(transmitter.clone(), LIMITS, max_concurrent)
}

fn by_name(outcomes: Vec<TaskOutcome>) -> HashMap<String, TaskOutcome> {
    outcomes.into_iter().map(|o| (o.name.clone(), o)).collect()
}

#[tokio::test(start_paused = true)]
async fn batch_in_flight_never_exceeds_limit() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 10,
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 2);

    let files = (1..=5u8)
        .map(|tag| file(&format!("f{tag}.zip"), tag, 160))
        .collect();
    let outcomes = coord.run_to_end(files, Some("7")).await.unwrap();

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(transmitter.peak.load(Ordering::SeqCst), 2);
    assert_eq!(transmitter.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(coord.limiter().available(), 2);
    assert_eq!(transmitter.finalized_names().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn failed_file_does_not_affect_siblings() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 5,
        failing_chunks: HashSet::from([(2, 2)]),
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 3);

    let files = vec![
        file("a.zip", 1, 160),
        file("b.zip", 2, 160),
        file("c.zip", 3, 160),
    ];
    let outcomes = by_name(coord.run_to_end(files, None).await.unwrap());

    assert!(outcomes["a.zip"].result.is_ok());
    assert!(outcomes["c.zip"].result.is_ok());

    let b = &outcomes["b.zip"];
    assert_eq!(b.phase, SessionPhase::Failed);
    assert!(matches!(
        b.result,
        Err(UploadError::Chunk { index: 2, .. })
    ));
    let state = b.state.as_ref().unwrap();
    assert!(state.failed_chunks.contains(&2));
    assert!(!state.finalized);

    let mut finalized = transmitter.finalized_names();
    finalized.sort();
    assert_eq!(finalized, vec!["a.zip", "c.zip"]);

    assert_eq!(
        coord.stats(),
        BatchStats {
            total: 3,
            pending: 0,
            uploading: 0,
            success: 2,
            error: 1,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_is_not_retried() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 5,
        failing_chunks: HashSet::from([(1, 3)]),
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 4);

    let outcomes = coord
        .run_to_end(vec![file("a.zip", 1, 160)], None)
        .await
        .unwrap();

    assert!(outcomes[0].result.is_err());
    let attempts = transmitter
        .chunk_calls(1)
        .into_iter()
        .filter(|index| *index == 3)
        .count();
    assert_eq!(attempts, 1);
    assert!(transmitter.finalized_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finalize_follows_every_chunk() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 5,
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 3);

    let outcomes = coord
        .run_to_end(vec![file("movie.zip", 9, 150)], Some("42"))
        .await
        .unwrap();
    let outcome = &outcomes[0];
    let record = outcome.result.as_ref().unwrap();
    assert_eq!(record.name, "movie.zip");
    assert_eq!(record.size, 150);
    assert_eq!(outcome.phase, SessionPhase::Completed);

    let state = outcome.state.as_ref().unwrap();
    assert_eq!(state.total_chunks, 4);
    assert_eq!(state.completed_chunks.len(), 4);
    assert!(state.finalized);

    let calls = transmitter.calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(
        calls.last(),
        Some(&Call::Finalize {
            folder: "42".into(),
            name: "movie.zip".into(),
            total: 4,
        })
    );
    for call in &calls[..4] {
        match call {
            Call::Chunk {
                folder,
                index,
                total,
                has_meta,
                ..
            } => {
                assert_eq!(folder, "42");
                assert_eq!(*total, 4);
                assert_eq!(*has_meta, *index == 0);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn finalize_failure_is_reported_separately() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 5,
        failing_finalize: HashSet::from(["big.zip".to_string()]),
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 3);

    let outcomes = coord
        .run_to_end(vec![file("big.zip", 4, 160)], None)
        .await
        .unwrap();
    let outcome = &outcomes[0];

    let err = outcome.result.as_ref().unwrap_err();
    assert!(err.is_finalize());
    let state = outcome.state.as_ref().unwrap();
    assert_eq!(state.completed_chunks.len(), 4);
    assert!(state.failed_chunks.is_empty());
    assert!(!state.finalized);

    let task = coord.task(&outcome.task_id).unwrap();
    assert_eq!(task.status, UploadStatus::Error);
    assert_eq!(task.progress_percent, 90.0);
    assert_eq!(
        task.last_error.as_deref(),
        Some("Your storage quota has been exceeded.")
    );
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_across_out_of_order_chunks() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 10,
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coord = coordinator(&transmitter, 4).with_listener(tx);

    coord
        .run_to_end(
            vec![file("a.zip", 1, 160), file("b.zip", 2, 200)],
            None,
        )
        .await
        .unwrap();

    let mut per_task: HashMap<String, Vec<(f64, UploadStatus)>> = HashMap::new();
    while let Ok(update) = rx.try_recv() {
        per_task
            .entry(update.task_id)
            .or_default()
            .push((update.percent, update.status));
    }
    assert_eq!(per_task.len(), 2);

    for updates in per_task.values() {
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
        let percents: Vec<f64> = updates.iter().map(|(p, _)| *p).collect();
        let ninety = percents.iter().position(|p| *p == 90.0).unwrap();
        let hundred = percents.iter().position(|p| *p == 100.0).unwrap();
        assert!(ninety < hundred);
        assert_eq!(updates.last().unwrap().1, UploadStatus::Success);
    }
}

#[tokio::test(start_paused = true)]
async fn direct_upload_reports_byte_progress() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 5,
        ..Default::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coord = coordinator(&transmitter, 2).with_listener(tx);

    let outcomes = coord
        .run_to_end(vec![file("small.zip", 1, 60)], None)
        .await
        .unwrap();
    assert!(outcomes[0].state.is_none());
    assert!(outcomes[0].result.is_ok());
    assert_eq!(
        transmitter.calls(),
        vec![Call::Whole {
            folder: "0".into(),
            name: "small.zip".into(),
        }]
    );

    let mut percents = Vec::new();
    while let Ok(update) = rx.try_recv() {
        percents.push(update.percent);
    }
    assert!(percents.contains(&50.0));
    assert_eq!(percents.last(), Some(&100.0));
}

#[tokio::test(start_paused = true)]
async fn direct_failure_uses_humanized_message() {
    let transmitter = Arc::new(ScriptedTransmitter {
        failing_whole: HashSet::from(["dup.zip".to_string()]),
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 2);

    let outcomes = coord
        .run_to_end(vec![file("dup.zip", 1, 10)], None)
        .await
        .unwrap();
    assert!(matches!(outcomes[0].result, Err(UploadError::Direct(_))));
    let task = coord.task(&outcomes[0].task_id).unwrap();
    assert_eq!(
        task.last_error.as_deref(),
        Some("A file with this name already exists in this folder.")
    );
}

#[tokio::test]
async fn invalid_file_never_reaches_transmitter() {
    let transmitter = Arc::new(ScriptedTransmitter::default());
    let coord = coordinator(&transmitter, 2);

    let files = vec![
        UploadFile::new(
            "setup.exe",
            "application/x-msdownload",
            Arc::new(MemorySource::new(vec![5u8; 10])),
        ),
        file("ok.zip", 6, 10),
    ];
    let outcomes = by_name(coord.run_to_end(files, None).await.unwrap());

    assert!(matches!(
        outcomes["setup.exe"].result,
        Err(UploadError::Validation(ValidationError::DisallowedType { .. }))
    ));
    assert!(outcomes["ok.zip"].result.is_ok());
    assert_eq!(
        transmitter.calls(),
        vec![Call::Whole {
            folder: "0".into(),
            name: "ok.zip".into(),
        }]
    );
}

#[tokio::test]
async fn batch_rule_rejects_whole_submission() {
    let transmitter = Arc::new(ScriptedTransmitter::default());
    let coord = coordinator(&transmitter, 2);

    let result = coord.submit(vec![file("a.zip", 1, 10), file("a.zip", 2, 10)], None);
    assert!(matches!(
        result,
        Err(ValidationError::DuplicateName { .. })
    ));
    assert!(coord.snapshot().is_empty());
    assert!(transmitter.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dispatched_uploads_all_settle() {
    // There is no abort hook: once submitted, every task runs to a terminal state.
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 3,
        failing_chunks: HashSet::from([(2, 0), (4, 1)]),
        failing_finalize: HashSet::from(["f3.zip".to_string()]),
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 3);

    let files = (1..=6u8)
        .map(|tag| file(&format!("f{tag}.zip"), tag, 120 + 40 * usize::from(tag)))
        .collect();
    let outcomes = coord.run_to_end(files, None).await.unwrap();

    assert_eq!(outcomes.len(), 6);
    assert!(outcomes.iter().all(|o| o.phase.is_terminal()));
    let stats = coord.stats();
    assert!(stats.is_settled());
    assert_eq!(stats.total, 6);
    assert_eq!(stats.error, 3);
    assert_eq!(
        coord
            .snapshot()
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>(),
        vec!["f1.zip", "f2.zip", "f3.zip", "f4.zip", "f5.zip", "f6.zip"]
    );
}

#[tokio::test(start_paused = true)]
async fn uploads_outlive_a_dropped_outcome_stream() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 100,
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 2);

    let mut outcomes = coord
        .submit(vec![file("small.zip", 1, 60), file("big.zip", 2, 400)], None)
        .unwrap();
    let first = outcomes.next().await.unwrap();
    assert_eq!(first.name, "small.zip");
    drop(outcomes);
    assert!(!coord.stats().is_settled());

    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = coord.stats();
    assert!(stats.is_settled());
    assert_eq!(stats.success, 2);
    assert_eq!(transmitter.chunk_calls(2).len(), 10);
    assert_eq!(transmitter.finalized_names(), vec!["big.zip"]);
    assert_eq!(coord.limiter().available(), 2);
}

#[tokio::test(start_paused = true)]
async fn queued_files_stay_pending_until_admitted() {
    let transmitter = Arc::new(ScriptedTransmitter {
        chunk_delay_ms: 100,
        ..Default::default()
    });
    let coord = coordinator(&transmitter, 2);

    let files = (1..=5u8)
        .map(|tag| file(&format!("f{tag}.zip"), tag, 60))
        .collect();
    let outcomes = coord.submit(files, None).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(
        coord.stats(),
        BatchStats {
            total: 5,
            pending: 3,
            uploading: 2,
            success: 0,
            error: 0,
        }
    );

    let outcomes: Vec<TaskOutcome> = outcomes.collect().await;
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
    assert_eq!(coord.stats().success, 5);
    assert_eq!(transmitter.peak.load(Ordering::SeqCst), 2);
}
