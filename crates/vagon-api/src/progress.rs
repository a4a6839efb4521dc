//! Per-job progress state and event streams.
//!
//! Every processing job owns a snapshot (served to pollers), an append-only
//! event history and a live broadcast channel. Events carry a per-job `seq`
//! so a subscriber that falls behind the live channel is caught up from the
//! history without gaps or duplicates. The `stream_end` event is always the
//! last event of a job.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;
use vagon_core::models::{JobStatus, Outcome};

const LIVE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Progress,
    DetectionUpdate,
    FinalResult,
    DbRecordCreated,
    NoDetectionFinal,
    DbError,
    Error,
    StreamEnd,
}

impl JobEventKind {
    /// SSE event name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Progress => "progress",
            JobEventKind::DetectionUpdate => "detection_update",
            JobEventKind::FinalResult => "final_result",
            JobEventKind::DbRecordCreated => "db_record_created",
            JobEventKind::NoDetectionFinal => "no_detection_final",
            JobEventKind::DbError => "db_error",
            JobEventKind::Error => "error",
            JobEventKind::StreamEnd => "stream_end",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobEvent {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub processing_id: Uuid,
    #[schema(value_type = Object)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BestComposite {
    pub numero: String,
    pub confianza: f32,
    pub frame_index: u64,
}

/// Latest known state of a processing job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobSnapshot {
    pub processing_id: Uuid,
    pub file_id: String,
    pub status: JobStatus,
    /// Frames analyzed so far
    pub frame_cursor: u64,
    pub total_frames: Option<u64>,
    /// Frames with at least one candidate
    pub detections: u64,
    pub frames_failed: u64,
    pub best: Option<BestComposite>,
    pub outcome: Option<Outcome>,
    pub message: Option<String>,
    pub record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    /// The job already reached a terminal state
    AlreadyFinished(JobStatus),
    /// The result is being persisted and can no longer be withdrawn
    TooLate,
    NotFound,
}

struct JobEntry {
    snapshot: JobSnapshot,
    history: Vec<JobEvent>,
    sender: broadcast::Sender<JobEvent>,
    cancel: CancellationToken,
    committing: bool,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn push(&mut self, kind: JobEventKind, data: Value) -> u64 {
        let event = JobEvent {
            seq: self.history.len() as u64 + 1,
            kind,
            processing_id: self.snapshot.processing_id,
            data,
            timestamp: Utc::now(),
        };
        let seq = event.seq;
        self.history.push(event.clone());
        // No live subscribers is fine; the history keeps the event
        let _ = self.sender.send(event);
        seq
    }

    fn terminate(&mut self, status: JobStatus, message: Option<String>) {
        let now = Utc::now();
        self.snapshot.status = status;
        if message.is_some() {
            self.snapshot.message = message.clone();
        }
        self.snapshot.updated_at = now;
        self.finished_at = Some(Instant::now());
        self.push(
            JobEventKind::StreamEnd,
            serde_json::json!({ "status": status, "message": message }),
        );
    }
}

pub struct ProgressHub {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    retention: Duration,
}

impl ProgressHub {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a queued job and return its cancellation token.
    pub fn register(&self, processing_id: Uuid, file_id: &str) -> CancellationToken {
        let now = Utc::now();
        let (sender, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let entry = JobEntry {
            snapshot: JobSnapshot {
                processing_id,
                file_id: file_id.to_string(),
                status: JobStatus::Queued,
                frame_cursor: 0,
                total_frames: None,
                detections: 0,
                frames_failed: 0,
                best: None,
                outcome: None,
                message: None,
                record_id: None,
                created_at: now,
                updated_at: now,
            },
            history: Vec::new(),
            sender,
            cancel: cancel.clone(),
            committing: false,
            finished_at: None,
        };
        self.jobs().insert(processing_id, entry);
        cancel
    }

    pub fn snapshot(&self, processing_id: Uuid) -> Option<JobSnapshot> {
        self.jobs().get(&processing_id).map(|e| e.snapshot.clone())
    }

    /// Mutate the snapshot of a live job. Terminal jobs are left untouched.
    pub fn update<F>(&self, processing_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut JobSnapshot),
    {
        let mut jobs = self.jobs();
        match jobs.get_mut(&processing_id) {
            Some(entry) if !entry.snapshot.status.is_terminal() => {
                f(&mut entry.snapshot);
                entry.snapshot.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Append an event to a live job. Returns its seq, or `None` when the
    /// job is unknown or its stream already ended.
    pub fn publish(&self, processing_id: Uuid, kind: JobEventKind, data: Value) -> Option<u64> {
        let mut jobs = self.jobs();
        let entry = jobs.get_mut(&processing_id)?;
        if entry.snapshot.status.is_terminal() {
            return None;
        }
        Some(entry.push(kind, data))
    }

    /// Move a job to a terminal state and close its stream. Returns false if
    /// the job had already finished (for example, it was cancelled).
    pub fn finish(&self, processing_id: Uuid, status: JobStatus, message: Option<String>) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(&processing_id) {
            Some(entry) if !entry.snapshot.status.is_terminal() => {
                entry.terminate(status, message);
                tracing::info!(processing_id = %processing_id, status = %status, "Processing job finished");
                true
            }
            _ => false,
        }
    }

    /// Claim the right to persist a result. Once claimed, cancellation is
    /// refused; a job that was already cancelled cannot claim it.
    pub fn begin_commit(&self, processing_id: Uuid) -> bool {
        let mut jobs = self.jobs();
        match jobs.get_mut(&processing_id) {
            Some(entry) if !entry.snapshot.status.is_terminal() && !entry.cancel.is_cancelled() => {
                entry.committing = true;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self, processing_id: Uuid) -> CancelResult {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(&processing_id) else {
            return CancelResult::NotFound;
        };
        if entry.snapshot.status.is_terminal() {
            return CancelResult::AlreadyFinished(entry.snapshot.status);
        }
        if entry.committing {
            return CancelResult::TooLate;
        }
        entry.cancel.cancel();
        entry.terminate(
            JobStatus::Cancelled,
            Some("Procesamiento cancelado por el cliente".to_string()),
        );
        tracing::info!(processing_id = %processing_id, "Processing job cancelled");
        CancelResult::Cancelled
    }

    /// Cancel every live job created from an upload.
    pub fn cancel_by_file(&self, file_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .jobs()
            .values()
            .filter(|e| e.snapshot.file_id == file_id && !e.snapshot.status.is_terminal())
            .map(|e| e.snapshot.processing_id)
            .collect();
        ids.into_iter()
            .filter(|id| self.cancel(*id) == CancelResult::Cancelled)
            .count()
    }

    pub fn cancel_token(&self, processing_id: Uuid) -> Option<CancellationToken> {
        self.jobs().get(&processing_id).map(|e| e.cancel.clone())
    }

    /// Subscribe to a job's events starting from the first one.
    pub fn subscribe(self: &Arc<Self>, processing_id: Uuid) -> Option<JobSubscription> {
        let jobs = self.jobs();
        let entry = jobs.get(&processing_id)?;
        // Taken under the same lock as publishing, so history and the live
        // channel neither overlap unseen nor leave a gap
        let rx = entry.sender.subscribe();
        let backlog: VecDeque<JobEvent> = entry.history.iter().cloned().collect();
        Some(JobSubscription {
            hub: Arc::clone(self),
            processing_id,
            backlog,
            rx,
            last_seq: 0,
            done: false,
        })
    }

    fn events_after(&self, processing_id: Uuid, seq: u64) -> Vec<JobEvent> {
        self.jobs()
            .get(&processing_id)
            .map(|e| e.history.iter().skip(seq as usize).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop terminal jobs older than the retention period.
    pub fn evict_expired(&self) -> usize {
        let retention = self.retention;
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, e| e.finished_at.is_none_or(|at| at.elapsed() < retention));
        before - jobs.len()
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs()
            .values()
            .filter(|e| !e.snapshot.status.is_terminal())
            .count()
    }

    pub fn spawn_evictor(self: Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Finished processing jobs evicted");
                        }
                    }
                }
            }
        })
    }
}

/// Ordered, at-least-once view of one job's events. Ends after `stream_end`.
pub struct JobSubscription {
    hub: Arc<ProgressHub>,
    processing_id: Uuid,
    backlog: VecDeque<JobEvent>,
    rx: broadcast::Receiver<JobEvent>,
    last_seq: u64,
    done: bool,
}

impl JobSubscription {
    /// Skip events the client already saw, as named by `Last-Event-ID`.
    pub fn resume_after(mut self, seq: u64) -> Self {
        self.last_seq = seq;
        // Resuming past the end of a finished job yields nothing more
        if self
            .backlog
            .iter()
            .any(|e| e.kind == JobEventKind::StreamEnd && e.seq <= seq)
        {
            self.done = true;
        }
        self
    }

    fn deliver(&mut self, event: JobEvent) -> JobEvent {
        self.last_seq = event.seq;
        if event.kind == JobEventKind::StreamEnd {
            self.done = true;
        }
        event
    }

    fn refill(&mut self) -> bool {
        let missed = self.hub.events_after(self.processing_id, self.last_seq);
        let any = !missed.is_empty();
        self.backlog.extend(missed);
        any
    }

    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            if self.done {
                return None;
            }

            if let Some(event) = self.backlog.pop_front() {
                if event.seq > self.last_seq {
                    return Some(self.deliver(event));
                }
                continue;
            }

            match self.rx.recv().await {
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) if event.seq == self.last_seq + 1 => return Some(self.deliver(event)),
                Ok(_) => {
                    self.refill();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        processing_id = %self.processing_id,
                        skipped,
                        "Subscriber lagged, catching up from history"
                    );
                    self.refill();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if !self.refill() {
                        self.done = true;
                    }
                }
            }
        }
    }
}
