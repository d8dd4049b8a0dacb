//! Post-capture job engine.
//!
//! A bounded in-memory job table plus a FIFO channel feed exactly one worker
//! task, which walks each job through the pipeline stages. At most one
//! non-terminal job exists per video id; finished jobs stay queryable for a
//! day so the UI can poll their outcome.

pub mod stages;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stages::Collaborators;

/// How long terminal jobs stay queryable before eviction.
const FINISHED_JOB_RETENTION_HOURS: i64 = 24;

/// Where a job is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    CheckingDedup,
    Transcribing,
    Summarizing,
    Publishing,
    Completed,
    Skipped,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::CheckingDedup => "checking_dedup",
            Self::Transcribing => "transcribing",
            Self::Summarizing => "summarizing",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What the ingest side knows about a video when it enqueues work.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub video_id: String,
    pub title: String,
    pub channel: Option<String>,
}

/// One unit of post-capture work, observable through `job_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub video_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub state: JobState,
    pub attempt_count: u32,
    pub error: Option<String>,
    pub note_id: Option<String>,
    pub note_url: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Job {
    fn new(request: &JobRequest) -> Self {
        Self {
            video_id: request.video_id.clone(),
            title: request.title.clone(),
            channel: request.channel.clone(),
            state: JobState::Pending,
            attempt_count: 0,
            error: None,
            note_id: None,
            note_url: None,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Sequential job processor: FIFO order, one job at a time.
pub struct JobEngine {
    jobs: Mutex<HashMap<String, Job>>,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobEngine {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    /// Start the single worker task. Call once at startup.
    pub fn start(self: &Arc<Self>, collab: Arc<Collaborators>) {
        let mut rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("job engine already started");
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            log::info!("Job worker started");
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => {
                        engine.drain_on_shutdown(&mut rx);
                        break;
                    }
                    video_id = rx.recv() => {
                        match video_id {
                            Some(video_id) => engine.run_one(&video_id, &collab).await,
                            None => break,
                        }
                    }
                }
            }
            log::info!("Job worker stopped");
        });

        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Queue a job unless a non-terminal one already exists for this video.
    ///
    /// Finished jobs may be re-enqueued; the dedup stage will catch videos
    /// that already made it into the note store.
    pub fn enqueue(&self, request: JobRequest) -> bool {
        if request.video_id.trim().is_empty() {
            log::error!("Rejected job with empty video id");
            return false;
        }

        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.get(&request.video_id) {
            if !existing.state.is_terminal() {
                log::info!(
                    "Job for {} already queued with state {}",
                    request.video_id,
                    existing.state
                );
                return false;
            }
        }

        jobs.insert(request.video_id.clone(), Job::new(&request));
        drop(jobs);

        // Send after releasing the lock; a closed channel means shutdown.
        if self.tx.send(request.video_id.clone()).is_err() {
            log::warn!("Job engine is shut down, dropping job for {}", request.video_id);
            return false;
        }

        log::info!("Queued pipeline job for {}", request.video_id);
        true
    }

    /// True while a non-terminal job exists for this video.
    pub fn should_skip(&self, video_id: &str) -> bool {
        self.jobs
            .lock()
            .unwrap()
            .get(video_id)
            .map(|j| !j.state.is_terminal())
            .unwrap_or(false)
    }

    /// Snapshot of a job record for status queries.
    pub fn status(&self, video_id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(video_id).cloned()
    }

    /// Cancel the engine: the worker drains the channel, failing pending
    /// jobs, and exits. Await-able via the stored handle.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------

    async fn run_one(&self, video_id: &str, collab: &Arc<Collaborators>) {
        // A panic inside a stage must not kill the worker; capture it into
        // the job record and move on.
        let outcome = std::panic::AssertUnwindSafe(stages::process_job(self, video_id, collab))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Job for {video_id} panicked: {message}");
            self.fail(video_id, &format!("internal error: {message}"));
        }

        self.prune_finished();

        // Capture retention applies after every job, success or not; run it
        // off the worker so a slow filesystem never delays the next job.
        collab.captures.spawn_cleanup();
    }

    fn drain_on_shutdown(&self, rx: &mut mpsc::UnboundedReceiver<String>) {
        let mut drained = 0;
        while let Ok(video_id) = rx.try_recv() {
            self.fail(&video_id, "shutdown");
            drained += 1;
        }
        if drained > 0 {
            log::info!("Job worker shutdown: failed {drained} pending job(s)");
        }
    }

    /// Advance a job's state, stamping started/finished timestamps.
    pub(crate) fn set_state(&self, video_id: &str, state: JobState) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(video_id) {
            job.state = state;
            if job.started_at.is_none() && state != JobState::Pending {
                job.started_at = Some(Utc::now().to_rfc3339());
            }
            if state.is_terminal() {
                job.finished_at = Some(Utc::now().to_rfc3339());
            }
            log::info!("Job {video_id} -> {state}");
        }
    }

    pub(crate) fn fail(&self, video_id: &str, error: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(video_id) {
            job.state = JobState::Failed;
            job.error = Some(error.to_string());
            job.finished_at = Some(Utc::now().to_rfc3339());
        }
        log::error!("Job {video_id} failed: {error}");
    }

    pub(crate) fn add_attempts(&self, video_id: &str, attempts: u32) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(video_id) {
            job.attempt_count += attempts;
        }
    }

    pub(crate) fn record_note(&self, video_id: &str, note_id: &str, note_url: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(video_id) {
            job.note_id = Some(note_id.to_string());
            job.note_url = Some(note_url.to_string());
        }
    }

    /// Evict terminal jobs past the retention window.
    fn prune_finished(&self) {
        let cutoff = Utc::now() - Duration::hours(FINISHED_JOB_RETENTION_HOURS);
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let finished = job
                .finished_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
            match finished {
                Some(t) if job.state.is_terminal() => t.with_timezone(&Utc) >= cutoff,
                _ => true,
            }
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            log::info!("Evicted {evicted} old job record(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(video_id: &str) -> JobRequest {
        JobRequest {
            video_id: video_id.to_string(),
            title: "Title".to_string(),
            channel: None,
        }
    }

    #[test]
    fn enqueue_rejects_duplicate_while_non_terminal() {
        let engine = JobEngine::new();
        assert!(engine.enqueue(request("aaaaaaaaaaa")));
        assert!(!engine.enqueue(request("aaaaaaaaaaa")));
        assert!(engine.should_skip("aaaaaaaaaaa"));
    }

    #[test]
    fn enqueue_allows_requeue_after_terminal_state() {
        let engine = JobEngine::new();
        assert!(engine.enqueue(request("aaaaaaaaaaa")));
        engine.set_state("aaaaaaaaaaa", JobState::Completed);

        assert!(!engine.should_skip("aaaaaaaaaaa"));
        assert!(engine.enqueue(request("aaaaaaaaaaa")));
        assert_eq!(engine.status("aaaaaaaaaaa").unwrap().state, JobState::Pending);
    }

    #[test]
    fn enqueue_rejects_blank_id() {
        let engine = JobEngine::new();
        assert!(!engine.enqueue(request("  ")));
    }

    #[test]
    fn status_reports_error_and_timestamps() {
        let engine = JobEngine::new();
        engine.enqueue(request("aaaaaaaaaaa"));
        engine.set_state("aaaaaaaaaaa", JobState::Transcribing);
        engine.fail("aaaaaaaaaaa", "boom");

        let job = engine.status("aaaaaaaaaaa").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn status_unknown_is_none() {
        let engine = JobEngine::new();
        assert!(engine.status("aaaaaaaaaaa").is_none());
        assert!(!engine.should_skip("aaaaaaaaaaa"));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Skipped.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Transcribing.is_terminal());
    }

    #[test]
    fn prune_keeps_recent_and_running_jobs() {
        let engine = JobEngine::new();
        engine.enqueue(request("aaaaaaaaaaa"));
        engine.enqueue(request("bbbbbbbbbbb"));
        engine.set_state("bbbbbbbbbbb", JobState::Completed);

        // Backdate the completed job beyond the retention window
        {
            let mut jobs = engine.jobs.lock().unwrap();
            let job = jobs.get_mut("bbbbbbbbbbb").unwrap();
            job.finished_at =
                Some((Utc::now() - Duration::hours(FINISHED_JOB_RETENTION_HOURS + 1)).to_rfc3339());
        }

        engine.prune_finished();
        assert!(engine.status("aaaaaaaaaaa").is_some());
        assert!(engine.status("bbbbbbbbbbb").is_none());
    }
}
