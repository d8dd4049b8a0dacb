//! Pipeline stages: dedup check, transcribe, summarize, publish, cleanup.
//!
//! Each stage is a pure function over the job and the collaborators bundle;
//! the engine owns state transitions and error recovery. Stage failures are
//! captured into the job record, never propagated out of the worker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::{PipelineCache, SummaryArtifact, TranscriptArtifact};
use crate::capture::CaptureStore;
use crate::database::{Database, UsageRecord};
use crate::providers::notestore::{note_body, watch_url, BackupPayload, BackupSink};
use crate::providers::openai::build_summary_prompt;
use crate::providers::{with_retries, NoteRef, NoteStore, ProviderError, Summarizer, Transcriber};

use super::{Job, JobEngine, JobState};

/// Label attached to every published note; dedup searches on it.
pub const SOURCE_LABEL: &str = "source_id";

/// How long a job will wait for its capture file to finish writing (a warm
/// pre-fetch may still be in flight when the job reaches the worker).
const CAPTURE_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Everything a stage may touch, bundled so providers and mocks swap freely.
pub struct Collaborators {
    pub db: Arc<Database>,
    pub captures: Arc<CaptureStore>,
    pub cache: Arc<PipelineCache>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub notes: Arc<dyn NoteStore>,
    pub backup: Arc<BackupSink>,
}

#[derive(Debug, Error)]
enum StageError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("cache write failed: {0}")]
    Cache(std::io::Error),
}

/// Walk one job through the full state machine.
pub(crate) async fn process_job(engine: &JobEngine, video_id: &str, collab: &Arc<Collaborators>) {
    let Some(job) = engine.status(video_id) else {
        log::warn!("Job record for {video_id} vanished before processing");
        return;
    };
    log::info!("Processing job for {video_id}");
    let cancel = engine.cancellation_token();

    // Step 0: the capture file must be complete before anything else.
    if let Err(e) = wait_for_capture(collab, video_id, &cancel).await {
        engine.fail(video_id, &e);
        return;
    }

    // Step 1: dedup against the note store (fail-open).
    engine.set_state(video_id, JobState::CheckingDedup);
    if let Some(existing) = check_dedup(collab, video_id).await {
        log::info!(
            "Video {video_id} already published as note {}, skipping",
            existing.note_id
        );
        engine.record_note(video_id, &existing.note_id, &existing.url);
        engine.set_state(video_id, JobState::Skipped);
        return;
    }

    // Step 2: transcribe.
    engine.set_state(video_id, JobState::Transcribing);
    let transcript = match transcribe(engine, collab, &job, &cancel).await {
        Ok(artifact) => artifact,
        Err(e) => {
            engine.fail(video_id, &e.to_string());
            return;
        }
    };

    // Step 3: summarize.
    engine.set_state(video_id, JobState::Summarizing);
    let summary = match summarize(engine, collab, &job, &transcript, &cancel).await {
        Ok(artifact) => artifact,
        Err(e) => {
            engine.fail(video_id, &e.to_string());
            return;
        }
    };

    // Step 4: publish.
    engine.set_state(video_id, JobState::Publishing);
    match publish(engine, collab, &job, &transcript, &summary, &cancel).await {
        Ok(note) => {
            engine.record_note(video_id, &note.note_id, &note.url);
        }
        Err(e) => {
            engine.fail(video_id, &e.to_string());
            return;
        }
    }

    engine.set_state(video_id, JobState::Completed);
    log::info!("Job for {video_id} completed");

    // Step 5: the capture served its purpose; delete it off-worker.
    cleanup_capture(collab, video_id);
}

/// Poll until the capture file exists, is nonzero, and no writer holds its
/// in-progress marker.
async fn wait_for_capture(
    collab: &Collaborators,
    video_id: &str,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let deadline = tokio::time::Instant::now() + CAPTURE_WAIT_TIMEOUT;

    loop {
        if collab.captures.is_ready(video_id) {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!(
                "capture file for {video_id} not ready after {}s",
                CAPTURE_WAIT_TIMEOUT.as_secs()
            ));
        }
        tokio::time::sleep(CAPTURE_POLL_INTERVAL).await;
    }
}

/// Query the note store for an already-published note.
///
/// Fail-open: any error is logged and treated as "not found". A duplicate
/// note is preferable to a lost summary.
async fn check_dedup(collab: &Collaborators, video_id: &str) -> Option<NoteRef> {
    match collab.notes.find_by_label(SOURCE_LABEL, video_id).await {
        Ok(found) => found,
        Err(e) => {
            log::warn!("Dedup check for {video_id} failed ({e}), proceeding without it");
            None
        }
    }
}

async fn transcribe(
    engine: &JobEngine,
    collab: &Collaborators,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<TranscriptArtifact, StageError> {
    if let Some(cached) = collab.cache.transcripts.load::<TranscriptArtifact>(&job.video_id) {
        log::info!("Using cached transcript for {}", job.video_id);
        return Ok(cached);
    }

    let audio_path = collab.captures.path(&job.video_id);
    let attempts = AtomicU32::new(0);
    let result = with_retries("transcribe", cancel, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        let path = audio_path.clone();
        async move { collab.transcriber.transcribe(&path).await }
    })
    .await;
    engine.add_attempts(&job.video_id, attempts.load(Ordering::SeqCst));

    let transcription = result?;
    let artifact = TranscriptArtifact::new(
        &job.video_id,
        transcription.text,
        collab.transcriber.provider(),
        collab.transcriber.model(),
        transcription.audio_duration_seconds,
    );
    collab
        .cache
        .transcripts
        .store(&job.video_id, &artifact)
        .map_err(StageError::Cache)?;

    log_usage(
        collab,
        UsageRecord {
            provider: artifact.provider.clone(),
            model: artifact.model.clone(),
            feature: "transcription".to_string(),
            audio_duration_seconds: artifact.audio_duration_seconds,
            video_id: Some(job.video_id.clone()),
            ..Default::default()
        },
    );

    Ok(artifact)
}

async fn summarize(
    engine: &JobEngine,
    collab: &Collaborators,
    job: &Job,
    transcript: &TranscriptArtifact,
    cancel: &CancellationToken,
) -> Result<SummaryArtifact, StageError> {
    if let Some(cached) = collab.cache.summaries.load::<SummaryArtifact>(&job.video_id) {
        log::info!("Using cached summary for {}", job.video_id);
        return Ok(cached);
    }

    let prompt = build_summary_prompt(&transcript.text, &job.title, job.channel.as_deref());
    let attempts = AtomicU32::new(0);
    let result = with_retries("summarize", cancel, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        let prompt = prompt.clone();
        async move { collab.summarizer.summarize(&prompt).await }
    })
    .await;
    engine.add_attempts(&job.video_id, attempts.load(Ordering::SeqCst));

    let response = result?;
    let artifact = SummaryArtifact::new(
        &job.video_id,
        response.text,
        collab.summarizer.provider(),
        collab.summarizer.model(),
        response.prompt_tokens,
        response.response_tokens,
    );
    collab
        .cache
        .summaries
        .store(&job.video_id, &artifact)
        .map_err(StageError::Cache)?;

    log_usage(
        collab,
        UsageRecord {
            provider: artifact.provider.clone(),
            model: artifact.model.clone(),
            feature: "summarization".to_string(),
            prompt_tokens: artifact.prompt_tokens,
            response_tokens: artifact.response_tokens,
            video_id: Some(job.video_id.clone()),
            ..Default::default()
        },
    );

    Ok(artifact)
}

/// Create the note, then attach the dedup label.
///
/// A failed create goes to the backup sink and fails the job. A failed label
/// attach is logged and backed up, but the note exists, so the job proceeds.
async fn publish(
    engine: &JobEngine,
    collab: &Collaborators,
    job: &Job,
    transcript: &TranscriptArtifact,
    summary: &SummaryArtifact,
    cancel: &CancellationToken,
) -> Result<NoteRef, StageError> {
    let body = note_body(&summary.text, &job.video_id);

    let attempts = AtomicU32::new(0);
    let created = with_retries("publish", cancel, || {
        attempts.fetch_add(1, Ordering::SeqCst);
        let title = job.title.clone();
        let body = body.clone();
        async move { collab.notes.create_note(&title, &body).await }
    })
    .await;
    engine.add_attempts(&job.video_id, attempts.load(Ordering::SeqCst));

    let note = match created {
        Ok(note) => note,
        Err(e) => {
            write_backup(collab, job, transcript, summary);
            return Err(e.into());
        }
    };

    let labeled = with_retries("attach label", cancel, || {
        let note_id = note.note_id.clone();
        async move {
            collab
                .notes
                .add_label(&note_id, SOURCE_LABEL, &job.video_id)
                .await
        }
    })
    .await;

    if let Err(e) = labeled {
        log::warn!(
            "Note {} created but label attach failed ({e}); saving backup",
            note.note_id
        );
        write_backup(collab, job, transcript, summary);
    }

    Ok(note)
}

fn write_backup(
    collab: &Collaborators,
    job: &Job,
    transcript: &TranscriptArtifact,
    summary: &SummaryArtifact,
) {
    let payload = BackupPayload {
        video_id: job.video_id.clone(),
        title: job.title.clone(),
        transcript: transcript.text.clone(),
        summary: summary.text.clone(),
        watch_url: watch_url(&job.video_id),
    };
    if let Err(e) = collab.backup.write(&payload) {
        log::error!("Failed to write publish backup for {}: {e}", job.video_id);
    }
}

fn log_usage(collab: &Collaborators, record: UsageRecord) {
    if let Err(e) = collab.db.log_usage(&record) {
        log::warn!("Failed to record usage: {e}");
    }
}

/// Best-effort capture deletion on a background task so the worker moves
/// straight to the next job.
fn cleanup_capture(collab: &Arc<Collaborators>, video_id: &str) {
    let collab = collab.clone();
    let video_id = video_id.to_string();
    tokio::task::spawn_blocking(move || collab.captures.remove(&video_id));
}
