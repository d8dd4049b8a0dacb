//! Ingest supervisor.
//!
//! Owns the single active streaming session: spawns the extractor and
//! transcoder, pumps transcoded chunks into the broadcaster, and on natural
//! end-of-stream enqueues the pipeline job and auto-advances the queue.
//! Starting a new session always terminates the previous one first.

pub mod extractor;
pub mod transcoder;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcaster, Subscription};
use crate::capture::CaptureStore;
use crate::config::Config;
use crate::database::{Database, QueueKind};
use crate::error::AppError;
use crate::jobs::{JobEngine, JobRequest};

use extractor::{fetch_metadata, spawn_audio_stream, spawn_capture_download, validate_video_id};
use transcoder::spawn_transcoder;

/// Bytes read from the transcoder per publish.
const CHUNK_SIZE: usize = 8192;

/// Grace between SIGTERM and SIGKILL when stopping a session's children.
const CHILD_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Streaming,
}

/// Snapshot returned by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub state: PlaybackState,
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub last_error: Option<String>,
}

/// Result of a successful `start_stream`.
#[derive(Debug, Clone, Serialize)]
pub struct StartedStream {
    pub video_id: String,
    pub title: String,
}

pub struct StreamSupervisor {
    config: Arc<Config>,
    db: Arc<Database>,
    captures: Arc<CaptureStore>,
    jobs: Arc<JobEngine>,

    /// Serializes start/stop so terminate-then-start can never interleave.
    op_lock: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveSession>>,
    warm: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
    next_serial: Mutex<u64>,
}

struct ActiveSession {
    serial: u64,
    video_id: String,
    title: String,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct SessionParams {
    serial: u64,
    video_id: String,
    title: String,
    channel: Option<String>,
    duration_seconds: Option<f64>,
    skip_pipeline: bool,
    broadcaster: Arc<Broadcaster>,
    cancel: CancellationToken,
}

enum SessionOutcome {
    /// Transcoder drained to EOF and exited cleanly; capture is complete.
    Completed,
    /// Stop command or replacement start.
    Cancelled,
    Failed(String),
}

impl StreamSupervisor {
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        captures: Arc<CaptureStore>,
        jobs: Arc<JobEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            db,
            captures,
            jobs,
            op_lock: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            warm: Mutex::new(None),
            last_error: Mutex::new(None),
            next_serial: Mutex::new(0),
        })
    }

    /// Start streaming a video, terminating any session already running.
    pub fn start<'a>(
        self: &'a Arc<Self>,
        video_id: &'a str,
        skip_pipeline: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<StartedStream, AppError>> + Send + 'a>> {
        Box::pin(async move {
        if !validate_video_id(video_id) {
            return Err(AppError::InvalidInput(format!("invalid video id: {video_id}")));
        }

        let _op = self.op_lock.lock().await;

        let previous = self.active.lock().unwrap().take();
        if let Some(previous) = previous {
            Self::shutdown_session(previous).await;
        }

        let metadata = fetch_metadata(&self.config.extractor_bin, video_id).await?;
        log::info!("Starting stream for {video_id}: {}", metadata.title);

        // History records the play before the first byte flows; a stream
        // the extractor kills a second in still counts as an attempt.
        if let Err(e) = self.db.record_play(
            video_id,
            &metadata.title,
            metadata.channel.as_deref(),
            Some(&metadata.thumbnail_url),
        ) {
            log::error!("Failed to record play for {video_id}: {e}");
        }

        if let Err(e) = self.captures.mark_in_progress(video_id) {
            log::error!("Failed to create capture marker for {video_id}: {e}");
        }

        let serial = {
            let mut next = self.next_serial.lock().unwrap();
            *next += 1;
            *next
        };

        let broadcaster = Arc::new(Broadcaster::new());
        let cancel = CancellationToken::new();
        let params = SessionParams {
            serial,
            video_id: video_id.to_string(),
            title: metadata.title.clone(),
            channel: metadata.channel.clone(),
            duration_seconds: metadata.duration_seconds,
            skip_pipeline,
            broadcaster: broadcaster.clone(),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(run_session(self.clone(), params));

        *self.last_error.lock().unwrap() = None;
        *self.active.lock().unwrap() = Some(ActiveSession {
            serial,
            video_id: video_id.to_string(),
            title: metadata.title.clone(),
            broadcaster,
            cancel,
            task,
        });

        Ok(StartedStream {
            video_id: video_id.to_string(),
            title: metadata.title,
        })
        })
    }

    /// Stop the active session, if any. Stopping an idle supervisor is fine.
    pub async fn stop(&self) {
        let _op = self.op_lock.lock().await;
        let session = self.active.lock().unwrap().take();
        if let Some(session) = session {
            log::info!("Stopping stream for {}", session.video_id);
            Self::shutdown_session(session).await;
        }
    }

    /// Pop the queue head and start it. Digest entries without playable
    /// audio are skipped over.
    pub async fn play_next(self: &Arc<Self>) -> Result<Option<StartedStream>, AppError> {
        loop {
            let Some(entry) = self.db.queue_pop_current()? else {
                return Ok(None);
            };
            if entry.kind == QueueKind::Summary {
                log::warn!("Skipping digest queue entry {:?} (no audio source)", entry.title);
                continue;
            }
            let started = self.start(&entry.video_id, entry.skip_pipeline).await?;
            return Ok(Some(started));
        }
    }

    pub fn status(&self) -> StreamStatus {
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(session) => StreamStatus {
                state: PlaybackState::Streaming,
                video_id: Some(session.video_id.clone()),
                title: Some(session.title.clone()),
                last_error: None,
            },
            None => StreamStatus {
                state: PlaybackState::Idle,
                video_id: None,
                title: None,
                last_error: self.last_error.lock().unwrap().clone(),
            },
        }
    }

    /// Join the live broadcast. `None` while idle.
    pub fn subscribe(&self) -> Option<Subscription> {
        let active = self.active.lock().unwrap();
        active.as_ref().map(|session| session.broadcaster.subscribe())
    }

    pub fn capture_ready(&self, video_id: &str) -> bool {
        self.captures.is_ready(video_id)
    }

    /// Warm the next queue entry's capture file in the background. At most
    /// one warm download runs at a time; already-captured videos are no-ops.
    pub fn warm_next(self: &Arc<Self>) {
        let mut warm = self.warm.lock().unwrap();
        if warm.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let supervisor = self.clone();
        *warm = Some(tokio::spawn(async move {
            let next = match supervisor.db.queue_peek_next() {
                Ok(Some(entry)) if entry.kind == QueueKind::Video => entry,
                Ok(_) => return,
                Err(e) => {
                    log::error!("Pre-fetch: queue peek failed: {e}");
                    return;
                }
            };
            supervisor.warm_capture(&next.video_id).await;
        }));
    }

    async fn warm_capture(&self, video_id: &str) {
        if self.captures.is_ready(video_id) || self.captures.is_in_progress(video_id) {
            log::info!("Pre-fetch: capture for {video_id} already present");
            return;
        }

        log::info!("Pre-fetch: warming capture for {video_id}");
        if let Err(e) = self.captures.mark_in_progress(video_id) {
            log::error!("Pre-fetch: cannot create marker for {video_id}: {e}");
            return;
        }

        let child = spawn_capture_download(
            &self.config.extractor_bin,
            video_id,
            &self.captures.path(video_id),
            self.config.audio_quality,
        );

        let result = match child {
            Ok(mut child) => child.wait().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(status) if status.success() => {
                log::info!("Pre-fetch: capture ready for {video_id}");
                self.captures.clear_in_progress(video_id);
                self.captures.spawn_cleanup();
            }
            Ok(status) => {
                log::error!("Pre-fetch: download for {video_id} exited with {status}");
                self.captures.remove(video_id);
                self.captures.clear_in_progress(video_id);
            }
            Err(e) => {
                log::error!("Pre-fetch: download for {video_id} failed to run: {e}");
                self.captures.clear_in_progress(video_id);
            }
        }
    }

    /// Gracefully stop everything at process shutdown.
    pub async fn shutdown(&self) {
        self.stop().await;
        let warm = self.warm.lock().unwrap().take();
        if let Some(warm) = warm {
            warm.abort();
        }
    }

    async fn shutdown_session(session: ActiveSession) {
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            log::error!("Session task for {} panicked: {e}", session.video_id);
        }
    }

    fn set_last_error(&self, error: String) {
        *self.last_error.lock().unwrap() = Some(error);
    }

    /// Drop the active slot if it still belongs to the finished session.
    fn clear_active_if_serial(&self, serial: u64) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().map(|s| s.serial) == Some(serial) {
            // this is our own task handle; dropping it detaches cleanly
            active.take();
        }
    }
}

/// One streaming session from spawn to cleanup.
async fn run_session(supervisor: Arc<StreamSupervisor>, params: SessionParams) {
    let outcome = stream_audio(&supervisor, &params).await;

    params.broadcaster.close();
    supervisor.captures.clear_in_progress(&params.video_id);

    match outcome {
        SessionOutcome::Completed => {
            log::info!("Stream for {} reached end of source", params.video_id);

            if supervisor.config.pipeline_enabled
                && !params.skip_pipeline
                && supervisor.captures.is_ready(&params.video_id)
            {
                supervisor.jobs.enqueue(JobRequest {
                    video_id: params.video_id.clone(),
                    title: params.title.clone(),
                    channel: params.channel.clone(),
                });
            }
            supervisor.captures.spawn_cleanup();
            supervisor.clear_active_if_serial(params.serial);

            // Auto-advance runs on its own task so this one can finish.
            let supervisor = supervisor.clone();
            let serial = params.serial;
            tokio::spawn(async move {
                // A start issued while this task was queued wins; advancing
                // now would tear down what the user just asked for.
                if *supervisor.next_serial.lock().unwrap() != serial {
                    log::info!("Auto-advance superseded by a newer session");
                    return;
                }
                match supervisor.play_next().await {
                    Ok(Some(next)) => log::info!("Auto-advance: now playing {}", next.title),
                    Ok(None) => log::info!("Auto-advance: queue is empty"),
                    Err(e) => log::error!("Auto-advance failed: {e}"),
                }
            });
        }
        SessionOutcome::Cancelled => {
            log::info!("Stream for {} cancelled", params.video_id);
            supervisor.captures.remove_if_empty(&params.video_id);
            // the canceller took the active slot; nothing to clear
        }
        SessionOutcome::Failed(error) => {
            log::error!("Stream for {} failed: {error}", params.video_id);
            supervisor.set_last_error(error);
            supervisor.captures.remove_if_empty(&params.video_id);
            supervisor.clear_active_if_serial(params.serial);
        }
    }
}

/// Spawn the extractor|transcoder pair and pump chunks until EOF, error, or
/// cancellation.
async fn stream_audio(
    supervisor: &Arc<StreamSupervisor>,
    params: &SessionParams,
) -> SessionOutcome {
    let config = &supervisor.config;
    let capture_path = supervisor.captures.path(&params.video_id);

    let mut extractor_child = match spawn_audio_stream(&config.extractor_bin, &params.video_id) {
        Ok(child) => child,
        Err(e) => {
            return SessionOutcome::Failed(format!(
                "failed to start {}: {e}",
                config.extractor_bin
            ))
        }
    };

    let Some(extractor_stdout) = extractor_child.stdout.take() else {
        return SessionOutcome::Failed("extractor stdout was not piped".to_string());
    };

    let mut transcoder_child = match spawn_transcoder(
        &config.transcoder_bin,
        extractor_stdout,
        &capture_path,
        config.audio_quality,
    ) {
        Ok(child) => child,
        Err(e) => {
            let _ = extractor_child.start_kill();
            return SessionOutcome::Failed(format!(
                "failed to start {}: {e}",
                config.transcoder_bin
            ));
        }
    };

    let Some(mut audio) = transcoder_child.stdout.take() else {
        terminate_children(extractor_child, transcoder_child).await;
        return SessionOutcome::Failed("transcoder stdout was not piped".to_string());
    };

    let started = tokio::time::Instant::now();
    let mut bytes_sent: u64 = 0;
    let mut prefetch_triggered = false;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        tokio::select! {
            _ = params.cancel.cancelled() => {
                terminate_children(extractor_child, transcoder_child).await;
                return SessionOutcome::Cancelled;
            }
            read = audio.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        bytes_sent += n as u64;
                        params.broadcaster.publish(Bytes::copy_from_slice(&buf[..n]));

                        // Near the end of a known-length video, warm the next
                        // queued capture so auto-advance starts instantly.
                        if !prefetch_triggered {
                            if let Some(duration) = params.duration_seconds {
                                let remaining =
                                    duration - started.elapsed().as_secs_f64();
                                if remaining <= config.prefetch_threshold_secs as f64 {
                                    prefetch_triggered = true;
                                    supervisor.warm_next();
                                }
                            }
                        }
                    }
                    Err(e) => {
                        terminate_children(extractor_child, transcoder_child).await;
                        return SessionOutcome::Failed(format!("stream read error: {e}"));
                    }
                }
            }
        }
    }

    // Transcoder hit EOF on stdout; collect both exit statuses.
    let transcoder_status = transcoder_child.wait().await;
    let _ = extractor_child.wait().await;

    match transcoder_status {
        Ok(status) if status.success() && bytes_sent > 0 => SessionOutcome::Completed,
        Ok(status) if bytes_sent == 0 => {
            SessionOutcome::Failed(format!("no audio produced (transcoder exited with {status})"))
        }
        Ok(status) if !status.success() => {
            // Listeners already heard everything that was transcoded; the
            // capture is suspect though, so no pipeline job and no advance.
            SessionOutcome::Failed(format!("transcoder exited with {status}"))
        }
        Ok(_) => SessionOutcome::Completed,
        Err(e) => SessionOutcome::Failed(format!("failed to reap transcoder: {e}")),
    }
}

/// Terminate both children: SIGTERM first, then SIGKILL for whichever is
/// still alive once the grace period runs out. The grace gives ffmpeg time
/// to flush the capture tee.
async fn terminate_children(extractor: Child, transcoder: Child) {
    signal_term(&extractor, "extractor");
    signal_term(&transcoder, "transcoder");

    tokio::join!(
        reap_with_grace(extractor, "extractor"),
        reap_with_grace(transcoder, "transcoder"),
    );
}

/// Ask a child to exit. `id()` is None once the process has been reaped,
/// in which case there is nothing to signal.
fn signal_term(child: &Child, name: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if rc != 0 {
            log::warn!(
                "SIGTERM to {name} (pid {pid}) failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    let _ = (child, name);
}

/// Wait out the grace period, then hard-kill whatever ignored SIGTERM.
async fn reap_with_grace(mut child: Child, name: &str) {
    match tokio::time::timeout(CHILD_GRACE, child.wait()).await {
        Ok(Ok(status)) => log::info!("{name} exited with {status} after stop"),
        Ok(Err(e)) => log::error!("Failed to reap {name}: {e}"),
        Err(_) => {
            log::warn!(
                "{name} ignored SIGTERM for {}s, killing",
                CHILD_GRACE.as_secs()
            );
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
