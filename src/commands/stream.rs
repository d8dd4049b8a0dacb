use serde::Serialize;

use super::AppContext;
use crate::broadcast::Subscription;
use crate::error::AppError;
use crate::ingest::extractor::validate_video_id;
use crate::ingest::{StartedStream, StreamStatus};

/// POST /stream -> start streaming a video, replacing any active session.
pub async fn start_stream(
    ctx: &AppContext,
    video_id: &str,
    skip_post_processing: bool,
) -> Result<StartedStream, AppError> {
    ctx.supervisor.start(video_id, skip_post_processing).await
}

/// POST /stop -> stop the active session. Stopping while idle is fine.
pub async fn stop_stream(ctx: &AppContext) -> StreamStatus {
    ctx.supervisor.stop().await;
    ctx.supervisor.status()
}

/// GET /status -> current playback state.
pub fn status(ctx: &AppContext) -> StreamStatus {
    ctx.supervisor.status()
}

/// GET /stream.mp3 -> join the live broadcast.
pub fn subscribe(ctx: &AppContext) -> Result<Subscription, AppError> {
    ctx.supervisor
        .subscribe()
        .ok_or_else(|| AppError::Unavailable("no active stream".to_string()))
}

#[derive(Debug, Serialize)]
pub struct CaptureReady {
    pub video_id: String,
    pub ready: bool,
}

/// GET /capture-ready/{id} -> is a complete local capture available.
pub fn capture_ready(ctx: &AppContext, video_id: &str) -> CaptureReady {
    let ready = validate_video_id(video_id) && ctx.supervisor.capture_ready(video_id);
    CaptureReady {
        video_id: video_id.to_string(),
        ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;

    #[tokio::test]
    async fn start_rejects_malformed_id_without_touching_state() {
        let (ctx, _temp) = test_context();
        let result = start_stream(&ctx, "not-an-id", false).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert!(ctx.db.recent_history(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_while_idle_reports_idle() {
        let (ctx, _temp) = test_context();
        let status = stop_stream(&ctx).await;
        assert_eq!(status.state, crate::ingest::PlaybackState::Idle);
        assert!(status.video_id.is_none());
    }

    #[test]
    fn subscribe_while_idle_is_unavailable() {
        let (ctx, _temp) = test_context();
        assert!(matches!(subscribe(&ctx), Err(AppError::Unavailable(_))));
    }

    #[test]
    fn capture_ready_false_for_missing_or_malformed() {
        let (ctx, _temp) = test_context();
        assert!(!capture_ready(&ctx, "dQw4w9WgXcQ").ready);
        assert!(!capture_ready(&ctx, "not-an-id").ready);

        std::fs::write(ctx.captures.path("dQw4w9WgXcQ"), b"mp3").unwrap();
        assert!(capture_ready(&ctx, "dQw4w9WgXcQ").ready);
    }
}
