use serde::Serialize;

use super::AppContext;
use crate::database::QueueEntry;
use crate::error::AppError;
use crate::ingest::extractor::{fetch_metadata, validate_video_id};
use crate::ingest::StartedStream;

#[derive(Debug, Serialize)]
pub struct EnqueueResult {
    pub added: bool,
    pub title: String,
    /// Set when the video was refused because a pipeline job is still live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_state: Option<String>,
}

/// POST /queue -> append a video to the playback queue.
///
/// Refused while a non-terminal pipeline job exists for the same video;
/// finished jobs do not block re-queueing.
pub async fn enqueue_item(
    ctx: &AppContext,
    video_id: &str,
    skip_post_processing: bool,
) -> Result<EnqueueResult, AppError> {
    if !validate_video_id(video_id) {
        return Err(AppError::InvalidInput(format!("invalid video id: {video_id}")));
    }

    if ctx.jobs.should_skip(video_id) {
        let job = ctx.jobs.status(video_id);
        return Ok(EnqueueResult {
            added: false,
            title: job.as_ref().map(|j| j.title.clone()).unwrap_or_default(),
            job_state: job.map(|j| j.state.to_string()),
        });
    }

    let metadata = fetch_metadata(&ctx.config.extractor_bin, video_id).await?;
    ctx.db.queue_append(
        video_id,
        &metadata.title,
        metadata.channel.as_deref(),
        Some(&metadata.thumbnail_url),
        skip_post_processing,
    )?;

    Ok(EnqueueResult {
        added: true,
        title: metadata.title,
        job_state: None,
    })
}

/// GET /queue -> the queue in playback order.
pub fn list_queue(ctx: &AppContext) -> Result<Vec<QueueEntry>, AppError> {
    Ok(ctx.db.queue_list()?)
}

/// DELETE /queue/{entry_id} -> drop one entry; remaining rows renumber.
pub fn remove_entry(ctx: &AppContext, entry_id: i64) -> Result<(), AppError> {
    if ctx.db.queue_remove(entry_id)? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("queue entry {entry_id}")))
    }
}

/// PUT /queue/order -> atomically rewrite positions to the given id order.
pub fn reorder_queue(ctx: &AppContext, ordered_ids: &[i64]) -> Result<(), AppError> {
    ctx.db
        .queue_reorder(ordered_ids)
        .map_err(|e| AppError::InvalidInput(e.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextOutcome {
    Started(StartedStream),
    QueueEmpty,
}

/// POST /queue/next -> pop the head of the queue and start streaming it.
pub async fn next(ctx: &AppContext) -> Result<NextOutcome, AppError> {
    match ctx.supervisor.play_next().await? {
        Some(started) => Ok(NextOutcome::Started(started)),
        None => Ok(NextOutcome::QueueEmpty),
    }
}

/// DELETE /queue -> drop everything.
pub fn clear_queue(ctx: &AppContext) -> Result<(), AppError> {
    Ok(ctx.db.queue_clear()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;
    use crate::jobs::JobRequest;

    #[tokio::test]
    async fn enqueue_rejects_malformed_id() {
        let (ctx, _temp) = test_context();
        let result = enqueue_item(&ctx, "nope", false).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn enqueue_refused_while_job_is_live() {
        let (ctx, _temp) = test_context();
        ctx.jobs.enqueue(JobRequest {
            video_id: "dQw4w9WgXcQ".to_string(),
            title: "Busy Video".to_string(),
            channel: None,
        });

        // Refused before any extractor call, so this works offline
        let result = enqueue_item(&ctx, "dQw4w9WgXcQ", false).await.unwrap();
        assert!(!result.added);
        assert_eq!(result.title, "Busy Video");
        assert_eq!(result.job_state.as_deref(), Some("pending"));
        assert!(ctx.db.queue_list().unwrap().is_empty());
    }

    #[test]
    fn remove_missing_entry_is_not_found() {
        let (ctx, _temp) = test_context();
        assert!(matches!(remove_entry(&ctx, 42), Err(AppError::NotFound(_))));
    }

    #[test]
    fn reorder_set_mismatch_is_invalid_input() {
        let (ctx, _temp) = test_context();
        ctx.db
            .queue_append("dQw4w9WgXcQ", "A", None, None, false)
            .unwrap();

        let result = reorder_queue(&ctx, &[1, 99]);
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn next_on_empty_queue() {
        let (ctx, _temp) = test_context();
        match next(&ctx).await.unwrap() {
            NextOutcome::QueueEmpty => {}
            NextOutcome::Started(_) => panic!("queue was empty"),
        }
    }

    #[test]
    fn clear_queue_empties_table() {
        let (ctx, _temp) = test_context();
        ctx.db
            .queue_append("dQw4w9WgXcQ", "A", None, None, false)
            .unwrap();
        clear_queue(&ctx).unwrap();
        assert!(list_queue(&ctx).unwrap().is_empty());
    }
}
