//! HTTP layer.
//!
//! Thin axum handlers mapping routes onto the command surface. The one
//! interesting endpoint is `/stream.mp3`, which turns a broadcast
//! subscription into a chunked `audio/mpeg` response.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::commands::{self, AppContext};
use crate::error::AppError;

pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on http://{addr}");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/stream", post(start_stream))
        .route("/stop", post(stop_stream))
        .route("/status", get(status))
        .route("/stream.mp3", get(stream_audio))
        .route("/capture-ready/:video_id", get(capture_ready))
        .route("/queue", post(enqueue).get(list_queue).delete(clear_queue))
        .route("/queue/order", put(reorder_queue))
        .route("/queue/next", post(play_next))
        .route("/queue/:entry_id", delete(remove_entry))
        .route("/history", get(list_history).delete(clear_history))
        .route("/jobs/:video_id", get(job_status))
        .route("/usage", get(usage_summary))
        .with_state(ctx)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to install ctrl-c handler: {e}");
    }
    log::info!("Shutdown signal received");
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Stream control ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamRequest {
    video_id: String,
    #[serde(default)]
    skip_post_processing: bool,
}

async fn start_stream(
    State(ctx): State<AppContext>,
    Json(req): Json<StreamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let started = commands::start_stream(&ctx, &req.video_id, req.skip_post_processing).await?;
    Ok(Json(started))
}

async fn stop_stream(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(commands::stop_stream(&ctx).await)
}

async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(commands::status(&ctx))
}

/// Chunked live audio: replay buffer first, then the live feed, until the
/// client disconnects or the session ends.
async fn stream_audio(State(ctx): State<AppContext>) -> Result<Response, AppError> {
    let subscription = commands::subscribe(&ctx)?;
    log::info!("Client connected to /stream.mp3");

    let stream = futures_util::stream::unfold(subscription, |sub| async move {
        sub.next()
            .await
            .map(|chunk| (Ok::<_, std::io::Error>(chunk), sub))
    });

    Ok((
        [(header::CONTENT_TYPE, "audio/mpeg")],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn capture_ready(
    State(ctx): State<AppContext>,
    Path(video_id): Path<String>,
) -> impl IntoResponse {
    Json(commands::capture_ready(&ctx, &video_id))
}

// ── Queue ──────────────────────────────────────────────────────────────────

async fn enqueue(
    State(ctx): State<AppContext>,
    Json(req): Json<StreamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = commands::enqueue_item(&ctx, &req.video_id, req.skip_post_processing).await?;
    Ok(Json(result))
}

async fn list_queue(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(commands::list_queue(&ctx)?))
}

#[derive(Debug, Deserialize)]
struct ReorderRequest {
    entry_ids: Vec<i64>,
}

async fn reorder_queue(
    State(ctx): State<AppContext>,
    Json(req): Json<ReorderRequest>,
) -> Result<impl IntoResponse, AppError> {
    commands::reorder_queue(&ctx, &req.entry_ids)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn play_next(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(commands::next(&ctx).await?))
}

async fn remove_entry(
    State(ctx): State<AppContext>,
    Path(entry_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    commands::remove_entry(&ctx, entry_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_queue(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    commands::clear_queue(&ctx)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── History, jobs, usage ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn list_history(
    State(ctx): State<AppContext>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(commands::list_history(&ctx, params.limit)?))
}

async fn clear_history(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    commands::clear_history(&ctx)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn job_status(
    State(ctx): State<AppContext>,
    Path(video_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(commands::job_status(&ctx, &video_id)?))
}

async fn usage_summary(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(commands::usage_summary(&ctx)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_map_by_kind() {
        assert_eq!(
            AppError::InvalidInput("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Unavailable("x".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Internal("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn router_builds() {
        let (ctx, _temp) = crate::commands::test_support::test_context();
        let _router = router(ctx);
    }
}
