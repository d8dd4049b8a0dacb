use super::AppContext;
use crate::database::UsageSummary;
use crate::error::AppError;
use crate::jobs::Job;

/// GET /jobs/{id} -> pipeline job record for a video.
pub fn job_status(ctx: &AppContext, video_id: &str) -> Result<Job, AppError> {
    ctx.jobs
        .status(video_id)
        .ok_or_else(|| AppError::NotFound(format!("no pipeline job for {video_id}")))
}

/// GET /usage -> aggregated external-model usage.
pub fn usage_summary(ctx: &AppContext) -> Result<UsageSummary, AppError> {
    Ok(ctx.db.usage_summary()?)
}
