use super::AppContext;
use crate::database::HistoryEntry;
use crate::error::AppError;

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const MAX_HISTORY_LIMIT: i64 = 500;

/// GET /history -> recently played videos, newest first.
pub fn list_history(ctx: &AppContext, limit: Option<i64>) -> Result<Vec<HistoryEntry>, AppError> {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(ctx.db.recent_history(limit)?)
}

/// DELETE /history -> forget every play.
pub fn clear_history(ctx: &AppContext) -> Result<(), AppError> {
    Ok(ctx.db.clear_history()?)
}
