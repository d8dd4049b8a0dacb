use thiserror::Error;

/// Typed application error hierarchy for all command-surface calls.
///
/// Serializes as a plain string (the HTTP layer returns `error.message`
/// bodies) while giving Rust code typed variants that can be matched or
/// propagated with `?`.
#[derive(Debug, Error)]
pub enum AppError {
    /// The caller supplied a malformed video id or queue input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external collaborator (extractor, transcoder, provider, note
    /// store) could not be reached or failed to start.
    #[error("{0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Internal(String),
}

/// Serialize as a plain string so HTTP clients receive the same
/// `"error message"` string the web UI already expects.
impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

/// Allows `.map_err(|e| format!("…", e))?` and `ok_or_else(|| format!(…))?`
/// to coerce into AppError without changing the call sites.
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Internal(s)
    }
}

/// Allows `.ok_or("literal string")?` to coerce into AppError.
impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Internal(s.to_string())
    }
}
