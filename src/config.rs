//! Application configuration loaded from environment variables.
//!
//! Every knob has a default; malformed values fall back to the default with
//! a logged warning so a bad `.env` can never keep the server from starting.

use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::paths::expand_path;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Server settings
    pub host: String,
    pub port: u16,

    // Storage layout
    pub database_path: PathBuf,
    pub capture_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,

    // External binaries
    pub extractor_bin: String,
    pub transcoder_bin: String,
    pub audio_quality: u32,

    // Capture retention and pre-fetch
    pub capture_max_files: usize,
    pub prefetch_threshold_secs: u64,

    // Post-capture pipeline
    pub pipeline_enabled: bool,
    pub openai_api_key: Option<String>,
    pub transcription_model: String,
    pub summary_model: String,

    // Note store (Trilium ETAPI)
    pub notes_url: Option<String>,
    pub notes_token: Option<String>,
    pub notes_parent_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load_from_env() -> Self {
        let data_dir = env::var("RADIOCAST_DATA_DIR")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| default_data_dir());

        Self {
            host: env::var("RADIOCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_bounded_int(
                env::var("RADIOCAST_PORT").ok().as_deref(),
                "RADIOCAST_PORT",
                8080,
                1,
                65535,
            ) as u16,
            database_path: env::var("DATABASE_PATH")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|_| data_dir.join("radiocast.db")),
            capture_dir: env::var("CAPTURE_DIR")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|_| data_dir.join("captures")),
            cache_dir: env::var("CACHE_DIR")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|_| data_dir.join("cache")),
            backup_dir: env::var("BACKUP_DIR")
                .map(|p| expand_path(&p))
                .unwrap_or_else(|_| data_dir.join("backup")),
            extractor_bin: env::var("EXTRACTOR_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            transcoder_bin: env::var("TRANSCODER_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            audio_quality: parse_bounded_int(
                env::var("AUDIO_QUALITY").ok().as_deref(),
                "AUDIO_QUALITY",
                5,
                0,
                9,
            ) as u32,
            capture_max_files: parse_bounded_int(
                env::var("CAPTURE_MAX_FILES").ok().as_deref(),
                "CAPTURE_MAX_FILES",
                10,
                1,
                1000,
            ) as usize,
            prefetch_threshold_secs: parse_bounded_int(
                env::var("PREFETCH_THRESHOLD_SECS").ok().as_deref(),
                "PREFETCH_THRESHOLD_SECS",
                90,
                0,
                3600,
            ) as u64,
            pipeline_enabled: parse_bool(
                env::var("PIPELINE_ENABLED").ok().as_deref(),
                false,
            ),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            transcription_model: env::var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|_| "whisper-1".to_string()),
            summary_model: env::var("SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            notes_url: non_empty(env::var("NOTES_URL").ok().map(|u| u.trim_end_matches('/').to_string())),
            notes_token: non_empty(env::var("NOTES_ETAPI_TOKEN").ok()),
            notes_parent_id: non_empty(env::var("NOTES_PARENT_NOTE_ID").ok()),
        }
    }

    /// Validate that required settings are present when the post-capture
    /// pipeline is enabled. Called once at startup.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.pipeline_enabled {
            return Ok(());
        }

        let mut errors = Vec::new();
        if self.openai_api_key.is_none() {
            errors.push("OPENAI_API_KEY is required when PIPELINE_ENABLED=true");
        }
        if self.notes_url.is_none() {
            errors.push("NOTES_URL is required when PIPELINE_ENABLED=true");
        }
        if self.notes_token.is_none() {
            errors.push("NOTES_ETAPI_TOKEN is required when PIPELINE_ENABLED=true");
        }
        if self.notes_parent_id.is_none() {
            errors.push("NOTES_PARENT_NOTE_ID is required when PIPELINE_ENABLED=true");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidInput(format!(
                "configuration validation failed: {}",
                errors.join("; ")
            )))
        }
    }

    /// Path of the capture file for a video.
    pub fn capture_path(&self, video_id: &str) -> PathBuf {
        self.capture_dir.join(format!("{video_id}.mp3"))
    }

    /// Create every directory the server writes into.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.capture_dir)?;
        std::fs::create_dir_all(self.cache_dir.join("transcripts"))?;
        std::fs::create_dir_all(self.cache_dir.join("summaries"))?;
        std::fs::create_dir_all(&self.backup_dir)?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("radiocast")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse an integer setting bounded by `[min, max]`.
///
/// Unparseable or out-of-range values fall back to `default` with a warning.
fn parse_bounded_int(raw: Option<&str>, name: &str, default: i64, min: i64, max: i64) -> i64 {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r.trim(),
        _ => return default,
    };

    match raw.parse::<i64>() {
        Ok(v) if (min..=max).contains(&v) => v,
        Ok(v) => {
            log::warn!("{name}={v} outside [{min}, {max}], using default {default}");
            default
        }
        Err(_) => {
            log::warn!("{name}={raw:?} is not an integer, using default {default}");
            default
        }
    }
}

/// Parse a boolean setting; anything other than `true`/`1` is false.
fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(r) => matches!(r.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        None => default,
    }
}
