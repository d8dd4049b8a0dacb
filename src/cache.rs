//! On-disk JSON caches for pipeline artifacts.
//!
//! Transcripts and summaries are idempotent caches keyed by video id: a
//! pipeline re-run reuses them instead of paying for another provider call.
//! Writes are atomic (temp file + rename) so a reader never observes a torn
//! file, and all access to one cache goes through its mutex.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Transcript text plus the provider call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub video_id: String,
    pub text: String,
    pub provider: String,
    pub model: String,
    pub audio_duration_seconds: Option<f64>,
    pub created_at: String,
}

/// Summary text plus token accounting from the provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub video_id: String,
    pub text: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
    pub created_at: String,
}

impl TranscriptArtifact {
    pub fn new(
        video_id: &str,
        text: String,
        provider: &str,
        model: &str,
        audio_duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            video_id: video_id.to_string(),
            text,
            provider: provider.to_string(),
            model: model.to_string(),
            audio_duration_seconds,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

impl SummaryArtifact {
    pub fn new(
        video_id: &str,
        text: String,
        provider: &str,
        model: &str,
        prompt_tokens: Option<i64>,
        response_tokens: Option<i64>,
    ) -> Self {
        Self {
            video_id: video_id.to_string(),
            text,
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_tokens,
            response_tokens,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// One directory of `{video_id}.json` files guarded by a mutex.
pub struct JsonCache {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonCache {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{video_id}.json"))
    }

    /// Load a cached artifact. Unreadable or corrupt entries are treated as
    /// absent (logged), so a damaged cache file costs a provider call, not
    /// the whole job.
    pub fn load<T: DeserializeOwned>(&self, video_id: &str) -> Option<T> {
        let _guard = self.lock.lock().unwrap();
        let path = self.entry_path(video_id);
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::error!("Corrupt cache entry {path:?}: {e}");
                    None
                }
            },
            Err(e) => {
                log::error!("Error reading cache entry {path:?}: {e}");
                None
            }
        }
    }

    /// Atomically persist an artifact: write `{path}.tmp`, flush to disk,
    /// rename over the destination.
    pub fn store<T: Serialize>(&self, video_id: &str, value: &T) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let path = self.entry_path(video_id);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(value)?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        log::info!("Cached {:?}", path.file_name().unwrap_or_default());
        Ok(())
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.entry_path(video_id).exists()
    }
}

/// Both artifact caches the pipeline works with.
pub struct PipelineCache {
    pub transcripts: JsonCache,
    pub summaries: JsonCache,
}

impl PipelineCache {
    pub fn new(cache_dir: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self {
            transcripts: JsonCache::new(cache_dir.join("transcripts"))?,
            summaries: JsonCache::new(cache_dir.join("summaries"))?,
        })
    }
}
