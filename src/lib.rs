//! radiocast: a self-hosted YouTube audio radio with an archival pipeline.
//!
//! One active ingest session (`yt-dlp | ffmpeg`) fans MP3 chunks out to any
//! number of HTTP listeners while teeing the same bytes into a capture
//! file. When a stream ends naturally, a background job transcribes and
//! summarizes the capture and publishes the summary to a note store. A
//! persistent queue sequences videos with auto-advance and pre-fetch.

pub mod broadcast;
pub mod cache;
pub mod capture;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod paths;
pub mod providers;
pub mod server;

use std::sync::Arc;

pub use commands::AppContext;
pub use config::Config;
pub use error::AppError;

use cache::PipelineCache;
use capture::CaptureStore;
use database::Database;
use ingest::StreamSupervisor;
use jobs::stages::Collaborators;
use jobs::JobEngine;
use providers::notestore::{BackupSink, EtapiClient};
use providers::openai::OpenAiClient;

/// Build every shared handle and start the job worker.
///
/// Must run inside the tokio runtime: the worker task is spawned here when
/// the pipeline is enabled.
pub fn init(config: Config) -> Result<AppContext, AppError> {
    let config = Arc::new(config);
    config.ensure_directories()?;

    let db = Arc::new(Database::new(&config.database_path)?);
    let captures = Arc::new(CaptureStore::new(
        config.capture_dir.clone(),
        config.capture_max_files,
    )?);
    let jobs = JobEngine::new();
    let supervisor = StreamSupervisor::new(config.clone(), db.clone(), captures.clone(), jobs.clone());

    if config.pipeline_enabled {
        let cache = Arc::new(PipelineCache::new(&config.cache_dir)?);
        let backup = Arc::new(BackupSink::new(config.backup_dir.clone())?);

        // validate() has already checked these are present
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| AppError::InvalidInput("OPENAI_API_KEY missing".to_string()))?;
        let notes_url = config
            .notes_url
            .clone()
            .ok_or_else(|| AppError::InvalidInput("NOTES_URL missing".to_string()))?;
        let notes_token = config
            .notes_token
            .clone()
            .ok_or_else(|| AppError::InvalidInput("NOTES_ETAPI_TOKEN missing".to_string()))?;
        let notes_parent = config
            .notes_parent_id
            .clone()
            .ok_or_else(|| AppError::InvalidInput("NOTES_PARENT_NOTE_ID missing".to_string()))?;

        let openai = Arc::new(OpenAiClient::new(
            api_key,
            config.transcription_model.clone(),
            config.summary_model.clone(),
        ));
        let notes = Arc::new(EtapiClient::new(notes_url, notes_token, notes_parent));

        jobs.start(Arc::new(Collaborators {
            db: db.clone(),
            captures: captures.clone(),
            cache,
            transcriber: openai.clone(),
            summarizer: openai,
            notes,
            backup,
        }));
        log::info!("Post-capture pipeline enabled");
    } else {
        log::info!("Post-capture pipeline disabled");
    }

    Ok(AppContext {
        config,
        db,
        captures,
        jobs,
        supervisor,
    })
}
