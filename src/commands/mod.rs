//! Transport-agnostic command surface.
//!
//! Every operation a client can perform is a function here over the
//! [`AppContext`]; the HTTP layer in `server` is a thin mapping onto these.

pub mod history;
pub mod jobs;
pub mod queue;
pub mod stream;

pub use history::*;
pub use jobs::*;
pub use queue::*;
pub use stream::*;

use std::sync::Arc;

use crate::capture::CaptureStore;
use crate::config::Config;
use crate::database::Database;
use crate::ingest::StreamSupervisor;
use crate::jobs::JobEngine;

/// Shared handles the command surface operates on.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub captures: Arc<CaptureStore>,
    pub jobs: Arc<JobEngine>,
    pub supervisor: Arc<StreamSupervisor>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A context over temp storage with no worker or server running.
    pub fn test_context() -> (AppContext, TempDir) {
        let temp = TempDir::new().unwrap();

        let mut config = Config::load_from_env();
        config.database_path = temp.path().join("test.db");
        config.capture_dir = temp.path().join("captures");
        config.cache_dir = temp.path().join("cache");
        config.backup_dir = temp.path().join("backup");
        config.pipeline_enabled = false;
        let config = Arc::new(config);

        let db = Arc::new(Database::new(&config.database_path).unwrap());
        let captures =
            Arc::new(CaptureStore::new(config.capture_dir.clone(), config.capture_max_files).unwrap());
        let jobs = JobEngine::new();
        let supervisor =
            StreamSupervisor::new(config.clone(), db.clone(), captures.clone(), jobs.clone());

        (
            AppContext {
                config,
                db,
                captures,
                jobs,
                supervisor,
            },
            temp,
        )
    }
}
