//! Capture file store.
//!
//! Every streaming session tees its audio into `capture_dir/{video_id}.mp3`.
//! The store answers the capture-ready probe, tracks in-progress writes via
//! `.part` marker files so a partial capture is never reported ready, and
//! enforces a keep-newest-N retention policy over the directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::paths::is_nonempty_file;

pub struct CaptureStore {
    dir: PathBuf,
    max_files: usize,
}

impl CaptureStore {
    pub fn new(dir: PathBuf, max_files: usize) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        log::info!("Capture store at {dir:?}, keeping {max_files} files");
        Ok(Self { dir, max_files })
    }

    /// Path of the capture file for a video.
    pub fn path(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{video_id}.mp3"))
    }

    fn marker_path(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{video_id}.part"))
    }

    /// True once the capture file exists with a nonzero size and no writer
    /// holds the in-progress marker. File presence only, no content checks.
    pub fn is_ready(&self, video_id: &str) -> bool {
        !self.is_in_progress(video_id) && is_nonempty_file(&self.path(video_id))
    }

    /// Mark a capture as being written. The probe reports not-ready until
    /// [`CaptureStore::clear_in_progress`] runs.
    pub fn mark_in_progress(&self, video_id: &str) -> std::io::Result<()> {
        std::fs::File::create(self.marker_path(video_id))?;
        Ok(())
    }

    pub fn clear_in_progress(&self, video_id: &str) {
        let marker = self.marker_path(video_id);
        if marker.exists() {
            if let Err(e) = std::fs::remove_file(&marker) {
                log::error!("Failed to remove capture marker {marker:?}: {e}");
            }
        }
    }

    pub fn is_in_progress(&self, video_id: &str) -> bool {
        self.marker_path(video_id).exists()
    }

    /// Best-effort delete of a capture file; errors are logged, not returned.
    pub fn remove(&self, video_id: &str) {
        let path = self.path(video_id);
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("Removed capture file {path:?}"),
                Err(e) => log::error!("Failed to remove capture file {path:?}: {e}"),
            }
        }
    }

    /// Delete a capture that never received any bytes (failed session).
    pub fn remove_if_empty(&self, video_id: &str) {
        let path = self.path(video_id);
        if path.exists() && !is_nonempty_file(&path) {
            if let Err(e) = std::fs::remove_file(&path) {
                log::error!("Failed to remove empty capture {path:?}: {e}");
            } else {
                log::info!("Removed zero-byte capture {path:?}");
            }
        }
    }

    /// Delete the oldest capture files (by mtime) beyond the retention
    /// limit. Errors are logged, never fatal.
    pub fn cleanup_old_files(&self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Capture cleanup: cannot list {:?}: {e}", self.dir);
                return;
            }
        };

        let mut files: Vec<(PathBuf, SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map(|e| e == "mp3").unwrap_or(false) {
                    let mtime = entry.metadata().and_then(|m| m.modified()).ok()?;
                    Some((path, mtime))
                } else {
                    None
                }
            })
            .collect();

        if files.len() <= self.max_files {
            return;
        }

        // oldest first
        files.sort_by_key(|(_, mtime)| *mtime);
        let excess = files.len() - self.max_files;
        log::info!(
            "Capture cleanup: removing {excess} old file(s) (limit {})",
            self.max_files
        );

        for (path, _) in files.into_iter().take(excess) {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("Removed old capture {:?}", file_name(&path)),
                Err(e) => log::error!("Failed to remove {path:?}: {e}"),
            }
        }
    }

    /// Run retention on a background task so a stalled filesystem (network
    /// mounts) never blocks the caller.
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.cleanup_old_files());
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (CaptureStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = CaptureStore::new(temp.path().to_path_buf(), 3).unwrap();
        (store, temp)
    }

    fn write_capture(store: &CaptureStore, video_id: &str, contents: &[u8]) {
        let mut f = std::fs::File::create(store.path(video_id)).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn ready_requires_nonzero_file() {
        let (store, _temp) = setup();
        assert!(!store.is_ready("aaaaaaaaaaa"));

        write_capture(&store, "aaaaaaaaaaa", b"");
        assert!(!store.is_ready("aaaaaaaaaaa"));

        write_capture(&store, "aaaaaaaaaaa", b"mp3 bytes");
        assert!(store.is_ready("aaaaaaaaaaa"));
    }

    #[test]
    fn marker_blocks_ready_until_cleared() {
        let (store, _temp) = setup();
        write_capture(&store, "aaaaaaaaaaa", b"mp3 bytes");

        store.mark_in_progress("aaaaaaaaaaa").unwrap();
        assert!(store.is_in_progress("aaaaaaaaaaa"));
        assert!(!store.is_ready("aaaaaaaaaaa"));

        store.clear_in_progress("aaaaaaaaaaa");
        assert!(!store.is_in_progress("aaaaaaaaaaa"));
        assert!(store.is_ready("aaaaaaaaaaa"));
    }

    #[test]
    fn clear_marker_twice_is_harmless() {
        let (store, _temp) = setup();
        store.clear_in_progress("aaaaaaaaaaa");
        store.mark_in_progress("aaaaaaaaaaa").unwrap();
        store.clear_in_progress("aaaaaaaaaaa");
        store.clear_in_progress("aaaaaaaaaaa");
    }

    #[test]
    fn remove_if_empty_keeps_real_captures() {
        let (store, _temp) = setup();
        write_capture(&store, "aaaaaaaaaaa", b"");
        write_capture(&store, "bbbbbbbbbbb", b"mp3 bytes");

        store.remove_if_empty("aaaaaaaaaaa");
        store.remove_if_empty("bbbbbbbbbbb");
        store.remove_if_empty("ccccccccccc"); // missing: no-op

        assert!(!store.path("aaaaaaaaaaa").exists());
        assert!(store.path("bbbbbbbbbbb").exists());
    }

    #[test]
    fn retention_removes_exactly_the_oldest() {
        let (store, _temp) = setup();

        for (i, id) in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc", "ddddddddddd"]
            .iter()
            .enumerate()
        {
            write_capture(&store, id, format!("capture {i}").as_bytes());
            // distinct mtimes so the LRU order is deterministic
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        store.cleanup_old_files();

        assert!(!store.path("aaaaaaaaaaa").exists());
        assert!(store.path("bbbbbbbbbbb").exists());
        assert!(store.path("ccccccccccc").exists());
        assert!(store.path("ddddddddddd").exists());
    }

    #[test]
    fn retention_under_limit_removes_nothing() {
        let (store, _temp) = setup();
        write_capture(&store, "aaaaaaaaaaa", b"one");
        write_capture(&store, "bbbbbbbbbbb", b"two");

        store.cleanup_old_files();

        assert!(store.path("aaaaaaaaaaa").exists());
        assert!(store.path("bbbbbbbbbbb").exists());
    }

    #[test]
    fn retention_ignores_markers_and_foreign_files() {
        let (store, _temp) = setup();
        for id in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"] {
            write_capture(&store, id, b"data");
        }
        store.mark_in_progress("ddddddddddd").unwrap();
        std::fs::write(store.path("notes").with_extension("txt"), b"x").unwrap();

        // 3 mp3 files == limit; markers/others do not count against it
        store.cleanup_old_files();
        assert_eq!(
            std::fs::read_dir(store.dir.clone())
                .unwrap()
                .flatten()
                .filter(|e| e.path().extension().map(|x| x == "mp3").unwrap_or(false))
                .count(),
            3
        );
        assert!(store.is_in_progress("ddddddddddd"));
    }
}
