//! Path helpers for handling user-supplied locations.

use std::path::{Path, PathBuf};

/// Expand a leading tilde to the user's home directory.
///
/// External tools (yt-dlp, ffmpeg) do not understand `~` paths, so every
/// configured location goes through this before being handed to a child
/// process.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// True when the file exists with a nonzero size.
pub fn is_nonempty_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
