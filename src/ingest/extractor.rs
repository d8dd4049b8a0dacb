//! yt-dlp interface: metadata lookup, live audio extraction, and the warm
//! download used by pre-fetch.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::error::AppError;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Video ids are 11 characters of `[A-Za-z0-9_-]`, nothing else.
pub fn validate_video_id(video_id: &str) -> bool {
    video_id.len() == 11
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub channel: Option<String>,
    pub thumbnail_url: String,
    pub duration_seconds: Option<f64>,
}

/// Fetch title, channel, and duration without downloading anything.
pub async fn fetch_metadata(extractor_bin: &str, video_id: &str) -> Result<VideoMetadata, AppError> {
    let output = tokio::time::timeout(
        METADATA_TIMEOUT,
        Command::new(extractor_bin)
            .args([
                "--dump-json",
                "--no-playlist",
                "--extractor-args",
                "youtube:player_client=android",
                &watch_url(video_id),
            ])
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| AppError::Unavailable(format!("metadata lookup for {video_id} timed out")))?
    .map_err(|e| AppError::Unavailable(format!("failed to run {extractor_bin}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Unavailable(format!(
            "extractor failed for {video_id}: {}",
            stderr.lines().last().unwrap_or("unknown error")
        )));
    }

    parse_metadata(video_id, &String::from_utf8_lossy(&output.stdout))
}

fn parse_metadata(video_id: &str, raw: &str) -> Result<VideoMetadata, AppError> {
    let info: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AppError::Unavailable(format!("unparseable extractor output: {e}")))?;

    let title = info
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("Unknown Title")
        .to_string();

    // channel naming varies by extractor version
    let channel = ["channel", "uploader", "creator"]
        .iter()
        .find_map(|key| info.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string());

    let duration_seconds = info.get("duration").and_then(|d| d.as_f64());

    Ok(VideoMetadata {
        title,
        channel,
        // hqdefault is always present, unlike maxresdefault
        thumbnail_url: format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg"),
        duration_seconds,
    })
}

/// Spawn yt-dlp writing the best audio stream to stdout, for the live
/// transcode path.
pub fn spawn_audio_stream(extractor_bin: &str, video_id: &str) -> std::io::Result<Child> {
    Command::new(extractor_bin)
        .args([
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--extractor-args",
            "youtube:player_client=android",
            "-o",
            "-",
            &watch_url(video_id),
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Spawn yt-dlp downloading straight to an MP3 file, for warming the next
/// queued capture. The `-o` path carries no extension; yt-dlp appends `.mp3`
/// itself (an explicit extension would yield `path.mp3.mp3`).
pub fn spawn_capture_download(
    extractor_bin: &str,
    video_id: &str,
    capture_path: &Path,
    audio_quality: u32,
) -> std::io::Result<Child> {
    let base_path = capture_path.with_extension("");

    Command::new(extractor_bin)
        .args([
            "-f",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            &audio_quality.to_string(),
            "--no-playlist",
            "--extractor-args",
            "youtube:player_client=android",
            "-o",
        ])
        .arg(&base_path)
        .arg(watch_url(video_id))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids_pass() {
        assert!(validate_video_id("dQw4w9WgXcQ"));
        assert!(validate_video_id("abc-DEF_123"));
    }

    #[test]
    fn wrong_length_fails() {
        assert!(!validate_video_id(""));
        assert!(!validate_video_id("short"));
        assert!(!validate_video_id("dQw4w9WgXcQQ"));
    }

    #[test]
    fn bad_characters_fail() {
        assert!(!validate_video_id("dQw4w9WgXc!"));
        assert!(!validate_video_id("dQw4w9WgXc "));
        assert!(!validate_video_id("dQw4w9Wg/cQ"));
        // a URL is not an id
        assert!(!validate_video_id("youtu.be/dQ"));
    }

    #[test]
    fn metadata_parses_full_payload() {
        let raw = r#"{
            "title": "A Video",
            "channel": "A Channel",
            "uploader": "ignored",
            "duration": 1234.5
        }"#;
        let meta = parse_metadata("dQw4w9WgXcQ", raw).unwrap();
        assert_eq!(meta.title, "A Video");
        assert_eq!(meta.channel.as_deref(), Some("A Channel"));
        assert_eq!(meta.duration_seconds, Some(1234.5));
        assert!(meta.thumbnail_url.contains("dQw4w9WgXcQ"));
    }

    #[test]
    fn metadata_falls_back_through_channel_fields() {
        let meta = parse_metadata("dQw4w9WgXcQ", r#"{"title": "T", "uploader": "Up"}"#).unwrap();
        assert_eq!(meta.channel.as_deref(), Some("Up"));

        let meta = parse_metadata("dQw4w9WgXcQ", r#"{"title": "T"}"#).unwrap();
        assert!(meta.channel.is_none());
    }

    #[test]
    fn metadata_defaults_missing_title() {
        let meta = parse_metadata("dQw4w9WgXcQ", r#"{"duration": 5}"#).unwrap();
        assert_eq!(meta.title, "Unknown Title");
    }

    #[test]
    fn metadata_rejects_garbage() {
        assert!(parse_metadata("dQw4w9WgXcQ", "not json").is_err());
    }
}
