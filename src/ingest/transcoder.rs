//! ffmpeg transcode step.
//!
//! Takes the extractor's raw audio on stdin and produces MP3 twice over via
//! the tee muxer: once on stdout for the broadcaster, once into the capture
//! file. The tee keeps capture writes off the streaming hot path.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, ChildStdout, Command};

/// Spawn ffmpeg reading `input` and writing MP3 to both stdout and the
/// capture file.
pub fn spawn_transcoder(
    transcoder_bin: &str,
    input: ChildStdout,
    capture_path: &Path,
    audio_quality: u32,
) -> std::io::Result<Child> {
    let input: Stdio = input.try_into()?;

    Command::new(transcoder_bin)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-map",
            "0:a",
            "-c:a",
            "libmp3lame",
            "-q:a",
            &audio_quality.to_string(),
            "-f",
            "tee",
        ])
        .arg(tee_spec(capture_path))
        .stdin(input)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Build the tee muxer output spec: `[f=mp3]pipe:1|[f=mp3]<capture>`.
fn tee_spec(capture_path: &Path) -> String {
    format!("[f=mp3]pipe:1|[f=mp3]{}", capture_path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tee_spec_names_both_outputs() {
        let spec = tee_spec(&PathBuf::from("/data/captures/dQw4w9WgXcQ.mp3"));
        assert_eq!(spec, "[f=mp3]pipe:1|[f=mp3]/data/captures/dQw4w9WgXcQ.mp3");
    }
}
