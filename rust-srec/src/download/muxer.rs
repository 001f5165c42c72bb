//! Stream-copy remux/merge via the external muxer (ffmpeg) and its probe
//! companion (ffprobe). Grounded on the teacher's transcode processor but
//! narrowed to this service's single use case: copying, never re-encoding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::process;

/// Make `path` absolute, preferring canonicalization when the file exists.
pub fn make_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if path.exists()
        && let Ok(abs) = std::fs::canonicalize(path)
    {
        return abs;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Whether a component probes as carrying a video or audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Neither,
}

/// Probe a file's first video then first audio stream via the muxer's probe
/// companion to classify it (§4.6.5 "classify each component").
pub async fn classify_component(
    probe_path: &str,
    file: &Path,
    cancellation_token: &CancellationToken,
) -> Result<StreamKind> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "stream=codec_type".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        make_absolute(file).to_string_lossy().to_string(),
    ];
    let cmd = process::command(probe_path, &args);
    let output = process::run(cmd, Duration::from_secs(20), cancellation_token).await?;
    if !output.success() {
        return Ok(StreamKind::Neither);
    }
    if output.stdout.lines().any(|l| l.trim() == "video") {
        Ok(StreamKind::Video)
    } else if output.stdout.lines().any(|l| l.trim() == "audio") {
        Ok(StreamKind::Audio)
    } else {
        Ok(StreamKind::Neither)
    }
}

/// Stream-copy merge a video component and an audio component into a single
/// `.mkv` output (§4.6.5 component merge / audio-rescue).
pub async fn merge_streams(
    muxer_path: &str,
    video: &Path,
    audio: &Path,
    output: &Path,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        make_absolute(video).to_string_lossy().to_string(),
        "-i".to_string(),
        make_absolute(audio).to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0?".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        make_absolute(output).to_string_lossy().to_string(),
    ];
    let cmd = process::command(muxer_path, &args);
    let result = process::run(cmd, Duration::from_secs(120), cancellation_token).await?;
    if !result.success() {
        return Err(Error::Process(format!(
            "muxer exited with {:?}: {}",
            result.exit_code,
            result.stderr_tail(20)
        )));
    }
    Ok(())
}

/// Probe a finished file's primary video/audio stream attributes for the
/// task's `width`/`height`/`vcodec`/`acodec` fields.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

pub async fn probe_streams(
    probe_path: &str,
    file: &Path,
    cancellation_token: &CancellationToken,
) -> Result<StreamInfo> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "stream=codec_type,codec_name,width,height".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        make_absolute(file).to_string_lossy().to_string(),
    ];
    let cmd = process::command(probe_path, &args);
    let output = process::run(cmd, Duration::from_secs(20), cancellation_token).await?;
    let mut info = StreamInfo::default();
    if !output.success() {
        return Ok(info);
    }
    for line in output.stdout.lines() {
        let parts: Vec<&str> = line.split(',').collect();
        let Some(&kind) = parts.first() else { continue };
        match kind {
            "video" if info.vcodec.is_none() => {
                info.vcodec = parts.get(1).map(|s| s.to_string());
                info.width = parts.get(2).and_then(|s| s.parse().ok());
                info.height = parts.get(3).and_then(|s| s.parse().ok());
            }
            "audio" if info.acodec.is_none() => {
                info.acodec = parts.get(1).map(|s| s.to_string());
            }
            _ => {}
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_absolute_passes_through_absolute_paths() {
        let p = PathBuf::from("/tmp/foo.mp4");
        assert_eq!(make_absolute(&p), p);
    }

    #[test]
    fn make_absolute_resolves_relative_against_cwd() {
        let p = PathBuf::from("nonexistent-file.mp4");
        let abs = make_absolute(&p);
        assert!(abs.is_absolute());
    }
}
