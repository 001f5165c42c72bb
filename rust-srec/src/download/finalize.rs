//! Finalization (§4.6.5): resolve the actual downloaded file among the
//! extractor's output, merge separate video/audio components if needed,
//! rename with a height suffix, and write the metadata sidecar.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::MetaMode;
use crate::domain::{Mode, Task};
use crate::error::Result;

use super::muxer::{self, StreamKind};

fn component_regex(base_name: &str) -> Regex {
    let escaped = regex::escape(base_name);
    Regex::new(&format!(r"^{escaped}\.f\d+\..*$")).expect("valid regex")
}

/// Candidate files produced by a single extractor invocation for `base_name`.
pub struct Candidates {
    pub merged: Option<PathBuf>,
    pub components: Vec<PathBuf>,
}

/// Enumerate files in `dir` whose name starts with `base_name.`, splitting
/// the extractor's per-stream component files from a single merged output.
pub fn scan_candidates(dir: &Path, base_name: &str) -> std::io::Result<Candidates> {
    let component_re = component_regex(base_name);
    let mut merged = None;
    let mut components = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&format!("{base_name}.")) {
            continue;
        }
        let path = entry.path();
        if component_re.is_match(name) {
            components.push(path);
        } else if merged.is_none() {
            merged = Some(path);
        }
    }
    Ok(Candidates { merged, components })
}

/// Resolve the final output file, performing a component merge if the
/// extractor left separate video/audio files and no single merged output.
pub async fn resolve_output(
    dir: &Path,
    base_name: &str,
    muxer_path: &str,
    probe_path: &str,
    cancellation_token: &CancellationToken,
) -> Result<Option<PathBuf>> {
    let candidates = scan_candidates(dir, base_name)?;
    if let Some(merged) = candidates.merged {
        return Ok(Some(merged));
    }
    if candidates.components.is_empty() {
        return Ok(None);
    }

    let mut video: Option<(PathBuf, std::time::SystemTime)> = None;
    let mut audio: Option<(PathBuf, std::time::SystemTime)> = None;
    for component in candidates.components {
        let kind = muxer::classify_component(probe_path, &component, cancellation_token).await?;
        let modified = std::fs::metadata(&component)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        match kind {
            StreamKind::Video if video.as_ref().is_none_or(|(_, t)| modified > *t) => {
                video = Some((component, modified));
            }
            StreamKind::Audio if audio.as_ref().is_none_or(|(_, t)| modified > *t) => {
                audio = Some((component, modified));
            }
            _ => {}
        }
    }

    let (Some((video, _)), Some((audio, _))) = (video, audio) else {
        return Ok(None);
    };
    let output = dir.join(format!("{base_name}.mkv"));
    muxer::merge_streams(muxer_path, &video, &audio, &output, cancellation_token).await?;
    Ok(Some(output))
}

/// Rename `file` to append `_<height>p` before the extension, unless the
/// name already carries that suffix (idempotent, §4.6.5).
pub fn rename_with_height(file: &Path, height: u32) -> std::io::Result<PathBuf> {
    let suffix_re = Regex::new(r"_\d{3,4}p$").expect("valid regex");
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if suffix_re.is_match(stem) {
        return Ok(file.to_path_buf());
    }
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
    let new_name = if ext.is_empty() {
        format!("{stem}_{height}p")
    } else {
        format!("{stem}_{height}p.{ext}")
    };
    let new_path = file.with_file_name(new_name);
    std::fs::rename(file, &new_path)?;
    Ok(new_path)
}

/// Sidecar metadata payload (§4.6.5).
#[derive(Debug, Serialize)]
pub struct Sidecar {
    pub task_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub quality: String,
    pub mode: Mode,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub file_size: Option<u64>,
    pub final_path: String,
    pub renamed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub meta_mode: MetaMode,
}

/// Write the metadata sidecar per `meta_mode`, a no-op when `Off`.
pub fn write_sidecar(
    sidecar: &Sidecar,
    meta_mode: MetaMode,
    meta_dir: Option<&Path>,
) -> Result<()> {
    let target = match meta_mode {
        MetaMode::Off => return Ok(()),
        MetaMode::Sidecar => PathBuf::from(format!("{}.meta.json", sidecar.final_path)),
        MetaMode::Folder => {
            let dir = meta_dir.ok_or_else(|| {
                crate::error::Error::config("folder meta mode requires META_DIR")
            })?;
            let basename = Path::new(&sidecar.final_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "output".to_string());
            dir.join(format!("{basename}.json"))
        }
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| crate::error::Error::io_path("creating directory", parent, e))?;
    }
    let json = serde_json::to_vec_pretty(sidecar)?;
    std::fs::write(&target, json).map_err(|e| crate::error::Error::io_path("writing sidecar", &target, e))?;
    Ok(())
}

/// A finished task's metadata sidecar, built from the task's final state.
pub fn sidecar_for_task(task: &Task, final_path: &str, renamed: bool) -> Sidecar {
    Sidecar {
        task_id: task.id.clone(),
        source_url: task.url.clone(),
        title: task.title.clone(),
        quality: task.quality.clone(),
        mode: task.mode,
        width: task.width,
        height: task.height,
        vcodec: task.vcodec.clone(),
        acodec: task.acodec.clone(),
        file_size: task.file_size,
        final_path: final_path.to_string(),
        renamed,
        created_at: task.created_at,
        completed_at: Utc::now(),
        meta_mode: task.meta_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_candidates_separates_components_from_merged() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Title.f137.mp4"), b"v").unwrap();
        std::fs::write(dir.path().join("Title.f140.m4a"), b"a").unwrap();
        let candidates = scan_candidates(dir.path(), "Title").unwrap();
        assert!(candidates.merged.is_none());
        assert_eq!(candidates.components.len(), 2);
    }

    #[test]
    fn scan_candidates_finds_single_merged_output() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Title.mp4"), b"merged").unwrap();
        let candidates = scan_candidates(dir.path(), "Title").unwrap();
        assert!(candidates.merged.is_some());
        assert!(candidates.components.is_empty());
    }

    #[test]
    fn rename_with_height_appends_suffix() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Song.mp4");
        std::fs::write(&file, b"x").unwrap();
        let renamed = rename_with_height(&file, 1080).unwrap();
        assert_eq!(renamed.file_name().unwrap().to_str().unwrap(), "Song_1080p.mp4");
    }

    #[test]
    fn rename_with_height_is_idempotent() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Song_1080p.mp4");
        std::fs::write(&file, b"x").unwrap();
        let renamed = rename_with_height(&file, 1080).unwrap();
        assert_eq!(renamed, file);
    }
}
