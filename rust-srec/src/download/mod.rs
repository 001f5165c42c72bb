//! Download Supervisor (C6): drives a single task from `queued` through
//! `finished`/`error`/`canceled`, running the extractor and muxer as child
//! processes and walking the retry/fallback ladder (§4.6.4).

pub mod finalize;
pub mod muxer;
pub mod selector;
pub mod subtitles;

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::domain::{Mode, Task, TaskStatus};
use crate::error::{Error, ErrorKind, Result};
use crate::process::{self, ProcessOutput};
use crate::site::{SiteProfile, Stage};
use crate::task::SharedTask;

const PARTIAL_SUCCESS_MIN_SIZE: u64 = 100 * 1024;

/// Extract the `[download]  NN.N%` progress percentage from an extractor
/// stderr line, if present.
fn parse_progress_percent(line: &str) -> Option<f32> {
    let rest = line.trim_start().strip_prefix("[download]")?.trim_start();
    let digits: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('%') {
        return None;
    }
    digits.parse().ok()
}

/// Run a child process while parsing its stderr line by line, publishing
/// progress and log lines to `task` as they arrive (§4.8/C6 live-progress).
async fn run_with_progress(
    task: &SharedTask,
    cmd: tokio::process::Command,
    timeout: Duration,
    cancellation_token: &CancellationToken,
) -> Result<ProcessOutput> {
    let mut child = process::StreamingProcess::spawn(cmd)?;
    child.drain_stdout();
    let stderr_lines = child.stderr_lines();
    let task_for_lines = task.clone();

    let lines_fut = async move {
        let mut stderr = String::new();
        if let Some(mut lines) = stderr_lines {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(pct) = parse_progress_percent(&line) {
                    task_for_lines.write().set_progress(pct);
                }
                task_for_lines.write().push_log(line.clone());
                stderr.push_str(&line);
                stderr.push('\n');
            }
        }
        stderr
    };

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            child.kill().await;
            Err(Error::Process("canceled".into()))
        }
        _ = tokio::time::sleep(timeout) => {
            child.kill().await;
            Err(Error::Process(format!("timed out after {timeout:?}")))
        }
        stderr = lines_fut => {
            let exit_code = child.wait(cancellation_token).await;
            Ok(ProcessOutput {
                exit_code,
                stdout: String::new(),
                stderr,
            })
        }
    }
}

fn base_name(task: &Task) -> String {
    let title = task.title.as_deref().unwrap_or("video");
    let sanitized = crate::utils::filename::sanitize_filename(title);
    let short_id: String = task.id.chars().take(8).collect();
    format!("{sanitized}-{short_id}")
}

fn output_template(download_dir: &std::path::Path, base: &str) -> String {
    download_dir.join(format!("{base}.%(ext)s")).to_string_lossy().to_string()
}

/// Run `task` to completion (or terminal failure/cancellation), mutating its
/// status, progress, log, and result fields in place via short write locks so
/// concurrent readers (the task API, the SSE stream) see live progress.
pub async fn execute(
    task: &SharedTask,
    cfg: &ServiceConfig,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let url = task.read().url.clone();
    let profile = SiteProfile::for_url(&url);
    std::fs::create_dir_all(&cfg.download_dir)
        .map_err(|e| Error::io_path("creating download directory", &cfg.download_dir, e))?;

    let (skip_probe, has_title) = {
        let t = task.read();
        (t.skip_probe, t.title.is_some())
    };

    if !skip_probe && !has_title {
        {
            let mut t = task.write();
            t.set_progress(1.0);
            t.stage = "fetch_info".to_string();
        }
        match crate::probe::probe(&cfg.extractor_path, &url, &profile, cfg, cancellation_token).await {
            Ok(info) => task.write().title = Some(info.title),
            Err(e) => task.write().push_log(format!("probe failed: {e}")),
        }
    } else if skip_probe && has_title {
        task.write().stage = "fast_start".to_string();
    }

    task.write().status = TaskStatus::Downloading;

    let mode = task.read().mode;
    let result = match mode {
        Mode::SubtitlesOnly => run_subtitles_only(task, cfg, &profile, cancellation_token).await,
        Mode::ThumbnailOnly => run_thumbnail_only(task, cfg, &profile, cancellation_token).await,
        Mode::Merged | Mode::VideoOnly | Mode::AudioOnly => {
            run_media(task, cfg, &profile, cancellation_token).await
        }
    };

    match result {
        Ok(()) => {
            let mut t = task.write();
            t.status = TaskStatus::Finished;
            t.set_progress(100.0);
        }
        Err(Error::Process(msg)) if msg == "canceled" => {
            task.write().status = TaskStatus::Canceled;
        }
        Err(e) => {
            let kind = e.kind();
            let mut t = task.write();
            t.status = TaskStatus::Error;
            t.error_code = Some(kind);
            t.error_message = Some(e.to_string());
            t.push_log(format!("error: {e}"));
        }
    }

    Ok(())
}

async fn run_subtitles_only(
    task: &SharedTask,
    cfg: &ServiceConfig,
    profile: &SiteProfile,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let (base, subtitle_langs, auto_captions, url) = {
        let t = task.read();
        (base_name(&t), t.subtitle_langs.clone(), t.auto_captions, t.url.clone())
    };
    let langs = if subtitle_langs.is_empty() {
        "en".to_string()
    } else {
        subtitle_langs.join(",")
    };

    let mut args = profile.extractor_flags(Stage::Primary, cfg.disable_accelerator, &cfg.cookie_flags());
    args.push("--skip-download".to_string());
    args.push("--write-subs".to_string());
    args.push("--sub-langs".to_string());
    args.push(langs);
    if auto_captions {
        args.push("--write-auto-subs".to_string());
    }
    args.push("-o".to_string());
    args.push(output_template(&cfg.download_dir, &base));
    args.push(url);

    task.write().stage = "downloading".to_string();
    let cmd = process::command(&cfg.extractor_path, &args);
    let output = run_with_progress(task, cmd, Duration::from_secs(60), cancellation_token).await?;
    if !output.success() {
        let kind = ErrorKind::classify(&output.stderr_tail(40));
        return Err(Error::download(kind, output.stderr_tail(40)));
    }

    for entry in std::fs::read_dir(&cfg.download_dir)
        .map_err(|e| Error::io_path("reading download directory", &cfg.download_dir, e))?
    {
        let entry = entry.map_err(|e| Error::io_path("reading directory entry", &cfg.download_dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("srt")
            && path.file_stem().and_then(|s| s.to_str()).is_some_and(|s| s.starts_with(&base))
        {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::io_path("reading subtitle file", &path, e))?;
            let normalized = subtitles::normalize_srt(&raw);
            std::fs::write(&path, normalized)
                .map_err(|e| Error::io_path("writing subtitle file", &path, e))?;
        }
    }

    task.write().file_path = Some(output_template(&cfg.download_dir, &base));
    Ok(())
}

async fn run_thumbnail_only(
    task: &SharedTask,
    cfg: &ServiceConfig,
    profile: &SiteProfile,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let (base, url) = {
        let t = task.read();
        (base_name(&t), t.url.clone())
    };
    let mut args = profile.extractor_flags(Stage::Primary, cfg.disable_accelerator, &cfg.cookie_flags());
    args.push("--skip-download".to_string());
    args.push("--write-thumbnail".to_string());
    args.push("--convert-thumbnails".to_string());
    args.push("jpg".to_string());
    args.push("-o".to_string());
    args.push(output_template(&cfg.download_dir, &base));
    args.push(url);

    task.write().stage = "downloading".to_string();
    let cmd = process::command(&cfg.extractor_path, &args);
    let output = run_with_progress(task, cmd, Duration::from_secs(60), cancellation_token).await?;
    if !output.success() {
        let kind = ErrorKind::classify(&output.stderr_tail(40));
        return Err(Error::download(kind, output.stderr_tail(40)));
    }
    task.write().file_path = Some(output_template(&cfg.download_dir, &base));
    Ok(())
}

struct Rung {
    selector: String,
    accelerator: bool,
    concurrency: u32,
    chunk_size: &'static str,
    extra_args: Vec<String>,
}

fn direct_selector(task: &Task) -> Option<String> {
    match (&task.video_format, &task.audio_format) {
        (Some(_), _) | (_, Some(_)) => Some(selector::build_selector(
            task.mode,
            &task.quality,
            task.video_format.as_deref(),
            task.audio_format.as_deref(),
        )),
        _ => None,
    }
}

fn adaptive_selector(task: &Task) -> String {
    selector::build_selector(task.mode, &task.quality, None, None)
}

fn is_youtube(profile: &SiteProfile) -> bool {
    profile.class == crate::site::SiteClass::Youtube
}

async fn run_media(
    task: &SharedTask,
    cfg: &ServiceConfig,
    profile: &SiteProfile,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let (base, direct, adaptive, mode, quality, skip_probe, url, task_id) = {
        let t = task.read();
        (
            base_name(&t),
            direct_selector(&t),
            adaptive_selector(&t),
            t.mode,
            t.quality.clone(),
            t.skip_probe,
            t.url.clone(),
            t.id.clone(),
        )
    };
    let used_direct_primary = direct.is_some();

    let primary = Rung {
        selector: direct.clone().unwrap_or_else(|| adaptive.clone()),
        accelerator: !cfg.disable_accelerator,
        concurrency: if is_youtube(profile) { 1 } else { 4 },
        chunk_size: if is_youtube(profile) { "1M" } else { "4M" },
        extra_args: vec!["--force-ipv4".to_string(), "--no-continue".to_string()],
    };

    let mut last_err: Option<Error> = None;
    let mut succeeded = false;

    for attempt_idx in 0..7u8 {
        if attempt_idx > 0 && last_err.is_none() {
            break;
        }

        let tail = last_err.as_ref().map(|e| e.to_string()).unwrap_or_default();
        let lower = tail.to_ascii_lowercase();

        let rung = match attempt_idx {
            0 => Some(build_rung(&primary)),
            1 if skip_probe
                && (lower.contains("requested format not available")
                    || lower.contains("no such format")
                    || lower.contains("unable to download video data")
                    || lower.contains("404")) =>
            {
                if let Ok(info) =
                    crate::probe::probe(&cfg.extractor_path, &url, profile, cfg, cancellation_token).await
                {
                    task.write().title = Some(info.title);
                }
                Some(Rung {
                    selector: adaptive.clone(),
                    accelerator: false,
                    concurrency: primary.concurrency,
                    chunk_size: primary.chunk_size,
                    extra_args: vec!["--force-ipv4".to_string()],
                })
            }
            2 if used_direct_primary => Some(Rung {
                selector: adaptive.clone(),
                accelerator: primary.accelerator,
                concurrency: primary.concurrency,
                chunk_size: primary.chunk_size,
                extra_args: vec!["--force-ipv4".to_string()],
            }),
            3 if mode == Mode::Merged
                && (lower.contains("invalid data found when processing input")
                    || lower.contains("error opening input files")) =>
            {
                let cap = selector::conservative_mp4_selector(
                    height_cap_token(&quality).unwrap_or("1080"),
                );
                Some(Rung {
                    selector: cap,
                    accelerator: false,
                    concurrency: primary.concurrency,
                    chunk_size: primary.chunk_size,
                    extra_args: vec![],
                })
            }
            4 if lower.contains("eof occurred in violation of protocol")
                || lower.contains("ssleof")
                || lower.contains("tlsv1")
                || lower.contains("10054")
                || lower.contains("connection reset") =>
            {
                Some(Rung {
                    selector: adaptive.clone(),
                    accelerator: false,
                    concurrency: (primary.concurrency / 2).max(1),
                    chunk_size: "8M",
                    extra_args: vec![],
                })
            }
            5 if (lower.contains("eof occurred in violation of protocol")
                || lower.contains("ssleof"))
                && !cfg.disable_accelerator =>
            {
                Some(Rung {
                    selector: adaptive.clone(),
                    accelerator: true,
                    concurrency: 1,
                    chunk_size: "8M",
                    extra_args: vec![],
                })
            }
            _ => None,
        };

        let Some(rung) = rung else { continue };

        {
            let mut t = task.write();
            t.attempt += 1;
            let attempt = t.attempt;
            t.stage = format!("downloading (attempt {attempt})");
        }
        debug!(task_id = %task_id, attempt = attempt_idx, selector = %rung.selector, "download rung");

        let mut args = profile.extractor_flags(Stage::Primary, !rung.accelerator, &cfg.cookie_flags());
        args.push("-f".to_string());
        args.push(rung.selector);
        args.push("--concurrent-fragments".to_string());
        args.push(rung.concurrency.to_string());
        args.push("--http-chunk-size".to_string());
        args.push(rung.chunk_size.to_string());
        args.extend(rung.extra_args);
        args.push("-o".to_string());
        args.push(output_template(&cfg.download_dir, &base));
        args.push(url.clone());

        let cmd = process::command(&cfg.extractor_path, &args);
        let output = run_with_progress(task, cmd, Duration::from_secs(600), cancellation_token).await?;
        if output.success() {
            succeeded = true;
            last_err = None;
            break;
        }
        let stderr_tail = output.stderr_tail(40);
        let kind = ErrorKind::classify(&stderr_tail);
        last_err = Some(Error::download(kind, stderr_tail));
    }

    if !succeeded {
        // Rung 7: partial-success scan before declaring failure.
        if let Some(path) = scan_for_partial_success(&cfg.download_dir, &base)? {
            warn!(task_id = %task_id, path = %path.display(), "adopting partial-success output");
            task.write().file_path = Some(path.to_string_lossy().to_string());
            succeeded = true;
        }
    }

    if !succeeded {
        return Err(last_err.unwrap_or_else(|| Error::download(ErrorKind::Unknown, "all rungs exhausted")));
    }

    {
        let mut t = task.write();
        t.status = TaskStatus::Merging;
        t.stage = "finalize".to_string();
    }
    finalize_task(task, cfg, &base, cancellation_token).await
}

fn build_rung(primary: &Rung) -> Rung {
    Rung {
        selector: primary.selector.clone(),
        accelerator: primary.accelerator,
        concurrency: primary.concurrency,
        chunk_size: primary.chunk_size,
        extra_args: primary.extra_args.clone(),
    }
}

fn height_cap_token(quality: &str) -> Option<&'static str> {
    match quality {
        "best8k" => Some("4320"),
        "best4k" => Some("2160"),
        "best" | "auto" => Some("1080"),
        "fast" => Some("720"),
        "640p" => Some("640"),
        _ => None,
    }
}

fn scan_for_partial_success(dir: &std::path::Path, base: &str) -> Result<Option<PathBuf>> {
    let candidates = finalize::scan_candidates(dir, base)
        .map_err(|e| Error::io_path("scanning download directory", dir, e))?;
    let Some(merged) = candidates.merged else {
        return Ok(None);
    };
    let size = std::fs::metadata(&merged)
        .map(|m| m.len())
        .unwrap_or(0);
    if size > PARTIAL_SUCCESS_MIN_SIZE {
        Ok(Some(merged))
    } else {
        Ok(None)
    }
}

async fn finalize_task(
    task: &SharedTask,
    cfg: &ServiceConfig,
    base: &str,
    cancellation_token: &CancellationToken,
) -> Result<()> {
    let (mode, url) = {
        let t = task.read();
        (t.mode, t.url.clone())
    };

    let resolved = finalize::resolve_output(
        &cfg.download_dir,
        base,
        &cfg.muxer_path,
        &cfg.muxer_probe_path,
        cancellation_token,
    )
    .await?;

    let Some(mut final_path) = resolved else {
        return Err(Error::download(ErrorKind::ExtractFail, "no output file resolved"));
    };

    let mut info = muxer::probe_streams(&cfg.muxer_probe_path, &final_path, cancellation_token).await?;

    if mode == Mode::Merged && info.acodec.is_none() {
        let audio_sidecar = final_path.with_extension("rescue.m4a");
        let mut args = vec![
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "-o".to_string(),
            audio_sidecar.to_string_lossy().to_string(),
            url.clone(),
        ];
        let extractor_flags = crate::site::SiteProfile::for_url(&url)
            .extractor_flags(Stage::Primary, cfg.disable_accelerator, &cfg.cookie_flags());
        let mut full_args = extractor_flags;
        full_args.append(&mut args);
        let cmd = process::command(&cfg.extractor_path, &full_args);
        let rescue_result = process::run(cmd, Duration::from_secs(300), cancellation_token).await;
        if let Ok(output) = rescue_result
            && output.success()
            && audio_sidecar.exists()
        {
            let merged_path = final_path.with_extension("rescued.mkv");
            muxer::merge_streams(
                &cfg.muxer_path,
                &final_path,
                &audio_sidecar,
                &merged_path,
                cancellation_token,
            )
            .await?;
            final_path = merged_path;
            info = muxer::probe_streams(&cfg.muxer_probe_path, &final_path, cancellation_token).await?;
        }
    }

    let mut renamed = false;
    if let Some(height) = info.height
        && height > 0
    {
        let new_path = finalize::rename_with_height(&final_path, height)
            .map_err(|e| Error::io_path("renaming output", &final_path, e))?;
        renamed = new_path != final_path;
        final_path = new_path;
    }

    let (sidecar, meta_mode) = {
        let mut t = task.write();
        t.file_path = Some(final_path.to_string_lossy().to_string());
        t.width = info.width;
        t.height = info.height;
        t.vcodec = info.vcodec;
        t.acodec = info.acodec;
        t.file_size = std::fs::metadata(&final_path).ok().map(|m| m.len());
        let sidecar = finalize::sidecar_for_task(&t, &final_path.to_string_lossy(), renamed);
        (sidecar, t.meta_mode)
    };
    finalize::write_sidecar(&sidecar, meta_mode, cfg.meta_dir.as_deref())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_task(mode: Mode) -> Task {
        Task {
            id: "0123456789abcdef".to_string(),
            url: "https://example.com/video".to_string(),
            mode,
            quality: "best".to_string(),
            video_format: None,
            audio_format: None,
            subtitle_langs: vec![],
            auto_captions: false,
            geo_bypass: false,
            container: None,
            filename_template: None,
            meta_mode: Default::default(),
            skip_probe: false,
            status: TaskStatus::Queued,
            stage: String::new(),
            progress: 0.0,
            attempt: 0,
            canceled: false,
            title: Some("Demo Video".to_string()),
            file_path: None,
            width: None,
            height: None,
            vcodec: None,
            acodec: None,
            file_size: None,
            error_code: None,
            error_message: None,
            warning: None,
            log: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn base_name_combines_sanitized_title_and_short_id() {
        let task = sample_task(Mode::Merged);
        let base = base_name(&task);
        assert!(base.starts_with("Demo Video"));
        assert!(base.ends_with("01234567"));
    }

    #[test]
    fn direct_selector_none_when_no_explicit_formats() {
        let task = sample_task(Mode::Merged);
        assert!(direct_selector(&task).is_none());
    }

    #[test]
    fn direct_selector_present_when_explicit_video_format_given() {
        let mut task = sample_task(Mode::VideoOnly);
        task.video_format = Some("137".to_string());
        assert_eq!(direct_selector(&task), Some("137".to_string()));
    }
}
