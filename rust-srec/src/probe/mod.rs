//! Probing Pipeline (C4): drives ordered probe stages against the
//! extractor to derive a structured format list.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::domain::{Capabilities, FormatTrack, QualityPairs};
use crate::error::{Error, ErrorKind, Result};
use crate::process;
use crate::site::SiteProfile;

/// Structured probe result, the Info API's (C9) primary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub title: String,
    pub id: String,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub formats: Vec<FormatTrack>,
    pub subtitles: Vec<String>,
    pub auto_subtitles: Vec<String>,
    pub capabilities: Capabilities,
    pub quality_pairs: QualityPairs,
}

/// Raw JSON the extractor emits with `--dump-json`. Only fields this service
/// uses are modeled explicitly; everything else is ignored (§9).
#[derive(Debug, Deserialize)]
struct ExtractorInfoJson {
    title: Option<String>,
    id: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<ExtractorFormatJson>,
    #[serde(default)]
    subtitles: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    automatic_captions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExtractorFormatJson {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    width: Option<u32>,
    fps: Option<f32>,
    tbr: Option<f32>,
    abr: Option<f32>,
    filesize: Option<u64>,
    format_note: Option<String>,
}

fn parse_extractor_json(raw: &str) -> Result<ProbeResult> {
    let parsed: ExtractorInfoJson = serde_json::from_str(raw)?;
    let formats: Vec<FormatTrack> = parsed
        .formats
        .into_iter()
        .map(|f| FormatTrack {
            id: f.format_id,
            container: f.ext,
            vcodec: f.vcodec,
            acodec: f.acodec,
            height: f.height,
            width: f.width,
            fps: f.fps,
            tbr: f.tbr,
            abr: f.abr,
            filesize: f.filesize,
            note: f.format_note,
            extra: Default::default(),
        })
        .collect();

    let capabilities = Capabilities::compute(&formats);
    let quality_pairs = QualityPairs::compute(&formats);

    Ok(ProbeResult {
        title: parsed.title.unwrap_or_else(|| "video".to_string()),
        id: parsed.id.unwrap_or_default(),
        uploader: parsed.uploader,
        duration: parsed.duration,
        thumbnail: parsed.thumbnail,
        formats,
        subtitles: parsed.subtitles.keys().cloned().collect(),
        auto_subtitles: parsed.automatic_captions.keys().cloned().collect(),
        capabilities,
        quality_pairs,
    })
}

/// Early-abort error kinds: once seen, no further stage is attempted (§4.4).
fn is_early_abort(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::AgeRestricted
            | ErrorKind::Private
            | ErrorKind::MembersOnly
            | ErrorKind::UnsupportedUrl
            | ErrorKind::VideoUnavailable
    )
}

/// Probe `url` by running the extractor in `--dump-json` mode across the
/// site's ordered stages, aborting early on non-recoverable classifications.
pub async fn probe(
    extractor_path: &str,
    url: &str,
    profile: &SiteProfile,
    cfg: &ServiceConfig,
    cancellation_token: &CancellationToken,
) -> Result<ProbeResult> {
    if let Some((min, max)) = profile.jitter {
        let span = max.saturating_sub(min).as_millis().max(1) as u64;
        let extra = rand::random::<u64>() % span;
        tokio::time::sleep(min + Duration::from_millis(extra)).await;
    }

    let mut last_err = Error::probe(ErrorKind::Unknown, "no probe stages configured");

    // `fast_info` trades the full stage-escalation ladder for a single,
    // tightly-timed attempt at the site's primary stage.
    let stages = if cfg.fast_info {
        profile.stages().into_iter().take(1).collect()
    } else {
        profile.stages()
    };

    for stage in stages {
        let mut timeouts = profile.retry_timeouts(stage);
        if cfg.fast_info {
            timeouts.retries = timeouts.retries.min(1);
            timeouts.socket = timeouts.socket.min(Duration::from_secs(8));
        }
        let mut args = profile.extractor_flags(stage, cfg.disable_accelerator, &cfg.cookie_flags());
        args.push("--dump-json".to_string());
        args.push("--no-playlist-reverse".to_string());
        args.push(url.to_string());

        let overall_timeout = timeouts.socket * (timeouts.retries + 1).max(1);
        let cmd = process::command(extractor_path, &args);
        let output = process::run(cmd, overall_timeout, cancellation_token).await?;

        if output.success() {
            return parse_extractor_json(&output.stdout);
        }

        let tail = output.stderr_tail(40);
        let kind = ErrorKind::classify(&tail);
        debug!(?stage, ?kind, "probe stage failed");
        last_err = Error::probe(kind, tail);
        if is_early_abort(kind) {
            return Err(last_err);
        }
    }

    warn!(url, "all probe stages exhausted");
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extractor_json_and_computes_derived_fields() {
        let raw = r#"{
            "title": "Demo",
            "id": "abc123",
            "formats": [
                {"format_id": "137", "ext": "mp4", "vcodec": "avc1", "acodec": "none", "height": 1080, "tbr": 2000},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a", "abr": 128}
            ],
            "subtitles": {"en": []},
            "automatic_captions": {"en": [], "es": []}
        }"#;
        let result = parse_extractor_json(raw).unwrap();
        assert_eq!(result.title, "Demo");
        assert_eq!(result.formats.len(), 2);
        assert_eq!(result.subtitles, vec!["en".to_string()]);
        assert_eq!(result.auto_subtitles.len(), 2);
        assert!(result.quality_pairs.default_best.is_some());
    }

    #[test]
    fn parse_ignores_unknown_fields() {
        let raw = r#"{"title": "T", "id": "1", "some_future_field": {"nested": true}}"#;
        let result = parse_extractor_json(raw).unwrap();
        assert_eq!(result.title, "T");
    }

    #[test]
    fn missing_title_falls_back_to_video() {
        let raw = r#"{"id": "1"}"#;
        let result = parse_extractor_json(raw).unwrap();
        assert_eq!(result.title, "video");
    }

    #[test]
    fn early_abort_kinds_match_spec_list() {
        assert!(is_early_abort(ErrorKind::AgeRestricted));
        assert!(is_early_abort(ErrorKind::Private));
        assert!(is_early_abort(ErrorKind::MembersOnly));
        assert!(is_early_abort(ErrorKind::UnsupportedUrl));
        assert!(is_early_abort(ErrorKind::VideoUnavailable));
        assert!(!is_early_abort(ErrorKind::Timeout));
        assert!(!is_early_abort(ErrorKind::RateLimited));
    }
}
