//! Core data model shared across components (§3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requested download mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Merged,
    VideoOnly,
    AudioOnly,
    SubtitlesOnly,
    ThumbnailOnly,
}

impl Mode {
    /// Accepts the legacy `subtitles` token as `merged` + `subtitles_only=true`.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "merged" => Some(Self::Merged),
            "video_only" => Some(Self::VideoOnly),
            "audio_only" => Some(Self::AudioOnly),
            "subtitles_only" | "subtitles" => Some(Self::SubtitlesOnly),
            "thumbnail_only" => Some(Self::ThumbnailOnly),
            _ => None,
        }
    }
}

/// Metadata-sidecar write mode (alias of [`crate::config::MetaMode`] at the
/// task level so `Task` doesn't need to depend on the config module).
pub use crate::config::MetaMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Merging,
    Finished,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    /// Sort bucket for UI ordering (§4.5): downloading < merging < queued < finished < error < canceled.
    pub fn sort_bucket(self) -> u8 {
        match self {
            Self::Downloading => 0,
            Self::Merging => 1,
            Self::Queued => 2,
            Self::Finished => 3,
            Self::Error => 4,
            Self::Canceled => 5,
        }
    }
}

/// A single log line with the offset it was appended at (for `?offset=N` slicing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub offset: u64,
    pub line: String,
}

/// A download/probe task, as tracked by the Task Manager (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub mode: Mode,
    pub quality: String,
    pub video_format: Option<String>,
    pub audio_format: Option<String>,
    pub subtitle_langs: Vec<String>,
    pub auto_captions: bool,
    pub geo_bypass: bool,
    pub container: Option<String>,
    pub filename_template: Option<String>,
    pub meta_mode: MetaMode,
    pub skip_probe: bool,

    pub status: TaskStatus,
    pub stage: String,
    pub progress: f32,
    pub attempt: u32,
    pub canceled: bool,

    pub title: Option<String>,
    pub file_path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub file_size: Option<u64>,

    pub error_code: Option<crate::error::ErrorKind>,
    pub error_message: Option<String>,
    pub warning: Option<String>,

    #[serde(skip)]
    pub log: Vec<LogLine>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Maximum number of log lines retained per task (bounded ring).
    pub const LOG_RING_CAPACITY: usize = 200;

    pub fn push_log(&mut self, line: impl Into<String>) {
        let offset = self.log.last().map(|l| l.offset + 1).unwrap_or(0);
        self.log.push(LogLine {
            offset,
            line: line.into(),
        });
        if self.log.len() > Self::LOG_RING_CAPACITY {
            let overflow = self.log.len() - Self::LOG_RING_CAPACITY;
            self.log.drain(0..overflow);
        }
        self.updated_at = Utc::now();
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        self.updated_at = Utc::now();
    }
}

/// One track reported by the extractor's format probe (§3 FormatTrack).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatTrack {
    pub id: String,
    pub container: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub fps: Option<f32>,
    #[serde(default)]
    pub tbr: Option<f32>,
    #[serde(default)]
    pub abr: Option<f32>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub note: Option<String>,
    /// Catch-all for fields the extractor adds across versions that this
    /// service doesn't model explicitly (§9: ignore unknown fields, don't reject).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FormatTrack {
    /// The larger of numeric `height` and any `NNNNp` token in `note`.
    pub fn effective_height(&self) -> Option<u32> {
        let from_note = self.note.as_deref().and_then(parse_height_note);
        match (self.height, from_note) {
            (Some(h), Some(n)) => Some(h.max(n)),
            (Some(h), None) => Some(h),
            (None, Some(n)) => Some(n),
            (None, None) => None,
        }
    }

    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().is_some_and(|c| c != "none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|c| c != "none")
    }

    fn codec_score(&self) -> u8 {
        match self.vcodec.as_deref() {
            Some(c) if c.contains("avc") || c.contains("h264") => 3,
            Some(c) if c.contains("vp9") => 2,
            Some(c) if c.contains("av01") => 1,
            _ => 0,
        }
    }

    fn container_score(&self) -> u8 {
        match self.container.as_deref() {
            Some("mp4") => 2,
            Some("webm") => 1,
            _ => 0,
        }
    }

    fn audio_extension_score(&self) -> u8 {
        match self.container.as_deref() {
            Some("m4a") | Some("mp4") => 2,
            Some("webm") | Some("ogg") => 1,
            _ => 0,
        }
    }

    fn audio_codec_score(&self) -> u8 {
        match self.acodec.as_deref() {
            Some(c) if c.contains("aac") || c.contains("mp4a") => 2,
            Some(c) if c.contains("opus") => 1,
            _ => 0,
        }
    }
}

fn parse_height_note(note: &str) -> Option<u32> {
    let digits: String = note
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 3 {
        return None;
    }
    let idx = note.find(&digits)? + digits.len();
    if note[idx..].starts_with('p') {
        digits.parse().ok()
    } else {
        None
    }
}

/// Capability flags derived from the full format list (§4.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub has_8k: bool,
    pub has_4k: bool,
    pub has_hdr: bool,
    pub has_av1: bool,
}

impl Capabilities {
    pub fn compute(tracks: &[FormatTrack]) -> Self {
        let mut caps = Self::default();
        for track in tracks {
            if let Some(h) = track.effective_height() {
                if h >= 4320 {
                    caps.has_8k = true;
                } else if h >= 2160 {
                    caps.has_4k = true;
                }
            }
            if track
                .note
                .as_deref()
                .is_some_and(|n| n.to_ascii_lowercase().contains("hdr"))
            {
                caps.has_hdr = true;
            }
            if track.vcodec.as_deref().is_some_and(|c| c.contains("av01")) {
                caps.has_av1 = true;
            }
        }
        caps
    }
}

/// One resolution's best (video, audio) format-id pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityPair {
    pub video: String,
    pub audio: String,
}

/// Quality-pair computation (§4.9): for each effective height, the best
/// (video, audio) pair; `default_best` mirrors the tallest height's pair.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QualityPairs {
    /// Serialized with string keys to avoid mixed-key-type JSON comparison faults.
    pub by_height: BTreeMap<String, QualityPair>,
    pub default_best: Option<QualityPair>,
}

impl QualityPairs {
    pub fn compute(tracks: &[FormatTrack]) -> Self {
        let best_audio = tracks
            .iter()
            .filter(|t| t.has_audio())
            .max_by(|a, b| {
                let key = |t: &FormatTrack| {
                    (
                        t.abr.or(t.tbr).unwrap_or(0.0),
                        t.audio_extension_score(),
                        t.audio_codec_score(),
                    )
                };
                key(a)
                    .partial_cmp(&key(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let Some(best_audio) = best_audio else {
            return Self::default();
        };

        let mut by_height: BTreeMap<u32, &FormatTrack> = BTreeMap::new();
        for track in tracks.iter().filter(|t| t.has_video()) {
            let Some(h) = track.effective_height() else {
                continue;
            };
            let better = match by_height.get(&h) {
                None => true,
                Some(existing) => {
                    let key = |t: &FormatTrack| {
                        (
                            t.effective_height().unwrap_or(0),
                            t.codec_score(),
                            t.fps.unwrap_or(0.0),
                            t.tbr.unwrap_or(0.0),
                            t.container_score(),
                        )
                    };
                    key(track) > key(existing)
                }
            };
            if better {
                by_height.insert(h, track);
            }
        }

        let default_best = by_height
            .iter()
            .next_back()
            .map(|(_, video)| QualityPair {
                video: video.id.clone(),
                audio: best_audio.id.clone(),
            });

        let pairs = by_height
            .into_iter()
            .map(|(h, video)| {
                (
                    h.to_string(),
                    QualityPair {
                        video: video.id.clone(),
                        audio: best_audio.id.clone(),
                    },
                )
            })
            .collect();

        Self {
            by_height: pairs,
            default_best,
        }
    }
}
