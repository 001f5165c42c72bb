//! SSE Streamer (C7): `GET /api/stream_task` creates a task and streams its
//! log lines and status as Server-Sent Events until the task reaches a
//! terminal state or the client disconnects.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::config::MetaMode;
use crate::domain::{Mode, Task, TaskStatus};
use crate::task::TaskRequest;
use crate::utils::url::validate_url;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub url: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub video_format: Option<String>,
    #[serde(default)]
    pub audio_format: Option<String>,
    #[serde(default)]
    pub subtitles: Option<String>,
    #[serde(default)]
    pub subtitles_only: bool,
    #[serde(default)]
    pub thumbnail: bool,
    #[serde(default)]
    pub meta: Option<String>,
    #[serde(default)]
    pub skip_probe: bool,
    #[serde(default)]
    pub info_cache: Option<String>,
}

fn default_quality() -> String {
    "best".to_string()
}

#[derive(Debug, Serialize)]
struct StatusFrame<'a> {
    status: TaskStatus,
    stage: &'a str,
    progress: f32,
    title: Option<&'a str>,
    file_path: Option<&'a str>,
    error_message: Option<&'a str>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(stream_task))
}

async fn stream_task(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    validate_url(&query.url).map_err(ApiError::invalid_url)?;

    let mode = if query.subtitles_only {
        Mode::SubtitlesOnly
    } else if query.thumbnail {
        Mode::ThumbnailOnly
    } else {
        query
            .mode
            .as_deref()
            .map(Mode::parse)
            .unwrap_or(Some(Mode::Merged))
            .ok_or_else(|| ApiError::bad_request("unrecognized mode"))?
    };

    let meta_mode = query
        .meta
        .as_deref()
        .map(|t| MetaMode::parse(t).ok_or_else(|| ApiError::bad_request("unrecognized meta")))
        .transpose()?;

    let subtitle_langs = query
        .subtitles
        .as_deref()
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();

    let known_title = query
        .info_cache
        .as_deref()
        .and_then(|raw| serde_json::from_str::<crate::probe::ProbeResult>(raw).ok())
        .map(|probe| probe.title);

    let task_id = state.tasks.add_task(TaskRequest {
        url: query.url,
        mode,
        quality: query.quality,
        video_format: query.video_format,
        audio_format: query.audio_format,
        subtitle_langs,
        auto_captions: false,
        geo_bypass: false,
        container: None,
        filename_template: None,
        meta_mode,
        skip_probe: query.skip_probe,
        known_title,
    });

    let state_for_stream = state.clone();
    let initial_offset = 0u64;

    let event_stream = stream::unfold(
        (task_id, initial_offset, false),
        move |(task_id, offset, done)| {
            let state = state_for_stream.clone();
            async move {
                if done {
                    return None;
                }

                tokio::time::sleep(TICK).await;

                let task: Task = match state.tasks.get_task(&task_id) {
                    Ok(task) => task,
                    Err(_) => return None,
                };

                let mut events = Vec::new();
                let mut next_offset = offset;
                if let Ok(lines) = state.tasks.log_since(&task_id, offset) {
                    for line in &lines {
                        next_offset = next_offset.max(line.offset + 1);
                        events.push(
                            Event::default()
                                .event("log")
                                .data(line.line.clone()),
                        );
                    }
                }

                let frame = StatusFrame {
                    status: task.status,
                    stage: &task.stage,
                    progress: task.progress,
                    title: task.title.as_deref(),
                    file_path: task.file_path.as_deref(),
                    error_message: task.error_message.as_deref(),
                };
                let status_json = serde_json::to_string(&frame).unwrap_or_default();
                events.push(Event::default().event("status").data(status_json));

                let terminal = task.status.is_terminal();
                Some((events, (task_id, next_offset, terminal)))
            }
        },
    )
    .flat_map(|events| stream::iter(events.into_iter().map(Ok)));

    Ok(Sse::new(event_stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_quality_is_best() {
        assert_eq!(default_quality(), "best");
    }

    #[test]
    fn status_frame_serializes_stage_and_progress() {
        let frame = StatusFrame {
            status: TaskStatus::Downloading,
            stage: "download",
            progress: 42.0,
            title: Some("t"),
            file_path: None,
            error_message: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"progress\":42.0"));
        assert!(json.contains("\"stage\":\"download\""));
    }
}
