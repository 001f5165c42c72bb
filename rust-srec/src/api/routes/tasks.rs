//! Task Manager HTTP surface: create, list, inspect, cancel, tail logs, and
//! clean up finished tasks.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::config::MetaMode;
use crate::domain::{Mode, Task};
use crate::task::{CleanupRequest, TaskRequest};
use crate::utils::url::validate_url;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
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
    pub subtitle_langs: Vec<String>,
    #[serde(default)]
    pub auto_captions: bool,
    #[serde(default)]
    pub geo_bypass: bool,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub filename_template: Option<String>,
    #[serde(default)]
    pub meta_mode: Option<String>,
    #[serde(default)]
    pub skip_probe: bool,
}

fn default_quality() -> String {
    "best".to_string()
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: crate::domain::TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
pub struct CleanupBody {
    #[serde(default)]
    pub max_keep: i64,
    #[serde(default)]
    pub remove_active: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/cleanup", post(cleanup))
        .route("/{id}", get(get_task))
        .route("/{id}/cancel", post(cancel_task))
        .route("/{id}/log", get(task_log))
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> ApiResult<Json<CreateTaskResponse>> {
    validate_url(&body.url).map_err(ApiError::invalid_url)?;

    let mode = body
        .mode
        .as_deref()
        .map(Mode::parse)
        .unwrap_or(Some(Mode::Merged))
        .ok_or_else(|| ApiError::bad_request("unrecognized mode"))?;

    let meta_mode = body
        .meta_mode
        .as_deref()
        .map(|t| MetaMode::parse(t).ok_or_else(|| ApiError::bad_request("unrecognized meta_mode")))
        .transpose()?;

    let id = state.tasks.add_task(TaskRequest {
        url: body.url,
        mode,
        quality: body.quality,
        video_format: body.video_format,
        audio_format: body.audio_format,
        subtitle_langs: body.subtitle_langs,
        auto_captions: body.auto_captions,
        geo_bypass: body.geo_bypass,
        container: body.container,
        filename_template: body.filename_template,
        meta_mode,
        skip_probe: body.skip_probe,
        known_title: None,
    });

    let task = state.tasks.get_task(&id)?;
    Ok(Json(CreateTaskResponse {
        task_id: id,
        status: task.status,
    }))
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.tasks.list_tasks())
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get_task(&id)?))
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.tasks.cancel_task(&id)?;
    Ok(())
}

async fn task_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<crate::domain::LogLine>>> {
    Ok(Json(state.tasks.log_since(&id, query.offset)?))
}

async fn cleanup(
    State(state): State<AppState>,
    Json(body): Json<CleanupBody>,
) -> Json<CleanupResponse> {
    let removed = state.tasks.cleanup(CleanupRequest {
        max_keep: body.max_keep,
        remove_active: body.remove_active,
    });
    Json(CleanupResponse { removed })
}
