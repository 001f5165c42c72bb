//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod info;
pub mod legacy;
pub mod stream;
pub mod tasks;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
///
/// Routes are organized as:
/// - `/api/health` — liveness probe
/// - `/api/info` — Info API (C9, probe/cache/coalescer)
/// - `/api/tasks` — Task Manager CRUD/cancel/cleanup/log (C5)
/// - `/api/stream_task` — SSE task creation + progress stream (C7)
/// - `/api/legacy/probe` — retired, answers 410 Gone
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/info", info::router())
        .nest("/api/tasks", tasks::router())
        .nest("/api/stream_task", stream::router())
        .nest("/api/legacy", legacy::router())
        .with_state(state)
}
