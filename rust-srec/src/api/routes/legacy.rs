//! Legacy compatibility surface (§9 Open Question): the old `/api/legacy/probe`
//! endpoint from the prior service generation is kept mounted, but answers
//! every request with 410 Gone pointing callers at the Info API.

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
struct GoneBody {
    error_code: &'static str,
    message: &'static str,
    upgrade_to: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/probe", get(gone).post(gone))
}

async fn gone() -> Response {
    let body = GoneBody {
        error_code: "gone",
        message: "the legacy probe endpoint has been retired",
        upgrade_to: "/api/info",
    };
    (StatusCode::GONE, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn legacy_probe_returns_gone() {
        let response = gone().await;
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
