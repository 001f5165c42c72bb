//! Info API (C9): `POST /api/info`, the coalescer/cache-backed probe endpoint.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::coalescer::WaitOutcome;
use crate::error::Error;
use crate::probe::ProbeResult;
use crate::site::{SiteClass, SiteProfile};
use crate::utils::url::validate_url;

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: String,
    #[serde(default)]
    pub geo_bypass: bool,
    #[serde(default)]
    pub preflight: bool,
    #[serde(default)]
    pub max_wait: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    #[serde(flatten)]
    pub result: ProbeResult,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub coalesced: bool,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(get_info))
}

async fn get_info(
    State(state): State<AppState>,
    Json(request): Json<InfoRequest>,
) -> ApiResult<Json<InfoResponse>> {
    validate_url(&request.url).map_err(ApiError::invalid_url)?;

    if let Some(cached) = state.cache.get(&request.url) {
        return Ok(Json(InfoResponse {
            result: cached,
            cached: true,
            coalesced: false,
        }));
    }

    if let Some(cooldown) = state.cache.check_cooldown(&request.url) {
        return Err(ApiError::recent_fail(
            format!(
                "recent failure ({} time(s)): {}",
                cooldown.fail_count, cooldown.last_error
            ),
            cooldown.retry_after_secs,
        ));
    }

    let is_twitter = SiteClass::classify(&request.url) == SiteClass::Twitter;
    let handle = state.coalescer.join(&request.url, is_twitter);

    match handle {
        crate::coalescer::WaitOutcomeHandle::Leader { .. } => {
            let profile = SiteProfile::for_url(&request.url);
            let token = tokio_util::sync::CancellationToken::new();
            let outcome = crate::probe::probe(
                &state.config.extractor_path,
                &request.url,
                &profile,
                &state.config,
                &token,
            )
            .await;

            match outcome {
                Ok(result) => {
                    state.cache.set(&request.url, result.clone());
                    handle.complete(&state.coalescer, Ok(result.clone()));
                    Ok(Json(InfoResponse {
                        result,
                        cached: false,
                        coalesced: false,
                    }))
                }
                Err(e) => {
                    state.cache.record_failure(&request.url, e.to_string(), e.kind());
                    handle.complete(&state.coalescer, Err(Error::probe(e.kind(), e.to_string())));
                    Err(e.into())
                }
            }
        }
        crate::coalescer::WaitOutcomeHandle::Follower { .. } => match handle.wait().await {
            WaitOutcome::Lead => unreachable!("follower handle never yields Lead"),
            WaitOutcome::Coalesced(Ok(result)) => Ok(Json(InfoResponse {
                result: (*result).clone(),
                cached: false,
                coalesced: true,
            })),
            WaitOutcome::Coalesced(Err(e)) => Err(Error::from(e).into()),
            WaitOutcome::InProgress { stage, retry_after_secs } => {
                Err(ApiError::in_progress(stage, retry_after_secs))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_response_omits_false_flags() {
        let result = ProbeResult {
            title: "t".into(),
            id: "1".into(),
            uploader: None,
            duration: None,
            thumbnail: None,
            formats: vec![],
            subtitles: vec![],
            auto_subtitles: vec![],
            capabilities: Default::default(),
            quality_pairs: Default::default(),
        };
        let response = InfoResponse {
            result,
            cached: false,
            coalesced: false,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("cached"));
        assert!(!json.contains("coalesced"));
    }
}
