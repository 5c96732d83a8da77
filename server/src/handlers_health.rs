use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::errors::ApiError;
use crate::models::{LiveResponse, ReadyChecks, ReadyResponse};
use crate::state::AppState;

pub(crate) async fn live(State(state): State<AppState>) -> Json<LiveResponse> {
    Json(LiveResponse {
        status: "live",
        uptime_ms: state.uptime_ms(),
    })
}

pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, (StatusCode, Json<ReadyResponse>)> {
    let engine = &state.engine;
    let ready = engine.is_ready();

    let response = ReadyResponse {
        status: if ready { "ready" } else { "not_ready" },
        uptime_ms: state.uptime_ms(),
        checks: ReadyChecks {
            readiness: engine.readiness(),
            build_in_flight: engine.build_in_flight(),
            index_entries: engine.index_len(),
            embedding_dimension: engine.dimension(),
            failure: engine.failure_reason(),
        },
    };

    if ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

pub(crate) async fn metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = &state.engine;
    let body = engine
        .metrics()
        .render(engine.is_ready(), engine.index_len())
        .map_err(|error| ApiError::internal(error.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
