use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::engine::QueryOutcome;
use crate::errors::{map_json_rejection, ApiError};
pub(crate) use crate::handlers_health::{live, metrics, ready};
use crate::models::{
    DeleteResponse, RebuildResponse, RegisterRequest, RegisterResponse, SearchRequest,
    SearchResponse,
};
use crate::state::AppState;

pub(crate) async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(payload) = payload.map_err(map_json_rejection)?;
    let identity = state
        .engine
        .enroll(&payload.label, &payload.embedding)
        .await?;

    Ok(Json(RegisterResponse {
        identity,
        label: payload.label,
    }))
}

pub(crate) async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(payload) = payload.map_err(map_json_rejection)?;

    let response = match state.engine.query(&payload.embedding).await? {
        QueryOutcome::Match {
            identity,
            label,
            distance,
        } => SearchResponse {
            matched: true,
            identity: Some(identity),
            label: Some(label),
            distance: Some(distance),
        },
        QueryOutcome::NoMatch => SearchResponse {
            matched: false,
            identity: None,
            label: None,
            distance: None,
        },
    };
    Ok(Json(response))
}

pub(crate) async fn delete_user(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.engine.delete(&label).await?;
    Ok(Json(DeleteResponse {
        identity: deleted.identity,
        label: deleted.label,
        deleted: true,
    }))
}

pub(crate) async fn rebuild(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RebuildResponse>), ApiError> {
    // The build task runs detached; its outcome is visible on /ready.
    let _build = state.engine.begin_rebuild()?;
    tracing::info!("index rebuild requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(RebuildResponse { status: "building" }),
    ))
}
