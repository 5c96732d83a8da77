use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::engine::EngineError;
use crate::errors::ApiError;
use crate::state::AppState;

/// Rejects identity traffic before body parsing while the index is not ready.
pub(crate) async fn require_index_ready(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.engine.is_ready() {
        state.engine.metrics().not_ready_rejections_total.inc();
        return ApiError::from(EngineError::NotReady).into_response();
    }
    next.run(request).await
}
