#![forbid(unsafe_code)]
//! facematch HTTP server.
//!
//! Exposes:
//! - `GET /live`: process liveness
//! - `GET /ready`: index readiness and build state
//! - `GET /metrics`: Prometheus text exposition
//! - `POST /register`: enroll a labeled face embedding
//! - `POST /search`: identify the closest enrolled face
//! - `DELETE /users/:label`: remove an enrolled identity
//! - `POST /admin/rebuild`: rebuild the index from the record store

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use facematch_core::{VectorStore, VectorValidationOptions};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod engine_guard;
mod env_utils;
mod errors;
mod handlers;
mod handlers_health;
mod index_builder;
mod metrics;
mod models;
mod persistence;
mod readiness;
mod retry;
mod state;

use crate::config::AppConfig;
use crate::engine::{EngineSettings, IdentityEngine};
use crate::engine_guard::require_index_ready;
use crate::errors::handle_middleware_error;
use crate::handlers::{delete_user, live, metrics, ready, rebuild, register, search};
use crate::metrics::EngineMetrics;
use crate::persistence::{open_store, store_options, UnavailableStore};
use crate::retry::RetryPolicy;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind = config.bind;
    let store_retry = RetryPolicy::new(
        config.store_retry_attempts,
        Duration::from_millis(config.store_retry_delay_ms),
    );

    let mut store_failure = None;
    let store: Arc<dyn VectorStore> = match open_store(store_options(&config), store_retry).await {
        Ok(store) => Arc::new(store),
        Err(error) => {
            let reason = format!("record store unavailable: {error}");
            tracing::error!(%error, "failed to open record store");
            store_failure = Some(reason.clone());
            Arc::new(UnavailableStore::new(reason))
        }
    };

    let metrics = EngineMetrics::new().context("failed to register metrics")?;
    let engine = IdentityEngine::new(engine_settings(&config, store_retry), store, metrics)
        .context("failed to initialize identity engine")?;
    let state = AppState::new(config.clone(), engine);

    match store_failure {
        Some(reason) => state.engine.force_not_ready(reason),
        None => {
            // Startup build runs detached; readiness is reported on /ready.
            let _initial_build = state
                .engine
                .begin_rebuild()
                .context("failed to start initial index build")?;
        }
    }

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind server socket on {bind}"))?;

    tracing::info!(
        %bind,
        embedding_dimension = config.embedding_dimension,
        match_threshold = config.match_threshold,
        rebuild_batch_size = config.rebuild_batch_size,
        persistence_enabled = config.persistence_enabled,
        store_retry_attempts = store_retry.max_attempts(),
        timeout_ms = config.request_timeout_ms,
        max_body_bytes = config.max_body_bytes,
        max_concurrency = config.max_concurrency,
        "facematch server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("server exited unexpectedly")?;

    Ok(())
}

fn engine_settings(config: &AppConfig, store_retry: RetryPolicy) -> EngineSettings {
    EngineSettings {
        dimension: config.embedding_dimension,
        match_threshold: config.match_threshold,
        validation: VectorValidationOptions::strict(),
        rebuild_batch_size: config.rebuild_batch_size,
        rebuild_batch_pause: Duration::from_millis(config.rebuild_batch_pause_ms),
        store_retry,
    }
}

fn build_app(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let config = state.config.clone();
    let timeout = Duration::from_millis(config.request_timeout_ms);

    let service_layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .layer(TimeoutLayer::new(timeout))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<_>| {
                    let request_id = request
                        .headers()
                        .get(&request_id_header)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id
                    )
                })
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Millis)),
        );

    let identity_routes = Router::new()
        .route("/register", post(register))
        .route("/search", post(search))
        .route("/users/:label", delete(delete_user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_index_ready,
        ));

    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/admin/rebuild", post(rebuild))
        .merge(identity_routes)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(service_layers)
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("failed to initialize tracing subscriber: {error}");
    }
}

async fn shutdown_signal(state: AppState) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(error) => tracing::error!(%error, "failed to install Ctrl-C handler"),
    }
    state.engine.request_shutdown();
}
