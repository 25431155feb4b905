// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Shisha API
//!
//! HTTP API server for the shisha tracker.
//! Exposes the storage operations as REST endpoints under `/api`, plus
//! health, readiness, metrics and instance information.

pub mod config;
pub mod info;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, warn};

use shisha_storage::migrate::{migrate, PgAdvisoryLock};
use shisha_storage::{
    Comment, CouchDbStorage, DbInfo, InMemoryStorage, MeteredStorage, PostgresConfig,
    PostgresStorage, Rating, Shisha, ShishaId, Storage, StorageError, StorageMetrics,
};

pub use config::{BackendKind, ConfigError, InstanceConfig, ServerConfig};
pub use info::InstanceInfo;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => ApiError::NotFound(format!("shisha {id} not found")),
            StorageError::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Errors that stop the server from starting.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Rating create request
#[derive(Debug, Serialize, Deserialize)]
pub struct RatingRequest {
    pub user: String,
    pub score: i32,
}

/// Comment create request
#[derive(Debug, Serialize, Deserialize)]
pub struct CommentRequest {
    pub user: String,
    pub message: String,
}

/// Smoke counter response
#[derive(Debug, Serialize, Deserialize)]
pub struct SmokedResponse {
    pub smoked: i64,
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub registry: Registry,
    pub instance: InstanceInfo,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, registry: Registry, instance: InstanceInfo) -> Self {
        Self {
            storage,
            registry,
            instance,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Operational endpoints
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/info", get(info_handler))
        .route("/dbinfo", get(db_info_handler))
        // Shisha CRUD
        .route("/shishas", get(list_shishas_handler).post(create_shisha_handler))
        .route(
            "/shishas/{id}",
            get(get_shisha_handler)
                .put(update_shisha_handler)
                .delete(delete_shisha_handler),
        )
        // Append-only history
        .route("/shishas/{id}/ratings", post(add_rating_handler))
        .route("/shishas/{id}/comments", post(add_comment_handler))
        .route("/shishas/{id}/smoked", post(add_smoked_handler));

    Router::new().nest("/api", api).with_state(state)
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Health check handler
#[instrument(skip(state))]
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = match state.storage.health().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!(error = %e, "storage health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            backend: state.storage.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    )
}

/// Readiness check handler
#[instrument]
async fn ready_handler() -> StatusCode {
    StatusCode::OK
}

/// Prometheus text exposition of the registry.
#[instrument(skip(state))]
async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

#[instrument(skip(state))]
async fn info_handler(State(state): State<AppState>) -> Json<InstanceInfo> {
    Json(state.instance.clone())
}

#[instrument(skip(state))]
async fn db_info_handler(State(state): State<AppState>) -> Result<Json<DbInfo>, ApiError> {
    Ok(Json(state.storage.db_info().await?))
}

#[instrument(skip(state))]
async fn list_shishas_handler(State(state): State<AppState>) -> Result<Json<Vec<Shisha>>, ApiError> {
    Ok(Json(state.storage.list_shishas().await?))
}

#[instrument(skip(state))]
async fn get_shisha_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
) -> Result<Json<Shisha>, ApiError> {
    let Path(id) = id?;
    state
        .storage
        .get_shisha(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("shisha {id} not found")))
}

/// Create handler. Any client-supplied id is ignored.
#[instrument(skip(state, request))]
async fn create_shisha_handler(
    State(state): State<AppState>,
    request: Result<Json<Shisha>, JsonRejection>,
) -> Result<(StatusCode, Json<Shisha>), ApiError> {
    let Json(input) = request?;
    require_non_empty("name", &input.name)?;

    let created = state.storage.create_shisha(&input).await?;
    info!(id = created.id, name = %created.name, "shisha created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, request))]
async fn update_shisha_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
    request: Result<Json<Shisha>, JsonRejection>,
) -> Result<Json<Shisha>, ApiError> {
    let Path(id) = id?;
    let Json(input) = request?;
    require_non_empty("name", &input.name)?;

    Ok(Json(state.storage.update_shisha(id, &input).await?))
}

/// Delete handler. Deleting an absent shisha is not an error.
#[instrument(skip(state))]
async fn delete_shisha_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    if !state.storage.delete_shisha(id).await? {
        debug!(id, "delete of absent shisha");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, request))]
async fn add_rating_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
    request: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Rating>), ApiError> {
    let Path(id) = id?;
    let Json(request) = request?;
    require_non_empty("user", &request.user)?;

    let rating = state
        .storage
        .add_rating(id, &request.user, request.score)
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

#[instrument(skip(state, request))]
async fn add_comment_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
    request: Result<Json<CommentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let Path(id) = id?;
    let Json(request) = request?;
    require_non_empty("user", &request.user)?;
    require_non_empty("message", &request.message)?;

    let comment = state
        .storage
        .add_comment(id, &request.user, &request.message)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[instrument(skip(state))]
async fn add_smoked_handler(
    State(state): State<AppState>,
    id: Result<Path<ShishaId>, PathRejection>,
) -> Result<Json<SmokedResponse>, ApiError> {
    let Path(id) = id?;
    let smoked = state.storage.add_smoked(id).await?;
    Ok(Json(SmokedResponse { smoked }))
}

/// Connect the configured backend and wrap it in [`MeteredStorage`].
///
/// The relational backend applies the schema first when
/// `migrate_on_start` is set.
pub async fn build_storage(
    config: &ServerConfig,
    metrics: StorageMetrics,
) -> Result<Arc<dyn Storage>, ServerError> {
    let storage: Arc<dyn Storage> = match config.backend {
        BackendKind::Memory => {
            let store = if config.seed_sample {
                InMemoryStorage::with_sample()
            } else {
                InMemoryStorage::new()
            };
            Arc::new(MeteredStorage::new(store, metrics))
        }
        BackendKind::Postgres => {
            let store = PostgresStorage::connect(&PostgresConfig::new(&config.database_url)).await?;
            if config.migrate_on_start {
                migrate(store.pool(), &PgAdvisoryLock::new(store.pool().clone())).await?;
            }
            Arc::new(MeteredStorage::new(store, metrics))
        }
        BackendKind::CouchDb => {
            let store = CouchDbStorage::connect(config.couchdb.clone()).await?;
            Arc::new(MeteredStorage::new(store, metrics))
        }
    };

    info!(backend = storage.name(), "storage backend ready");
    Ok(storage)
}

/// Apply the relational schema under the migration lock and return.
///
/// The other backends need no schema; for them this only logs.
pub async fn run_migrations(config: &ServerConfig) -> Result<(), ServerError> {
    if config.backend != BackendKind::Postgres {
        info!(backend = ?config.backend, "backend has no schema to migrate");
        return Ok(());
    }

    let store = PostgresStorage::connect(&PostgresConfig::new(&config.database_url)).await?;
    migrate(store.pool(), &PgAdvisoryLock::new(store.pool().clone())).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

/// Start the API server
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let registry = Registry::new();
    let metrics = StorageMetrics::register(&registry)?;
    let storage = build_storage(&config, metrics).await?;

    let state = AppState::new(storage, registry, InstanceInfo::detect(&config.instance));
    let app = build_router(state);

    let addr = config.bind_addr();
    info!("Starting shisha API server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}
