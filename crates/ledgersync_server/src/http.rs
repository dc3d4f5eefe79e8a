//! HTTP binding for the replication handler.
//!
//! | Method     | Path              | Body                      |
//! |------------|-------------------|---------------------------|
//! | GET, HEAD  | `/api/health`     | `HealthResponse`          |
//! | GET        | `/api/sync/pull`  | `Dataset`                 |
//! | POST       | `/api/sync/push`  | `Dataset` → `PushResponse`|
//! | GET        | `/api/stats`      | `StatsResponse`           |
//!
//! Pull and push take the user identity from `?userKey=`.

use crate::error::{ServerError, ServerResult};
use crate::handler::{parse_push_body, ReplicationHandler};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledgersync_protocol::{
    Dataset, ErrorResponse, HealthResponse, PushResponse, StatsResponse, UserKeyQuery,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::error;

#[derive(Clone)]
struct AppState {
    handler: ReplicationHandler,
    production: bool,
}

/// Builds the axum router for a handler.
pub fn router(handler: ReplicationHandler) -> Router {
    let config = &handler.context().config;
    let production = config.production;
    let body_limit = config.max_body_bytes;
    let cors = cors_layer(&config.cors_origins);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/sync/pull", get(pull))
        .route("/api/sync/push", post(push))
        .route("/api/stats", get(stats))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            handler,
            production,
        })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.handler.handle_health())
}

async fn pull(
    State(state): State<AppState>,
    Query(query): Query<UserKeyQuery>,
) -> Result<Json<Dataset>, ApiError> {
    let handler = state.handler.clone();
    let dataset = run_blocking(state.production, move || {
        handler.handle_pull(query.user_key.as_deref())
    })
    .await?;
    Ok(Json(dataset))
}

async fn push(
    State(state): State<AppState>,
    Query(query): Query<UserKeyQuery>,
    body: Bytes,
) -> Result<Json<PushResponse>, ApiError> {
    let handler = state.handler.clone();
    let response = run_blocking(state.production, move || {
        let incoming = parse_push_body(&body)?;
        handler.handle_push(query.user_key.as_deref(), incoming)
    })
    .await?;
    Ok(Json(response))
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let handler = state.handler.clone();
    let stats = run_blocking(state.production, move || handler.handle_stats()).await?;
    Ok(Json(stats))
}

async fn not_found(State(state): State<AppState>) -> ApiError {
    ApiError::new(ServerError::NotFound, state.production)
}

async fn run_blocking<T, F>(production: bool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("handler task failed: {}", e)))
        .and_then(|result| result)
        .map_err(|e| ApiError::new(e, production))
}

/// A [`ServerError`] rendered as an HTTP response.
struct ApiError {
    error: ServerError,
    production: bool,
}

impl ApiError {
    fn new(error: ServerError, production: bool) -> Self {
        Self { error, production }
    }

    fn status(&self) -> StatusCode {
        match &self.error {
            ServerError::NotFound => StatusCode::NOT_FOUND,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        if self.error.is_client_error() {
            return ErrorResponse::new(self.error.to_string());
        }
        let body = ErrorResponse::new("internal server error");
        if self.production {
            body
        } else {
            body.with_details(self.error.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.error.is_server_error() {
            error!(error = %self.error, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
