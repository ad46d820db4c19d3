//! HTTP server: ingestion, queries, admin operations, health and metrics.

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use logvault_core::config::RateLimitConfig;
use logvault_core::health::HealthStatus;
use logvault_core::maintenance::{MaintenanceScheduler, TaskInfo, ARCHIVE_JOB};
use logvault_core::{
    AuthError, Error, LogQuery, LogVault, NewLogEntry, Service, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cors::{self, CorsPolicy};
use crate::rate_limit::{self, RateLimiter};

/// Header carrying service and admin API keys.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub vault: Arc<LogVault>,
    pub scheduler: Option<Arc<MaintenanceScheduler>>,
}

type AppState = Arc<ServerState>;

/// Core error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ValidationError::InvalidBody(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ValidationError::InvalidParameter {
            name: "query",
            message: rejection.body_text(),
        }
        .into()
    }
}

/// HTTP status for a core error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::BatchRejected(_) => StatusCode::BAD_REQUEST,
        Error::Auth(AuthError::MissingKey) | Error::Auth(AuthError::InvalidKey) => {
            StatusCode::UNAUTHORIZED
        }
        Error::Auth(AuthError::NotAdmin) => StatusCode::FORBIDDEN,
        Error::Auth(AuthError::AdminNotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
        Error::DuplicateServiceName(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = match &self.0 {
            Error::BatchRejected(rejection) => json!({
                "error": "Validation failed",
                "errors": rejection.errors,
                "created": 0,
            }),
            err if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %err, "Request failed");
                json!({ "error": "Internal server error" })
            }
            err => json!({ "error": err.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Per route group limiters.
struct Limiters {
    general: Arc<RateLimiter>,
    logs: Arc<RateLimiter>,
    health: Arc<RateLimiter>,
}

impl Limiters {
    /// `None` when rate limiting is disabled.
    fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let window = Duration::from_millis(config.window_ms);
        Some(Self {
            general: Arc::new(RateLimiter::new(
                "general",
                config.max_requests,
                window,
                "Too many requests from this client, please try again later.",
            )),
            logs: Arc::new(RateLimiter::new(
                "logs",
                config.log_max_requests,
                window,
                "Too many log requests from this client, please try again later.",
            )),
            health: Arc::new(RateLimiter::new(
                "health",
                config.health_max_requests,
                window,
                "Too many health check requests from this client, please try again later.",
            )),
        })
    }
}

fn limited(routes: Router<AppState>, limiter: Option<&Arc<RateLimiter>>) -> Router<AppState> {
    match limiter {
        Some(limiter) => routes.route_layer(middleware::from_fn_with_state(
            Arc::clone(limiter),
            rate_limit::enforce,
        )),
        None => routes,
    }
}

/// Build the application router.
///
/// Log routes, `/health` and everything else each count against their own
/// per-client limit. CORS wraps the whole router.
pub fn router(state: AppState) -> Router {
    let server = &state.vault.config().server;
    let limiters = Limiters::from_config(&server.rate_limit);
    let cors_policy = Arc::new(CorsPolicy::new(&server.allowed_origins));

    let logs = Router::new()
        .route("/api/logs", post(ingest_handler).get(query_handler))
        .route("/api/logs/batch", post(batch_handler))
        .route("/api/logs/:id", get(get_log_handler));

    let health = Router::new().route("/health", get(health_handler));

    let general = Router::new()
        .route("/api/admin/archive", post(archive_handler))
        .route("/api/admin/archive-now", post(archive_now_handler))
        .route("/api/admin/cleanup", post(cleanup_handler))
        .route("/api/admin/maintenance", get(maintenance_handler))
        .route(
            "/api/services",
            post(create_service_handler).get(list_services_handler),
        )
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(limited(logs, limiters.as_ref().map(|l| &l.logs)))
        .merge(limited(health, limiters.as_ref().map(|l| &l.health)))
        .merge(limited(general, limiters.as_ref().map(|l| &l.general)))
        .with_state(state)
        .layer(middleware::from_fn_with_state(cors_policy, cors::enforce))
}

/// Serve until a shutdown signal arrives.
pub async fn start_server(
    state: AppState,
    bind_address: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(address = %bind_address, "HTTP server started");

    // Peer addresses key the rate limiters
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("HTTP server shutting down");
    })
    .await?;

    Ok(())
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

async fn authenticate(state: &ServerState, headers: &HeaderMap) -> ApiResult<Service> {
    Ok(state
        .vault
        .authenticator()
        .authenticate(api_key(headers))
        .await?)
}

fn authorize_admin(state: &ServerState, headers: &HeaderMap) -> ApiResult<()> {
    Ok(state
        .vault
        .authenticator()
        .authorize_admin(api_key(headers))?)
}

// === SERVICE ENDPOINTS ===

async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let service = authenticate(&state, &headers).await?;
    let Json(body) = body?;
    let entry: NewLogEntry = serde_json::from_value(body)
        .map_err(|e| ValidationError::MalformedEntry(e.to_string()))?;

    let stored = state.vault.ingest(&service.name, entry).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn batch_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let service = authenticate(&state, &headers).await?;
    let Json(body) = body?;
    let items = match body {
        Value::Object(mut map) => match map.remove("logs") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let stored = state.vault.ingest_raw_batch(&service.name, items).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "created": stored.len(), "logs": stored })),
    ))
}

async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let service = authenticate(&state, &headers).await?;
    let Query(query) = query?;
    let page = state.vault.query_logs(&service.name, &query).await?;
    Ok(Json(page))
}

async fn get_log_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let service = authenticate(&state, &headers).await?;
    let not_found = || Error::NotFound(format!("log {}", id));

    let uuid = Uuid::parse_str(&id).map_err(|_| not_found())?;
    match state.vault.get_log(&service.name, uuid).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(not_found().into()),
    }
}

// === ADMIN ENDPOINTS ===

#[derive(Debug, Default, Deserialize)]
struct ArchiveRequest {
    #[serde(default, rename = "daysOld", alias = "days_old")]
    days_old: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ArchiveResponse {
    success: bool,
    archived: usize,
    partitions: usize,
    message: String,
}

async fn archive_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;

    let request: ArchiveRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ArchiveRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ValidationError::InvalidParameter {
            name: "daysOld",
            message: e.to_string(),
        })?
    };
    let days_old = request.days_old.unwrap_or(1);

    let result = state.vault.archive(days_old).await?;
    Ok(Json(ArchiveResponse {
        success: true,
        archived: result.archived,
        partitions: result.partitions.len(),
        message: format!(
            "Archived {} entries older than {} days",
            result.archived, days_old
        ),
    }))
}

/// Run the archive job now with the scheduled age threshold.
async fn archive_now_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;

    let days_old = state.vault.config().scheduler.archive_days_old;
    // Through the scheduler when running, so task status records the run
    let archived = match state.scheduler {
        Some(ref scheduler) => scheduler.trigger(ARCHIVE_JOB).await?,
        None => state.vault.archive(days_old).await?.archived,
    };

    Ok(Json(json!({
        "success": true,
        "archived": archived,
        "message": format!("Archived {} logs", archived),
    })))
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
    success: bool,
    deleted: usize,
    failed: Vec<String>,
    message: String,
}

async fn cleanup_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;

    let result = state.vault.sweep().await?;
    let failed: Vec<String> = result
        .failed
        .iter()
        .map(|f| format!("{}: {}", f.path.display(), f.reason))
        .collect();
    if !failed.is_empty() {
        warn!(failed = failed.len(), "Some archive partitions were not deleted");
    }

    Ok(Json(CleanupResponse {
        success: failed.is_empty(),
        deleted: result.deleted,
        message: format!("Deleted {} archive partitions", result.deleted),
        failed,
    }))
}

async fn maintenance_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;

    let mut tasks: Vec<TaskInfo> = state
        .scheduler
        .as_ref()
        .map(|s| s.get_task_statuses().into_values().collect())
        .unwrap_or_default();
    tasks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(json!({ "tasks": tasks })))
}

#[derive(Debug, Deserialize)]
struct CreateServiceRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn create_service_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<CreateServiceRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;
    let Json(request) = request?;

    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(ValidationError::MissingField("name"))?;
    let service = state.vault.create_service(&name).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": service.id,
            "name": service.name,
            "api_key": service.api_key,
        })),
    ))
}

async fn list_services_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;
    let services = state.vault.list_services().await?;
    Ok(Json(json!({ "services": services })))
}

// === HEALTH AND METRICS ===

/// Health endpoint handler; probes the hot store.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.vault.check_health().await;

    let status_code = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

/// Liveness probe handler.
async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.vault.health().overall_status() != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness probe handler.
async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.vault.health().is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let output = state.vault.metrics().render()?;
    Ok((
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        output,
    ))
}
