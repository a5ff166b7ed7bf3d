//! Health and admin HTTP handlers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`), which PING the coordination store
//! - Queue depths (`/queue/stats`) and dead-letter inspection (`/queue/dead-letter`)
//! - Worker pool state (`/workers`)
//! - Rate-limit usage and development reset (`/rate-limit/{caller}`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::client::QueueClient;
use crate::metrics;
use crate::pool::WorkerPool;
use crate::rate_limit::RateLimiter;

/// Shared state for the admin router.
#[derive(Clone)]
pub struct AdminState {
    pub client: QueueClient,
    pub pool: Option<Arc<WorkerPool>>,
    pub rate_limiter: Option<RateLimiter>,
    /// Whether `DELETE /rate-limit/{caller}` is served.
    pub allow_rate_limit_reset: bool,
    pub app_name: String,
    pub app_version: String,
}

impl AdminState {
    pub fn new(
        client: QueueClient,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            pool: None,
            rate_limiter: None,
            allow_rate_limit_reset: false,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter, allow_reset: bool) -> Self {
        self.rate_limiter = Some(limiter);
        self.allow_rate_limit_reset = allow_reset;
        self
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Liveness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

pub async fn health_handler(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe: ready only while the coordination store answers PING.
pub async fn ready_handler(State(state): State<AdminState>) -> Result<Json<Value>, ApiError> {
    match state.client.store().ping().await {
        Ok(()) => Ok(Json(json!({
            "status": "ready",
            "checks": { "store": "ok" }
        }))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "store": format!("error: {}", e) }
            })),
        )),
    }
}

/// `GET /queue/stats`
pub async fn queue_stats_handler(State(state): State<AdminState>) -> Json<Value> {
    let stats = state.client.get_queue_stats().await;
    let summary = stats.summary();
    Json(json!({
        "queues": stats.queues,
        "dead_letter": stats.dead_letter,
        "delayed": stats.delayed,
        "summary": summary,
    }))
}

/// `GET /workers`
pub async fn workers_handler(
    State(state): State<AdminState>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(pool) = state.pool else {
        return Err(api_error(StatusCode::NOT_FOUND, "No worker pool attached"));
    };
    Ok(Json(pool.stats().await))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    /// Maximum number of jobs to return (default: 20, max: 200)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// `GET /queue/dead-letter?limit=20`, newest first.
pub async fn dead_letter_handler(
    State(state): State<AdminState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.min(200);
    let jobs = state
        .client
        .dead_letter_jobs(limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "jobs": jobs,
        "limit": limit,
        "count": jobs.len(),
    })))
}

/// `GET /rate-limit/{caller}`
pub async fn rate_limit_status_handler(
    State(state): State<AdminState>,
    Path(caller): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let Some(limiter) = state.rate_limiter else {
        return Ok(Json(json!({
            "rate_limiting_enabled": false,
            "message": "Rate limiting is disabled"
        })));
    };

    let status = limiter.status(&caller).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not retrieve rate limit status: {}", e),
        )
    })?;

    Ok(Json(json!({
        "rate_limiting_enabled": true,
        "caller": caller,
        "minute": status.minute,
        "hour": status.hour,
    })))
}

/// `DELETE /rate-limit/{caller}`, development only.
pub async fn rate_limit_reset_handler(
    State(state): State<AdminState>,
    Path(caller): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.allow_rate_limit_reset {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "Rate limit reset is only available in development mode",
        ));
    }
    let Some(limiter) = state.rate_limiter else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Rate limiting is disabled",
        ));
    };

    let keys_deleted = limiter.reset(&caller).await;
    Ok(Json(json!({
        "message": "Rate limits reset successfully",
        "keys_deleted": keys_deleted,
        "caller": caller,
    })))
}

/// `GET /metrics` in Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Health probes and metrics only.
pub fn health_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health probes plus queue, worker and rate-limit admin endpoints.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/queue/stats", get(queue_stats_handler))
        .route("/queue/dead-letter", get(dead_letter_handler))
        .route("/workers", get(workers_handler))
        .route(
            "/rate-limit/{caller}",
            get(rate_limit_status_handler).delete(rate_limit_reset_handler),
        )
        .with_state(state.clone())
        .merge(health_router(state))
        .layer(TraceLayer::new_for_http())
}
