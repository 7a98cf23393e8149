use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub mod error;
pub mod favorites;
pub mod notes;
pub mod questions;
pub mod sessions;
pub mod sse;
pub mod stats;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_health = probe(
        state.store.backend(),
        Duration::from_secs(1),
        state.store.ping(),
    )
    .await;
    let cache_health = probe(
        state.cache.backend(),
        Duration::from_millis(500),
        state.cache.ping(),
    )
    .await;

    let all_healthy = [&store_health, &cache_health]
        .iter()
        .all(|h| h.get("status").and_then(|v| v.as_str()) == Some("healthy"));

    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "oab-quiz-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": {
                "store": store_health,
                "cache": cache_health,
            }
        })),
    )
}

async fn probe<F, E>(backend: &str, limit: Duration, check: F) -> serde_json::Value
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, check).await {
        Ok(Ok(())) => json!({ "status": "healthy", "backend": backend }),
        Ok(Err(e)) => json!({
            "status": "unhealthy",
            "backend": backend,
            "error": format!("{} error: {}", backend, e),
        }),
        Err(_) => json!({
            "status": "unhealthy",
            "backend": backend,
            "error": format!("{} timeout after {}ms", backend, limit.as_millis()),
        }),
    }
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Derived from the cache so sessions that simply expire drop out
    match state.cache.active_sessions().await {
        Ok(active) => metrics::SESSIONS_ACTIVE.set(active as i64),
        Err(e) => tracing::warn!("Could not count active sessions: {}", e),
    }

    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Guards /metrics with HTTP Basic credentials (`user:password`) from config.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if credentials != state.config.metrics_auth {
        tracing::warn!("Rejected /metrics request with bad credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
