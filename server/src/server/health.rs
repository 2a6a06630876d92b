//! Health check endpoints.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check; does not look at dependencies.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness
    pub ready: bool,
    /// Order store backend
    pub order_store: String,
    /// Database reachable; absent for the in-memory store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<bool>,
    /// Showtimes with hold state
    pub active_showtimes: usize,
}

/// Readiness check.
///
/// Returns 503 when the order database does not answer.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match &state.database {
        Some(pool) => Some(sqlx::query("SELECT 1").execute(pool).await.is_ok()),
        None => None,
    };
    let ready = database.unwrap_or(true);
    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!("Readiness check failed: order database unreachable");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            order_store: if state.database.is_some() { "postgres" } else { "memory" }.to_string(),
            database,
            active_showtimes: state.holds.showtimes().await.len(),
        }),
    )
}
