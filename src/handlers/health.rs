//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /_gateway/health` - Liveness with backend circuit state
//! - `GET /_gateway/ready` - Readiness probe
//!
//! Both sit outside the request pipeline: no credentials, no classification.
//!
//! # Health vs Readiness
//!
//! - **Health**: Returns 200 even if degraded, includes details
//! - **Readiness**: Returns 503 while the backend circuit is open

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::backend::CircuitState;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK with status details in the body.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "backend_circuit": "closed",
///   "version": "0.1.0",
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let circuit = state.backend.breaker().state();

    Json(HealthResponse {
        status: if circuit == CircuitState::Closed {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        backend_circuit: circuit.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// A half-open circuit counts as ready so that probe traffic does not hold
/// the gateway out of rotation while the backend is being retried.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.backend.breaker().state() == CircuitState::Open {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        Ok(StatusCode::OK)
    }
}
