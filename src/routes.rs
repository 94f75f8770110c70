//! Application routing with the ambient tower layers.
//!
//! # Layer Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets X-Request-Id (UUID v4) when absent
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Propagate ID    │ ← Copies X-Request-Id onto the response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//!   gateway endpoints  |  extension routes (each its own pipeline chain)
//! ```
//!
//! # Route Groups
//!
//! - `/_gateway/health`, `/_gateway/ready` - Health & readiness, no auth
//! - `/_user`, `/_permission` - Identity management (`auth` extension)
//! - everything else the search terminal declares - proxied to the cluster
//!
//! Unmatched paths answer 404 `page not found`.

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{GatewayError, LoaderError};
use crate::extension::{ExtensionRegistry, Loader};
use crate::handlers;
use crate::state::AppState;

/// Build the router from the built-in extensions.
///
/// # Errors
///
/// Returns `LoaderError` if the pipeline cannot be composed. Serving a
/// partially composed pipeline is never an option.
pub fn build_router(state: AppState) -> Result<Router, LoaderError> {
    build_router_with(state, &ExtensionRegistry::builtin()?)
}

/// Build the router from an explicit registry.
pub fn build_router_with(
    state: AppState,
    registry: &ExtensionRegistry,
) -> Result<Router, LoaderError> {
    let loaded = Loader::new(registry, &state).load()?;
    info!(
        extensions = ?loaded.report.extensions,
        search = loaded.report.search,
        templates = loaded.report.templates.len(),
        route_specs = loaded.route_table.len(),
        "Pipeline composed"
    );

    let cors = build_cors_layer(&state.config.cors_allowed_origins);

    let gateway = Router::new()
        .route("/_gateway/health", get(handlers::health_check))
        .route("/_gateway/ready", get(handlers::readiness_check))
        .with_state(state);

    let router = gateway
        .merge(loaded.router)
        .fallback(page_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        );

    Ok(router)
}

async fn page_not_found() -> GatewayError {
    GatewayError::NotFound("page not found".into())
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins that parse as
/// header values.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
