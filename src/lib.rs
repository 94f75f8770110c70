//! # Search Gateway
//!
//! An access-controlled HTTP gateway in front of an Elasticsearch-compatible
//! search cluster, featuring:
//!
//! - **Access Control**: Basic-auth users and scoped permissions, master
//!   bootstrap, per-permission restrictions
//! - **Admission Control**: Per-identity rate limits, brute-force lockout
//! - **Analytics**: Search, click and conversion signals recorded off the
//!   response path
//! - **Resilience**: Backend circuit breaker, client deadlines
//! - **Observability**: Request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Tower layers (Request ID → Trace → CORS)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline chains, composed at startup by the Loader:        │
//! │  classify → auth → rate limit → validate → extensions       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Terminals (identity management handlers, backend proxy)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Store (users, permissions, analytics) │ Search cluster     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use search_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config)?;
//!     let app = build_router(state)?;
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Bootstrap
//!
//! Seed the first admin account from the environment:
//! ```bash
//! MASTER_USERNAME=root MASTER_PASSWORD=change-me cargo run
//! ```
//!
//! Per-identity rate limiting:
//! ```bash
//! RATE_LIMIT_RPS=100 RATE_LIMIT_BURST=50 cargo run
//! ```

pub mod analytics;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod extension;
pub mod extensions;
pub mod geo;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

pub use config::Config;
pub use error::{GatewayError, GatewayResult, LoaderError};
pub use extension::{Extension, ExtensionRegistry, Loader, TerminalExtension};
pub use routes::{build_router, build_router_with};
pub use state::AppState;
