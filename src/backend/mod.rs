//! Connection to the search cluster that sits behind the gateway.

mod circuit_breaker;
mod client;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{BackendClient, filter_request_headers, filter_response_headers};
