//! Client deadline propagation.
//!
//! Clients may bound how long they will wait with a header:
//!
//! ```text
//! X-Request-Timeout: 5000   # milliseconds
//! ```
//!
//! Ingress turns a valid value into [`RequestContext::deadline`](crate::pipeline::RequestContext),
//! and the backend client caps its own timeout by whatever remains. Values
//! outside the allowed range are ignored.

use std::time::Duration;

use axum::http::HeaderMap;
use tracing::debug;

/// Minimum accepted client timeout (100ms).
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Maximum accepted client timeout (5 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    pub duration: Duration,
    pub original_ms: u64,
}

impl RequestTimeout {
    /// `None` when outside `MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS`.
    pub fn from_millis(ms: u64) -> Option<Self> {
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&ms) {
            return None;
        }
        Some(Self {
            duration: Duration::from_millis(ms),
            original_ms: ms,
        })
    }

    /// Parse the timeout header, ignoring absent or invalid values.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(REQUEST_TIMEOUT_HEADER)?.to_str().ok()?;

        let Ok(ms) = value.trim().parse::<u64>() else {
            debug!(value, "Invalid X-Request-Timeout header value, ignoring");
            return None;
        };

        let timeout = Self::from_millis(ms);
        if timeout.is_none() {
            debug!(
                timeout_ms = ms,
                min = MIN_REQUEST_TIMEOUT_MS,
                max = MAX_REQUEST_TIMEOUT_MS,
                "Client timeout outside allowed range, ignoring"
            );
        }
        timeout
    }
}

/// Effective timeout: the configured bound, shortened by a client deadline.
pub fn effective_timeout(configured: Duration, remaining: Option<Duration>) -> Duration {
    remaining.map_or(configured, |r| r.min(configured))
}
