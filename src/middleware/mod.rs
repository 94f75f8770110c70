//! Pipeline stages and the request helpers they share.
//!
//! Stages on the search-engine chain, in order:
//!
//! ```text
//! classify → auth → rate_limit → validate_* → (extension stages) → proxy
//!    ↓         ↓         ↓            ↓
//!   404    401/404/429  429        401/403
//! ```
//!
//! # Security Considerations
//!
//! - Secrets are compared in constant time
//! - Failed authentication is throttled per client IP
//! - Forwarded-for headers are only honored from trusted proxy ranges
//! - Client timeouts are clamped to a fixed window

pub mod auth;
pub mod classify;
pub mod ip;
pub mod rate_limit;
pub mod timeout;
pub mod validate;

pub use auth::{AuthResolver, BasicCredentials, MasterIdentity, USERNAME_PARAM, parse_basic_auth};
pub use classify::{CATEGORY_OVERRIDE_HEADER, Classifier, INDEX_PARAM, RouteTable};
pub use ip::{UNKNOWN_IP, extract_client_ip, extract_client_ip_with_validation};
pub use rate_limit::{CidrRange, IdentityQuota, IdentityRateLimiter, TrustedProxyConfig};
pub use timeout::{
    MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS, REQUEST_TIMEOUT_HEADER, RequestTimeout,
    effective_timeout,
};
pub use validate::{Rule, Validate, wildcard_match};
