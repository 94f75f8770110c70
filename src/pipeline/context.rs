use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{GatewayError, GatewayResult};
use crate::models::{Acl, Category, Credential, Operation};

/// Per-request state threaded through every pipeline stage.
///
/// Ingress fills the routing fields; the classifier fills `category`, `acl`,
/// `op` and `indices`; the auth stage fills `credential`. Later stages read
/// through the `require_*` accessors, which turn a missing value into an
/// internal error rather than a panic.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    /// Route template the router matched, e.g. `/{index}/_search`.
    pub matched_path: Option<String>,
    pub path_params: HashMap<String, String>,
    pub client_ip: String,
    /// Client-supplied deadline from `X-Request-Timeout`.
    pub deadline: Option<Instant>,
    pub category: Option<Category>,
    pub acl: Option<Acl>,
    pub op: Option<Operation>,
    pub indices: Vec<String>,
    pub credential: Option<Credential>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Time left before the client deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn require_category(&self) -> GatewayResult<Category> {
        self.category
            .ok_or_else(|| GatewayError::Internal("request category missing from context".into()))
    }

    pub fn require_acl(&self) -> GatewayResult<Acl> {
        self.acl
            .ok_or_else(|| GatewayError::Internal("request acl missing from context".into()))
    }

    pub fn require_credential(&self) -> GatewayResult<&Credential> {
        self.credential
            .as_ref()
            .ok_or_else(|| GatewayError::Internal("credential missing from context".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_are_internal_errors() {
        let ctx = RequestContext::new("req-1");
        assert!(matches!(ctx.require_category(), Err(GatewayError::Internal(_))));
        assert!(matches!(ctx.require_acl(), Err(GatewayError::Internal(_))));
        assert!(matches!(ctx.require_credential(), Err(GatewayError::Internal(_))));
    }

    #[test]
    fn test_remaining_saturates() {
        let mut ctx = RequestContext::default();
        assert!(ctx.remaining().is_none());

        ctx.deadline = Some(Instant::now());
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
