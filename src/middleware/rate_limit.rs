//! Per-identity admission control, plus CIDR matching shared with the
//! trusted-proxy and source-restriction checks.
//!
//! # Algorithm
//!
//! Each resolved identity gets its own `governor` GCRA limiter. The quota is
//! the permission's `limits` when it declares one, otherwise the configured
//! default (`RATE_LIMIT_RPS` sustained, `RATE_LIMIT_BURST` burst). With no
//! quota at all the request is admitted.
//!
//! A `limits { requests: N, window_secs: W }` quota admits a burst of N and
//! refills one slot every W/N seconds, so the (N+1)th request inside the
//! window is rejected.
//!
//! # Response Headers
//!
//! On rejection (429): `Retry-After`, `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining: 0`.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::metrics;
use crate::models::{Credential, Limits};
use crate::pipeline::{Middleware, Next, PipelineRequest, RequestContext};

// =============================================================================
// CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32 or /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;
        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// CIDR ranges of reverse proxies allowed to set forwarding headers.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip_str` falls in a configured range; everything is trusted
    /// when none are configured.
    pub fn is_trusted(&self, ip_str: &str) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        let Ok(ip) = ip_str.parse::<IpAddr>() else {
            return false;
        };
        self.ranges.iter().any(|range| range.contains(&ip))
    }
}

// =============================================================================
// Per-Identity Limiter
// =============================================================================

/// A quota plus the number reported in `X-RateLimit-Limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityQuota {
    pub quota: Quota,
    pub limit: u32,
}

impl IdentityQuota {
    /// `rps` sustained with `burst` capacity; `None` when `rps` is 0.
    pub fn per_second(rps: u32, burst: u32) -> Option<Self> {
        let rps_nonzero = NonZeroU32::new(rps)?;
        let burst_nonzero = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Some(Self {
            quota: Quota::per_second(rps_nonzero).allow_burst(burst_nonzero),
            limit: rps,
        })
    }

    /// `requests` per `window_secs`; `None` when either is 0.
    pub fn from_limits(limits: Limits) -> Option<Self> {
        let requests = NonZeroU32::new(limits.requests)?;
        if limits.window_secs == 0 {
            return None;
        }
        let period = Duration::from_secs(limits.window_secs) / limits.requests;
        let quota = Quota::with_period(period)?.allow_burst(requests);
        Some(Self {
            quota,
            limit: limits.requests,
        })
    }
}

struct Bucket {
    quota: IdentityQuota,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl Bucket {
    fn new(quota: IdentityQuota) -> Self {
        Self {
            quota,
            limiter: Arc::new(RateLimiter::direct(quota.quota)),
        }
    }
}

/// Admission-control stage keyed by identity name.
pub struct IdentityRateLimiter {
    default_quota: Option<IdentityQuota>,
    buckets: DashMap<String, Bucket>,
}

impl IdentityRateLimiter {
    pub fn new(default_quota: Option<IdentityQuota>) -> Self {
        Self {
            default_quota,
            buckets: DashMap::new(),
        }
    }

    pub fn from_config(rps: u32, burst: u32) -> Self {
        Self::new(IdentityQuota::per_second(rps, burst))
    }

    /// Quota that applies to `credential`.
    pub fn quota_for(&self, credential: &Credential) -> Option<IdentityQuota> {
        credential
            .permission()
            .and_then(|p| p.limits)
            .and_then(IdentityQuota::from_limits)
            .or(self.default_quota)
    }

    /// Take one slot from `name`'s bucket, rebuilding it if its quota changed.
    ///
    /// On rejection returns the whole seconds to wait (at least 1).
    pub fn check(&self, name: &str, quota: IdentityQuota) -> Result<(), u64> {
        let limiter = {
            let mut bucket = self
                .buckets
                .entry(name.to_string())
                .or_insert_with(|| Bucket::new(quota));
            if bucket.quota != quota {
                debug!(identity = name, "Quota changed, resetting limiter");
                *bucket = Bucket::new(quota);
            }
            Arc::clone(&bucket.limiter)
        };

        limiter.check().map_err(|not_until| {
            not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1)
        })
    }

    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl Middleware for IdentityRateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response {
        let credential = match ctx.require_credential() {
            Ok(credential) => credential,
            Err(e) => return e.into_response(),
        };

        let Some(quota) = self.quota_for(credential) else {
            return next.run(ctx, req).await;
        };

        if let Err(retry_after_secs) = self.check(credential.name(), quota) {
            warn!(
                identity = credential.name(),
                client_ip = %ctx.client_ip,
                path = %req.uri().path(),
                retry_after_secs,
                "Rate limit exceeded for identity"
            );
            metrics::record_rate_limited(credential.kind());
            return GatewayError::TooManyRequests {
                retry_after_secs,
                limit: Some(quota.limit),
            }
            .into_response();
        }

        next.run(ctx, req).await
    }
}
