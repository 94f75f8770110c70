//! Permission restriction checks.
//!
//! Each [`Rule`] runs as its own stage so the chain reports which one
//! rejected a request. Only permission credentials carry restrictions; users
//! and the master identity pass straight through. An empty restriction list
//! leaves that dimension unrestricted.

use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::header::REFERER;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use regex::Regex;
use tracing::warn;

use super::rate_limit::CidrRange;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{Credential, Permission};
use crate::pipeline::{Middleware, Next, PipelineRequest, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Sources,
    Referers,
    Indices,
    Category,
    Acl,
    Operation,
    Expiry,
}

impl Rule {
    /// Stages in the order they run on the search-engine chain.
    pub const ALL: [Rule; 7] = [
        Rule::Sources,
        Rule::Referers,
        Rule::Indices,
        Rule::Category,
        Rule::Acl,
        Rule::Operation,
        Rule::Expiry,
    ];

    fn stage_name(self) -> &'static str {
        match self {
            Rule::Sources => "validate_sources",
            Rule::Referers => "validate_referers",
            Rule::Indices => "validate_indices",
            Rule::Category => "validate_category",
            Rule::Acl => "validate_acl",
            Rule::Operation => "validate_operation",
            Rule::Expiry => "validate_expiry",
        }
    }

    fn check(
        self,
        permission: &Permission,
        ctx: &RequestContext,
        req: &PipelineRequest,
    ) -> GatewayResult<()> {
        match self {
            Rule::Sources => check_sources(permission, &ctx.client_ip),
            Rule::Referers => {
                let referer = req.headers().get(REFERER).and_then(|v| v.to_str().ok());
                check_referers(permission, referer)
            }
            Rule::Indices => check_indices(permission, &ctx.indices),
            Rule::Category => {
                let category = ctx.require_category()?;
                allowed(&permission.categories, &category, || {
                    format!("permission does not grant the `{category}` category")
                })
            }
            Rule::Acl => {
                let acl = ctx.require_acl()?;
                allowed(&permission.acls, &acl, || {
                    format!("permission does not grant the `{acl}` acl")
                })
            }
            Rule::Operation => {
                let op = ctx.op.ok_or_else(|| {
                    GatewayError::Internal("request op missing from context".into())
                })?;
                allowed(&permission.ops, &op, || {
                    format!("permission does not grant the `{op}` operation")
                })
            }
            Rule::Expiry => {
                if permission.is_expired_at(Utc::now()) {
                    return Err(GatewayError::Unauthorized("Permission has expired".into()));
                }
                Ok(())
            }
        }
    }
}

fn allowed<T: PartialEq>(
    list: &[T],
    value: &T,
    message: impl FnOnce() -> String,
) -> GatewayResult<()> {
    if list.is_empty() || list.contains(value) {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(message()))
    }
}

fn check_sources(permission: &Permission, client_ip: &str) -> GatewayResult<()> {
    if permission.sources.is_empty() {
        return Ok(());
    }
    let denied = || GatewayError::Forbidden(format!("source `{client_ip}` is not allowed"));
    let ip: IpAddr = client_ip.parse().map_err(|_| denied())?;

    let permitted = permission
        .sources
        .iter()
        .filter_map(|s| CidrRange::parse(s))
        .any(|range| range.contains(&ip));
    if permitted { Ok(()) } else { Err(denied()) }
}

fn check_referers(permission: &Permission, referer: Option<&str>) -> GatewayResult<()> {
    if permission.referers.is_empty() {
        return Ok(());
    }
    let Some(referer) = referer else {
        return Err(GatewayError::Forbidden("referer is required".into()));
    };
    if permission.referers.iter().any(|p| wildcard_match(p, referer)) {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(format!("referer `{referer}` is not allowed")))
    }
}

fn check_indices(permission: &Permission, indices: &[String]) -> GatewayResult<()> {
    if permission.indices.is_empty() {
        return Ok(());
    }
    if indices.is_empty() {
        return Err(GatewayError::Forbidden(
            "permission is restricted to specific indices".into(),
        ));
    }
    match indices
        .iter()
        .find(|index| !permission.indices.iter().any(|p| wildcard_match(p, index)))
    {
        Some(index) => Err(GatewayError::Forbidden(format!("index `{index}` is not allowed"))),
        None => Ok(()),
    }
}

/// Match `value` against a pattern where `*` stands for any run of characters.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    match Regex::new(&format!("^{}$", escaped.join(".*"))) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            warn!(pattern, error = %e, "Unusable wildcard pattern");
            false
        }
    }
}

/// One restriction check as a pipeline stage.
pub struct Validate {
    rule: Rule,
}

impl Validate {
    pub fn new(rule: Rule) -> Self {
        Self { rule }
    }
}

#[async_trait]
impl Middleware for Validate {
    fn name(&self) -> &'static str {
        self.rule.stage_name()
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response {
        if let Some(Credential::Permission(permission)) = &ctx.credential
            && let Err(e) = self.rule.check(permission, ctx, &req)
        {
            warn!(
                identity = %permission.username,
                rule = self.name(),
                error = %e,
                "Permission restriction rejected request"
            );
            return e.into_response();
        }
        next.run(ctx, req).await
    }
}
