//! Adapter from axum routing to pipeline chains.
//!
//! Each route template is bound once with `any(...)`; the dispatcher picks the
//! chain for the request method, buffers the body, and seeds the
//! [`RequestContext`] from what the router already resolved (matched template,
//! path parameters) plus the ingress headers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, FromRequestParts, MatchedPath, RawPathParams, Request};
use axum::http::Method;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, any};
use tracing::debug;
use uuid::Uuid;

use super::{Chain, RequestContext};
use crate::error::GatewayError;
use crate::metrics;
use crate::middleware::{
    RequestTimeout, TrustedProxyConfig, UNKNOWN_IP, extract_client_ip_with_validation,
};

/// Header carrying the request id set by the outer tower layers.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Settings shared by every bound template.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub body_limit: usize,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
}

/// Chains registered under one route template, by method.
#[derive(Debug, Default, Clone)]
pub struct TemplateRoutes {
    by_method: HashMap<Method, Arc<Chain>>,
    fallback: Option<Arc<Chain>>,
}

impl TemplateRoutes {
    /// Register `chain` for `methods`, or for every method when `None`.
    ///
    /// Returns the method that is already taken on conflict (`"*"` for the
    /// any-method slot).
    pub fn insert(&mut self, methods: Option<&[Method]>, chain: Arc<Chain>) -> Result<(), String> {
        let Some(methods) = methods else {
            if self.fallback.is_some() {
                return Err("*".to_string());
            }
            self.fallback = Some(chain);
            return Ok(());
        };

        if let Some(taken) = methods.iter().find(|m| self.by_method.contains_key(*m)) {
            return Err(taken.to_string());
        }
        for method in methods {
            self.by_method.insert(method.clone(), Arc::clone(&chain));
        }
        Ok(())
    }

    /// Chain for `method`: exact match, then GET for HEAD, then the fallback.
    pub fn select(&self, method: &Method) -> Option<&Arc<Chain>> {
        self.by_method
            .get(method)
            .or_else(|| {
                if *method == Method::HEAD {
                    self.by_method.get(&Method::GET)
                } else {
                    None
                }
            })
            .or(self.fallback.as_ref())
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.by_method.keys()
    }
}

/// Forwarded-for headers first, then the peer address when the server was
/// started with connect info.
fn client_ip(parts: &Parts, trusted_proxies: &TrustedProxyConfig) -> String {
    let forwarded = extract_client_ip_with_validation(&parts.headers, trusted_proxies);
    if forwarded != UNKNOWN_IP {
        return forwarded.into_owned();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_IP.to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

/// Bind a template's chains into an axum method router.
pub fn bind_template(routes: TemplateRoutes, config: Arc<IngressConfig>) -> MethodRouter {
    let routes = Arc::new(routes);
    any(move |req: Request| dispatch(Arc::clone(&routes), Arc::clone(&config), req))
}

async fn dispatch(
    routes: Arc<TemplateRoutes>,
    config: Arc<IngressConfig>,
    req: Request,
) -> Response {
    let started = Instant::now();
    let (mut parts, body) = req.into_parts();

    let Some(chain) = routes.select(&parts.method).cloned() else {
        return GatewayError::MethodNotAllowed.into_response();
    };

    let body = match to_bytes(body, config.body_limit).await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, limit = config.body_limit, "Failed to buffer request body");
            return GatewayError::PayloadTooLarge {
                limit: config.body_limit,
            }
            .into_response();
        }
    };

    let request_id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut ctx = RequestContext::new(request_id);
    ctx.matched_path = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned());

    match RawPathParams::from_request_parts(&mut parts, &()).await {
        Ok(params) => {
            ctx.path_params = params
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
        }
        Err(e) => debug!(error = %e, "Path parameters unavailable"),
    }

    ctx.client_ip = client_ip(&parts, &config.trusted_proxies);
    ctx.deadline = RequestTimeout::from_headers(&parts.headers).map(|t| started + t.duration);

    let method = parts.method.clone();
    let response = chain.execute(&mut ctx, Request::from_parts(parts, body)).await;

    metrics::record_request(
        ctx.category.map_or("unclassified", |c| c.as_str()),
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );

    response
}
