//! Route classification.
//!
//! Every `(method, template)` the router can reach is declared in a
//! [`RouteTable`] at startup. The [`Classifier`] stage looks the matched pair
//! up and writes category, ACL, operation and indices into the context; a
//! pair without a declaration fails closed with 404.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use tracing::{trace, warn};

use crate::error::{GatewayError, LoaderError};
use crate::models::{Category, RouteSpec};
use crate::pipeline::{Middleware, Next, PipelineRequest, RequestContext};

/// Header that forces the streams category when set to `streams`.
pub const CATEGORY_OVERRIDE_HEADER: &str = "x-request-category";

/// Path parameter holding a comma-separated index list.
pub const INDEX_PARAM: &str = "index";

/// Immutable lookup from `(method, template)` to [`RouteSpec`].
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    specs: HashMap<(Method, String), RouteSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a spec on behalf of `module`. Each pair may be declared once.
    pub fn insert(
        &mut self,
        module: &str,
        method: Method,
        template: &str,
        spec: RouteSpec,
    ) -> Result<(), LoaderError> {
        let key = (method, template.to_string());
        if self.specs.contains_key(&key) {
            return Err(LoaderError::DuplicateRouteSpec {
                method: key.0.to_string(),
                template: key.1,
                module: module.to_string(),
            });
        }
        self.specs.insert(key, spec);
        Ok(())
    }

    pub fn classify(&self, method: &Method, template: &str) -> Option<RouteSpec> {
        // HashMap<(Method, String)> can't be queried by (&Method, &str)
        self.specs
            .get(&(method.clone(), template.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Distinct templates with at least one declared method.
    pub fn templates(&self) -> Vec<&str> {
        let mut templates: Vec<&str> = self.specs.keys().map(|(_, t)| t.as_str()).collect();
        templates.sort_unstable();
        templates.dedup();
        templates
    }
}

/// Whether the request asks to be treated as a streaming request.
pub fn is_streams_override(headers: &HeaderMap) -> bool {
    headers
        .get(CATEGORY_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(Category::Streams.as_str()))
}

/// Split an `{index}` parameter into index names.
pub fn split_indices(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether an `{index}` value names an API endpoint rather than an index.
///
/// Index names cannot start with `_`, so `/_cat` or `/_tasks` reaching an
/// `{index}` template is an undeclared endpoint. `_all` is the one reserved
/// name that addresses indices.
pub fn is_reserved_index(raw: &str) -> bool {
    split_indices(raw)
        .iter()
        .any(|index| index.starts_with('_') && index != "_all")
}

/// First pipeline stage on every chain.
pub struct Classifier {
    table: Arc<RouteTable>,
}

impl Classifier {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }
}

#[async_trait]
impl Middleware for Classifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response {
        let Some(template) = ctx.matched_path.as_deref() else {
            warn!(path = %req.uri().path(), "No route template for request");
            return GatewayError::NotFound("page not found".into()).into_response();
        };

        let Some(spec) = self.table.classify(req.method(), template) else {
            warn!(
                method = %req.method(),
                template,
                "No route spec declared for request"
            );
            return GatewayError::NotFound("page not found".into()).into_response();
        };

        if let Some(raw) = ctx.param(INDEX_PARAM)
            && is_reserved_index(raw)
        {
            warn!(
                method = %req.method(),
                template,
                index = raw,
                "Undeclared endpoint matched an index template"
            );
            return GatewayError::NotFound("page not found".into()).into_response();
        }

        let category = if is_streams_override(req.headers()) {
            Category::Streams
        } else {
            spec.category
        };

        ctx.category = Some(category);
        ctx.acl = Some(spec.acl);
        ctx.op = Some(spec.op);
        ctx.indices = ctx.param(INDEX_PARAM).map(split_indices).unwrap_or_default();

        trace!(
            %category,
            acl = %spec.acl,
            op = %spec.op,
            indices = ?ctx.indices,
            "Request classified"
        );

        next.run(ctx, req).await
    }
}
