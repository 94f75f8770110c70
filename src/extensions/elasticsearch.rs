//! The search terminal: classification table for the Elasticsearch REST API
//! and the handler that forwards admitted requests to the cluster.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::backend::BackendClient;
use crate::extension::{CoreStages, RouteDecl, TerminalExtension};
use crate::middleware::{Rule, Validate};
use crate::models::{Acl, Category, Operation, RouteSpec};
use crate::pipeline::{Chain, Handler, Middleware, PipelineRequest, RequestContext};
use crate::state::AppState;

/// Forwards the request to the backend cluster.
pub struct ProxyHandler {
    backend: Arc<BackendClient>,
}

impl ProxyHandler {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn call(&self, ctx: &mut RequestContext, req: PipelineRequest) -> Response {
        match self.backend.forward(ctx, req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    path = ctx.matched_path.as_deref().unwrap_or_default(),
                    error = %e,
                    "Backend request failed"
                );
                e.into_response()
            }
        }
    }
}

pub struct ElasticsearchExtension;

impl ElasticsearchExtension {
    pub const NAME: &'static str = "elasticsearch";
}

type Entry = (&'static [Method], &'static str, Category, Acl, Operation);

const READ: &[Method] = &[Method::GET, Method::HEAD];
const GET: &[Method] = &[Method::GET];
const QUERY: &[Method] = &[Method::GET, Method::POST];
const POST: &[Method] = &[Method::POST];
const PUT: &[Method] = &[Method::PUT];
const WRITE: &[Method] = &[Method::PUT, Method::POST];
const DELETE: &[Method] = &[Method::DELETE];

/// `GET /_cat` itself is deliberately absent: only its sub-resources are served.
fn entries() -> Vec<Entry> {
    use Acl as A;
    use Category as C;
    use Operation as O;

    vec![
        (READ, "/", C::Misc, A::Info, O::Read),
        (GET, "/_cat/{*rest}", C::Cat, A::Cat, O::Read),
        (GET, "/_cluster/health", C::Clusters, A::Cluster, O::Read),
        (GET, "/_cluster/health/{index}", C::Clusters, A::Cluster, O::Read),
        (GET, "/_cluster/stats", C::Clusters, A::Stats, O::Read),
        (GET, "/_nodes", C::Clusters, A::Nodes, O::Read),
        (GET, "/_nodes/stats", C::Clusters, A::Nodes, O::Read),
        (QUERY, "/_search", C::Search, A::Search, O::Read),
        (QUERY, "/_msearch", C::Search, A::Search, O::Read),
        (QUERY, "/_count", C::Search, A::Count, O::Read),
        (WRITE, "/_bulk", C::Docs, A::Bulk, O::Write),
        (GET, "/_aliases", C::Indices, A::Aliases, O::Read),
        (POST, "/_aliases", C::Indices, A::Aliases, O::Write),
        (POST, "/_refresh", C::Indices, A::Refresh, O::Write),
        (GET, "/_stats", C::Indices, A::Stats, O::Read),
        (READ, "/{index}", C::Indices, A::Get, O::Read),
        (PUT, "/{index}", C::Indices, A::Create, O::Write),
        (DELETE, "/{index}", C::Indices, A::Delete, O::Delete),
        (QUERY, "/{index}/_search", C::Search, A::Search, O::Read),
        (QUERY, "/{index}/_msearch", C::Search, A::Search, O::Read),
        (QUERY, "/{index}/_count", C::Search, A::Count, O::Read),
        (WRITE, "/{index}/_bulk", C::Docs, A::Bulk, O::Write),
        (POST, "/{index}/_doc", C::Docs, A::Create, O::Write),
        (READ, "/{index}/_doc/{id}", C::Docs, A::Doc, O::Read),
        (WRITE, "/{index}/_doc/{id}", C::Docs, A::Doc, O::Write),
        (DELETE, "/{index}/_doc/{id}", C::Docs, A::Delete, O::Delete),
        (WRITE, "/{index}/_create/{id}", C::Docs, A::Create, O::Write),
        (POST, "/{index}/_update/{id}", C::Docs, A::Update, O::Write),
        (GET, "/{index}/_mapping", C::Indices, A::Mapping, O::Read),
        (WRITE, "/{index}/_mapping", C::Indices, A::Mapping, O::Write),
        (GET, "/{index}/_settings", C::Indices, A::Settings, O::Read),
        (PUT, "/{index}/_settings", C::Indices, A::Settings, O::Write),
        (GET, "/{index}/_alias", C::Indices, A::Aliases, O::Read),
        (QUERY, "/{index}/_refresh", C::Indices, A::Refresh, O::Write),
        (GET, "/{index}/_stats", C::Indices, A::Stats, O::Read),
    ]
}

impl TerminalExtension for ElasticsearchExtension {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn routes(&self) -> Vec<RouteDecl> {
        entries()
            .into_iter()
            .flat_map(|(methods, template, category, acl, op)| {
                methods.iter().map(move |method| {
                    RouteDecl::new(method.clone(), template, RouteSpec::new(category, acl, op))
                })
            })
            .collect()
    }

    /// classify → auth → rate limit → permission checks → contributed → proxy
    fn install(
        &self,
        state: &AppState,
        core: &CoreStages,
        contributed: Vec<Arc<dyn Middleware>>,
    ) -> Chain {
        let mut stages = core.authenticated();
        stages.extend(
            Rule::ALL
                .iter()
                .map(|rule| Arc::new(Validate::new(*rule)) as Arc<dyn Middleware>),
        );
        stages.extend(contributed);
        Chain::new(stages, Arc::new(ProxyHandler::new(Arc::clone(&state.backend))))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::RouteTable;
    use std::collections::HashSet;

    #[test]
    fn test_route_table_has_no_duplicates() {
        let mut table = RouteTable::new();
        for decl in ElasticsearchExtension.routes() {
            table
                .insert(ElasticsearchExtension::NAME, decl.method, decl.template, decl.spec)
                .unwrap();
        }
        assert!(table.classify(&Method::GET, "/_cat").is_none());
        assert_eq!(
            table.classify(&Method::POST, "/{index}/_search"),
            Some(RouteSpec::new(Category::Search, Acl::Search, Operation::Read))
        );
        assert_eq!(
            table.classify(&Method::DELETE, "/{index}/_doc/{id}"),
            Some(RouteSpec::new(Category::Docs, Acl::Delete, Operation::Delete))
        );
        assert!(table.classify(&Method::PATCH, "/{index}").is_none());
    }

    #[test]
    fn test_every_route_is_data_plane() {
        let templates: HashSet<_> = ElasticsearchExtension
            .routes()
            .into_iter()
            .inspect(|decl| assert!(decl.spec.category.is_from_es(), "{}", decl.template))
            .map(|decl| decl.template)
            .collect();
        assert!(templates.contains("/_cat/{*rest}"));
        assert!(!templates.contains("/_cat"));
    }
}
