//! Request pipeline: an ordered list of stages wrapped around a terminal handler.
//!
//! ```text
//! ingress ─► stage 1 ─► stage 2 ─► … ─► stage n ─► terminal
//!               │          │                │
//!               └── any stage may answer and stop the chain
//! ```
//!
//! Stages share one [`RequestContext`] per request, passed by `&mut` down the
//! chain. A stage continues by calling [`Next::run`] and short-circuits by
//! returning its own response without calling it.

mod context;
mod ingress;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Request;
use axum::response::Response;
use bytes::Bytes;

pub use context::RequestContext;
pub use ingress::{IngressConfig, TemplateRoutes, bind_template};

/// Fully buffered inbound request as seen by pipeline stages.
pub type PipelineRequest = Request<Bytes>;

/// A pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable stage name, used in logs and load-order reports.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response;
}

/// The innermost handler of a chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, req: PipelineRequest) -> Response;
}

/// The remainder of a chain, handed to each stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Handler,
}

impl Next<'_> {
    /// Invoke the next stage, or the terminal handler when no stages remain.
    pub async fn run(self, ctx: &mut RequestContext, req: PipelineRequest) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    terminal: self.terminal,
                };
                stage.handle(ctx, req, next).await
            }
            None => self.terminal.call(ctx, req).await,
        }
    }
}

/// Ordered stages plus their terminal handler. Immutable once built.
pub struct Chain {
    stages: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Handler>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>, terminal: Arc<dyn Handler>) -> Self {
        Self { stages, terminal }
    }

    /// Run the request through every stage, first to last.
    pub async fn execute(&self, ctx: &mut RequestContext, req: PipelineRequest) -> Response {
        let next = Next {
            stages: &self.stages,
            terminal: self.terminal.as_ref(),
        };
        next.run(ctx, req).await
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Mutex;

    /// Records its name into a shared log, then continues.
    pub(crate) struct Tracer {
        pub name: &'static str,
        pub log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Tracer {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            ctx: &mut RequestContext,
            req: PipelineRequest,
            next: Next<'_>,
        ) -> Response {
            self.log.lock().unwrap().push(self.name);
            next.run(ctx, req).await
        }
    }

    struct Stop;

    #[async_trait]
    impl Middleware for Stop {
        fn name(&self) -> &'static str {
            "stop"
        }

        async fn handle(
            &self,
            _ctx: &mut RequestContext,
            _req: PipelineRequest,
            _next: Next<'_>,
        ) -> Response {
            StatusCode::IM_A_TEAPOT.into_response()
        }
    }

    pub(crate) struct Ok200;

    #[async_trait]
    impl Handler for Ok200 {
        async fn call(&self, _ctx: &mut RequestContext, _req: PipelineRequest) -> Response {
            StatusCode::OK.into_response()
        }
    }

    fn request() -> PipelineRequest {
        Request::builder().uri("/").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_first_to_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(
            vec![
                Arc::new(Tracer { name: "a", log: Arc::clone(&log) }),
                Arc::new(Tracer { name: "b", log: Arc::clone(&log) }),
                Arc::new(Tracer { name: "c", log: Arc::clone(&log) }),
            ],
            Arc::new(Ok200),
        );

        let response = chain.execute(&mut RequestContext::default(), request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(chain.stage_names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stage_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(
            vec![
                Arc::new(Tracer { name: "a", log: Arc::clone(&log) }),
                Arc::new(Stop),
                Arc::new(Tracer { name: "never", log: Arc::clone(&log) }),
            ],
            Arc::new(Ok200),
        );

        let response = chain.execute(&mut RequestContext::default(), request()).await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_empty_chain_reaches_terminal() {
        let chain = Chain::new(Vec::new(), Arc::new(Ok200));
        assert!(chain.is_empty());
        let response = chain.execute(&mut RequestContext::default(), request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
