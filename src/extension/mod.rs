//! Statically registered extension modules.
//!
//! An extension contributes any of:
//!
//! - routes it owns, each with a [`RouteSpec`] and a handler
//! - middleware for the chain in front of the search terminal
//! - middleware for the chain in front of the reactive-search terminal
//!
//! Two slots are reserved for terminals, the modules that own the innermost
//! handler of a proxied chain. The search terminal is mandatory; the
//! reactive-search terminal is optional. See [`Loader`] for the order in which
//! everything is assembled.

mod loader;
mod registry;

use std::sync::Arc;

use axum::http::Method;

use crate::models::RouteSpec;
use crate::pipeline::{Chain, Handler, Middleware};
use crate::state::AppState;

pub use loader::{LoadReport, LoadedGateway, Loader, RESERVED_PREFIX};
pub use registry::ExtensionRegistry;

/// A route owned by an extension.
pub struct ExtensionRoute {
    pub method: Method,
    pub template: &'static str,
    pub spec: RouteSpec,
    pub handler: Arc<dyn Handler>,
}

impl ExtensionRoute {
    pub fn new(
        method: Method,
        template: &'static str,
        spec: RouteSpec,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            method,
            template,
            spec,
            handler,
        }
    }
}

/// A `(method, template)` pair a terminal serves, with its classification.
#[derive(Debug, Clone)]
pub struct RouteDecl {
    pub method: Method,
    pub template: &'static str,
    pub spec: RouteSpec,
}

impl RouteDecl {
    pub fn new(method: Method, template: &'static str, spec: RouteSpec) -> Self {
        Self {
            method,
            template,
            spec,
        }
    }
}

/// Stages every authenticated chain starts with, shared across chains so
/// that caches and rate-limit buckets are process-wide.
#[derive(Clone)]
pub struct CoreStages {
    pub classifier: Arc<dyn Middleware>,
    pub auth: Arc<dyn Middleware>,
    pub rate_limit: Arc<dyn Middleware>,
}

impl CoreStages {
    /// Classify, authenticate, then admit.
    pub fn authenticated(&self) -> Vec<Arc<dyn Middleware>> {
        vec![
            Arc::clone(&self.classifier),
            Arc::clone(&self.auth),
            Arc::clone(&self.rate_limit),
        ]
    }
}

/// A non-terminal extension module.
///
/// Hooks are called once, at startup, in load order.
pub trait Extension: Send + Sync {
    /// Unique name; also the key used by the sequenced priority list.
    fn name(&self) -> &'static str;

    fn routes(&self, _state: &AppState) -> Vec<ExtensionRoute> {
        Vec::new()
    }

    /// Middleware appended to the search terminal's chain.
    fn search_middleware(&self, _state: &AppState) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    /// Middleware appended to the reactive-search terminal's chain.
    fn reactive_search_middleware(&self, _state: &AppState) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }
}

/// A module that owns the innermost handler of a proxied chain.
pub trait TerminalExtension: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every `(method, template)` the terminal serves. Templates are bound for
    /// all methods; undeclared methods fail classification with 404.
    fn routes(&self) -> Vec<RouteDecl>;

    /// Build the chain: `core`, the terminal's own stages, then
    /// `contributed` (the merged middleware of every loaded extension, in
    /// load order), then the terminal handler.
    fn install(
        &self,
        state: &AppState,
        core: &CoreStages,
        contributed: Vec<Arc<dyn Middleware>>,
    ) -> Chain;
}
