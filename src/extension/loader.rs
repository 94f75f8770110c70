//! Startup composition of the request pipeline.
//!
//! # Load order
//!
//! 1. Non-sequenced extensions, in registration order. They must not depend
//!    on each other.
//! 2. Sequenced extensions, in the configured priority order.
//! 3. The reactive-search terminal, if registered, with the reactive-search
//!    middleware accumulated so far.
//! 4. The search terminal, last, with the accumulated search middleware.
//!
//! Every failure is a [`LoaderError`]; a gateway is either fully assembled or
//! not served at all.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use tracing::{debug, info};

use super::{CoreStages, Extension, ExtensionRegistry, TerminalExtension};
use crate::error::LoaderError;
use crate::middleware::{AuthResolver, Classifier, RouteTable};
use crate::pipeline::{Chain, IngressConfig, Middleware, TemplateRoutes, bind_template};
use crate::state::AppState;

/// Path prefix kept for the gateway's own endpoints.
pub const RESERVED_PREFIX: &str = "/_gateway";

/// What was loaded, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Non-terminal extensions in load order.
    pub extensions: Vec<&'static str>,
    pub reactive_search: Option<&'static str>,
    pub search: &'static str,
    /// Stage names of the search chain, first to last.
    pub search_stages: Vec<&'static str>,
    pub reactive_search_stages: Vec<&'static str>,
    /// Bound templates, sorted.
    pub templates: Vec<String>,
}

/// The assembled router and its description.
pub struct LoadedGateway {
    pub router: Router,
    pub route_table: Arc<RouteTable>,
    pub report: LoadReport,
}

impl std::fmt::Debug for LoadedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedGateway")
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

/// Composes the registry's modules into one router.
pub struct Loader<'a> {
    registry: &'a ExtensionRegistry,
    state: &'a AppState,
}

struct Bound {
    owner: &'static str,
    routes: TemplateRoutes,
}

impl<'a> Loader<'a> {
    pub fn new(registry: &'a ExtensionRegistry, state: &'a AppState) -> Self {
        Self { registry, state }
    }

    fn selected(&self, name: &str) -> bool {
        self.state
            .config
            .extensions
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }

    /// Non-terminal extensions in load order.
    pub fn load_order(&self) -> Result<Vec<Arc<dyn Extension>>, LoaderError> {
        let sequenced = &self.state.config.sequenced_extensions;
        let mut seen = HashSet::new();
        if let Some(dup) = sequenced.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(LoaderError::DuplicateSequencedName(dup.clone()));
        }

        if let Some(names) = &self.state.config.extensions
            && let Some(unknown) = names.iter().find(|n| !self.registry.contains(n))
        {
            return Err(LoaderError::UnknownExtension(unknown.clone()));
        }

        let extensions = self.registry.extensions();
        let mut order: Vec<Arc<dyn Extension>> = extensions
            .iter()
            .filter(|e| self.selected(e.name()))
            .filter(|e| !sequenced.iter().any(|s| s == e.name()))
            .cloned()
            .collect();

        for name in sequenced {
            match extensions.iter().find(|e| e.name() == name) {
                Some(extension) if self.selected(name) => order.push(Arc::clone(extension)),
                Some(_) => debug!(extension = %name, "Sequenced extension not selected"),
                None => debug!(extension = %name, "Sequenced extension not registered"),
            }
        }

        Ok(order)
    }

    /// Assemble the router.
    pub fn load(self) -> Result<LoadedGateway, LoaderError> {
        let search = self
            .registry
            .search()
            .ok_or(LoaderError::MissingSearchTerminal)?;
        let reactive_search = self
            .registry
            .reactive_search()
            .filter(|t| self.selected(t.name()));

        let order = self.load_order()?;

        // Collect everything first; the classifier needs the complete table.
        let mut owned_routes = Vec::new();
        let mut search_middleware: Vec<Arc<dyn Middleware>> = Vec::new();
        let mut reactive_middleware: Vec<Arc<dyn Middleware>> = Vec::new();
        for extension in &order {
            let name = extension.name();
            let routes = extension.routes(self.state);
            let es = extension.search_middleware(self.state);
            let rs = extension.reactive_search_middleware(self.state);
            info!(
                extension = name,
                routes = routes.len(),
                search_middleware = es.len(),
                reactive_search_middleware = rs.len(),
                "Extension loaded"
            );
            owned_routes.extend(routes.into_iter().map(|r| (name, r)));
            search_middleware.extend(es);
            reactive_middleware.extend(rs);
        }

        let mut table = RouteTable::new();
        for (module, route) in &owned_routes {
            validate_template(route.template, module)?;
            table.insert(module, route.method.clone(), route.template, route.spec)?;
        }
        let terminals: Vec<&Arc<dyn TerminalExtension>> =
            reactive_search.into_iter().chain(Some(search)).collect();
        for terminal in &terminals {
            for decl in terminal.routes() {
                validate_template(decl.template, terminal.name())?;
                table.insert(terminal.name(), decl.method, decl.template, decl.spec)?;
            }
        }
        let table = Arc::new(table);

        let classifier: Arc<dyn Middleware> = Arc::new(Classifier::new(Arc::clone(&table)));
        let auth: Arc<dyn Middleware> = Arc::new(AuthResolver::new(
            Arc::clone(&self.state.store),
            Arc::clone(&self.state.cache),
            self.state.master_identity(),
        ));
        let rate_limit: Arc<dyn Middleware> = self.state.limiter.clone();
        let core = CoreStages {
            classifier,
            auth,
            rate_limit,
        };

        let mut bound: BTreeMap<String, Bound> = BTreeMap::new();
        for (module, route) in owned_routes {
            let chain = Arc::new(Chain::new(core.authenticated(), route.handler));
            bind(&mut bound, module, route.template, Some(route.method), chain)?;
        }

        let mut reactive_search_stages = Vec::new();
        if let Some(terminal) = reactive_search {
            let chain = Arc::new(terminal.install(self.state, &core, reactive_middleware));
            reactive_search_stages = chain.stage_names();
            bind_terminal(&mut bound, terminal.as_ref(), &chain)?;
            info!(
                extension = terminal.name(),
                stages = ?reactive_search_stages,
                "Reactive-search terminal installed"
            );
        }

        let chain = Arc::new(search.install(self.state, &core, search_middleware));
        let search_stages = chain.stage_names();
        bind_terminal(&mut bound, search.as_ref(), &chain)?;
        info!(extension = search.name(), stages = ?search_stages, "Search terminal installed");

        let ingress = Arc::new(IngressConfig {
            body_limit: self.state.config.max_request_body_size,
            trusted_proxies: Arc::clone(&self.state.trusted_proxies),
        });
        let templates: Vec<String> = bound.keys().cloned().collect();
        let router = bound.into_iter().fold(Router::new(), |router, (template, b)| {
            router.route(&template, bind_template(b.routes, Arc::clone(&ingress)))
        });

        Ok(LoadedGateway {
            router,
            route_table: table,
            report: LoadReport {
                extensions: order.iter().map(|e| e.name()).collect(),
                reactive_search: reactive_search.map(|t| t.name()),
                search: search.name(),
                search_stages,
                reactive_search_stages,
                templates,
            },
        })
    }
}

/// Bind every template a terminal declares, for all methods.
fn bind_terminal(
    bound: &mut BTreeMap<String, Bound>,
    terminal: &dyn TerminalExtension,
    chain: &Arc<Chain>,
) -> Result<(), LoaderError> {
    let mut templates: Vec<&'static str> = terminal.routes().iter().map(|d| d.template).collect();
    templates.sort_unstable();
    templates.dedup();
    for template in templates {
        bind(bound, terminal.name(), template, None, Arc::clone(chain))?;
    }
    Ok(())
}

/// A template belongs to exactly one module.
fn bind(
    bound: &mut BTreeMap<String, Bound>,
    module: &'static str,
    template: &str,
    method: Option<Method>,
    chain: Arc<Chain>,
) -> Result<(), LoaderError> {
    let conflict = |method: String| LoaderError::RouteConflict {
        method,
        template: template.to_string(),
        module: module.to_string(),
    };
    let method_label = || method.as_ref().map_or("*".to_string(), Method::to_string);

    let entry = bound.entry(template.to_string()).or_insert_with(|| Bound {
        owner: module,
        routes: TemplateRoutes::default(),
    });
    if entry.owner != module {
        return Err(conflict(method_label()));
    }

    let methods = method.map(|m| [m]);
    entry
        .routes
        .insert(methods.as_ref().map(|m| m.as_slice()), chain)
        .map_err(conflict)
}

/// Reject templates the router cannot take or that shadow gateway endpoints.
fn validate_template(template: &str, module: &str) -> Result<(), LoaderError> {
    let invalid = |reason: &str| LoaderError::InvalidTemplate {
        template: template.to_string(),
        module: module.to_string(),
        reason: reason.to_string(),
    };

    if !template.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if template == RESERVED_PREFIX || template.starts_with(&format!("{RESERVED_PREFIX}/")) {
        return Err(invalid("prefix is reserved for gateway endpoints"));
    }

    let segments: Vec<&str> = template.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() && template != "/" {
            return Err(invalid("empty path segment"));
        }
        let has_brace = segment.contains('{') || segment.contains('}');
        if !has_brace {
            continue;
        }
        let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            return Err(invalid("parameters must span a whole segment"));
        };
        let (wildcard, name) = match name.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("parameter names must be alphanumeric"));
        }
        if wildcard && i != last {
            return Err(invalid("catch-all parameter must be the last segment"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extension::{ExtensionRoute, RouteDecl};
    use crate::models::{Acl, Category, Operation, RouteSpec};
    use crate::pipeline::tests::{Ok200, Tracer};
    use crate::state::tests::{memory_state, test_config};
    use std::sync::Mutex;

    const SPEC: RouteSpec = RouteSpec::new(Category::Misc, Acl::Info, Operation::Read);

    /// Extension contributing one traced stage to each chain, and optionally a route.
    struct Contributor {
        name: &'static str,
        route: Option<(&'static str, Method)>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Contributor {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                route: None,
                log: Arc::default(),
            })
        }

        fn with_route(name: &'static str, template: &'static str, method: Method) -> Arc<Self> {
            Arc::new(Self {
                name,
                route: Some((template, method)),
                log: Arc::default(),
            })
        }
    }

    impl Extension for Contributor {
        fn name(&self) -> &'static str {
            self.name
        }

        fn routes(&self, _state: &AppState) -> Vec<ExtensionRoute> {
            self.route
                .iter()
                .map(|(t, m)| ExtensionRoute::new(m.clone(), *t, SPEC, Arc::new(Ok200)))
                .collect()
        }

        fn search_middleware(&self, _state: &AppState) -> Vec<Arc<dyn Middleware>> {
            vec![Arc::new(Tracer {
                name: self.name,
                log: Arc::clone(&self.log),
            })]
        }

        fn reactive_search_middleware(&self, state: &AppState) -> Vec<Arc<dyn Middleware>> {
            self.search_middleware(state)
        }
    }

    struct Terminal {
        name: &'static str,
        templates: Vec<&'static str>,
    }

    impl TerminalExtension for Terminal {
        fn name(&self) -> &'static str {
            self.name
        }

        fn routes(&self) -> Vec<RouteDecl> {
            self.templates
                .iter()
                .map(|t| RouteDecl::new(Method::GET, *t, SPEC))
                .collect()
        }

        fn install(
            &self,
            _state: &AppState,
            core: &CoreStages,
            contributed: Vec<Arc<dyn Middleware>>,
        ) -> Chain {
            let mut stages = core.authenticated();
            stages.extend(contributed);
            Chain::new(stages, Arc::new(Ok200))
        }
    }

    fn search_terminal() -> Arc<Terminal> {
        Arc::new(Terminal {
            name: "search",
            templates: vec!["/", "/{index}/_search"],
        })
    }

    fn registry_with(extensions: Vec<Arc<Contributor>>) -> ExtensionRegistry {
        let mut registry = ExtensionRegistry::new();
        for extension in extensions {
            registry.register(extension).unwrap();
        }
        registry.register_search(search_terminal()).unwrap();
        registry
    }

    fn config(sequenced: &[&str]) -> Config {
        Config {
            sequenced_extensions: sequenced.iter().map(|s| s.to_string()).collect(),
            ..test_config()
        }
    }

    #[test]
    fn test_unsequenced_load_before_sequenced_in_priority_order() {
        let registry = registry_with(vec![
            Contributor::new("analytics"),
            Contributor::new("custom-a"),
            Contributor::new("rules"),
            Contributor::new("custom-b"),
        ]);
        let (state, _) = memory_state(config(&["searchrelevancy", "rules", "analytics"]));

        let loaded = Loader::new(&registry, &state).load().unwrap();

        assert_eq!(
            loaded.report.extensions,
            vec!["custom-a", "custom-b", "rules", "analytics"]
        );
        assert_eq!(
            loaded.report.search_stages,
            vec!["classifier", "auth", "rate_limit", "custom-a", "custom-b", "rules", "analytics"]
        );
        assert_eq!(loaded.report.search, "search");
        assert!(loaded.report.reactive_search.is_none());
    }

    #[test]
    fn test_reactive_search_gets_its_own_accumulated_list() {
        let mut registry = registry_with(vec![Contributor::new("analytics")]);
        registry
            .register_reactive_search(Arc::new(Terminal {
                name: "querytranslate",
                templates: vec!["/{index}/_reactivesearch"],
            }))
            .unwrap();
        let (state, _) = memory_state(config(&["analytics"]));

        let loaded = Loader::new(&registry, &state).load().unwrap();

        assert_eq!(loaded.report.reactive_search, Some("querytranslate"));
        assert_eq!(
            loaded.report.reactive_search_stages,
            vec!["classifier", "auth", "rate_limit", "analytics"]
        );
        assert!(
            loaded
                .report
                .templates
                .contains(&"/{index}/_reactivesearch".to_string())
        );
    }

    #[test]
    fn test_selection_filters_and_rejects_unknown_names() {
        let registry =
            registry_with(vec![Contributor::new("analytics"), Contributor::new("rules")]);

        let (state, _) = memory_state(Config {
            extensions: Some(vec!["rules".into()]),
            ..config(&["rules", "analytics"])
        });
        let loaded = Loader::new(&registry, &state).load().unwrap();
        assert_eq!(loaded.report.extensions, vec!["rules"]);

        let (state, _) = memory_state(Config {
            extensions: Some(vec!["rules".into(), "nope".into()]),
            ..test_config()
        });
        assert_eq!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::UnknownExtension("nope".into())
        );
    }

    #[test]
    fn test_missing_search_terminal_is_fatal() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Contributor::new("analytics")).unwrap();
        let (state, _) = memory_state(test_config());

        assert_eq!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::MissingSearchTerminal
        );
    }

    #[test]
    fn test_duplicate_priority_entry_is_fatal() {
        let registry = registry_with(Vec::new());
        let (state, _) = memory_state(config(&["rules", "rules"]));
        assert_eq!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::DuplicateSequencedName("rules".into())
        );
    }

    #[test]
    fn test_route_conflicts() {
        // same template as a terminal
        let registry = registry_with(vec![Contributor::with_route(
            "custom",
            "/{index}/_search",
            Method::POST,
        )]);
        let (state, _) = memory_state(test_config());
        assert!(matches!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::RouteConflict { .. }
        ));

        // same (method, template) declared twice
        let registry = registry_with(vec![
            Contributor::with_route("a", "/_things", Method::GET),
            Contributor::with_route("b", "/_things", Method::GET),
        ]);
        assert!(matches!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::DuplicateRouteSpec { .. }
        ));

        // distinct methods, different owners
        let registry = registry_with(vec![
            Contributor::with_route("a", "/_things", Method::GET),
            Contributor::with_route("b", "/_things", Method::POST),
        ]);
        assert!(matches!(
            Loader::new(&registry, &state).load().unwrap_err(),
            LoaderError::RouteConflict { .. }
        ));
    }

    #[test]
    fn test_invalid_templates() {
        for template in ["no-slash", "/_gateway/health", "/{a}x", "/{*rest}/tail", "/a//b", "/{}"] {
            assert!(
                matches!(
                    validate_template(template, "m"),
                    Err(LoaderError::InvalidTemplate { .. })
                ),
                "{template}"
            );
        }
        for template in ["/", "/{index}/_doc/{id}", "/_cat/{*rest}", "/_gateways"] {
            assert!(validate_template(template, "m").is_ok(), "{template}");
        }
    }
}
