//! Route registry and request dispatch.

use std::sync::Arc;

use http::{Method, StatusCode};
use parking_lot::RwLock;
use tracing::debug;

use crate::auth::AuthScheme;
use crate::error::StubResult;
use crate::exchange::Exchange;
use crate::pipeline::{HandlerChain, HandlerResult, Pipeline};
use crate::route::{ResourceHandler, RouteMatch, RoutePath};

/// Shared handle to a registered route.
pub type RouteHandle = Arc<ResourceHandler>;

/// The pipeline every request passes through before routing.
#[derive(Debug, Default)]
pub struct GlobalPipeline {
    pipeline: Pipeline,
    auth_scheme: RwLock<Option<AuthScheme>>,
}

impl HandlerChain for GlobalPipeline {
    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn auth_scheme(&self) -> Option<AuthScheme> {
        *self.auth_scheme.read()
    }

    fn set_auth_scheme(&self, scheme: AuthScheme) {
        *self.auth_scheme.write() = Some(scheme);
    }
}

/// Ordered route list plus the global pipeline.
///
/// Routes are tried in registration order and the first match wins.
/// Readers work on snapshots, so handlers may register routes while a
/// request is in flight.
#[derive(Debug, Default)]
pub struct RouteTable {
    global: Arc<GlobalPipeline>,
    routes: RwLock<Vec<RouteHandle>>,
}

impl RouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The global pipeline.
    #[must_use]
    pub fn global(&self) -> Arc<GlobalPipeline> {
        Arc::clone(&self.global)
    }

    /// Register a route and return it for configuration.
    pub fn add_route(&self, method: Method, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        let handler = Arc::new(ResourceHandler::new(method, path.into())?);
        debug!(method = %handler.method(), path = handler.path(), "registered route");
        self.routes.write().push(Arc::clone(&handler));
        Ok(handler)
    }

    /// Snapshot of the registered routes.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteHandle> {
        self.routes.read().clone()
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// First route matching the request, with its match.
    #[must_use]
    pub fn find_route(&self, method: &Method, path: &str) -> Option<(RouteHandle, RouteMatch)> {
        self.routes().into_iter().find_map(|route| {
            let matched = route.matches(method, path);
            matched.is_success().then_some((route, matched))
        })
    }

    /// Scheme demanded for a request.
    ///
    /// The global scheme wins when set; otherwise the first matching route's
    /// scheme applies, and [`AuthScheme::Anonymous`] when neither says.
    #[must_use]
    pub fn resolve_auth_scheme(&self, method: &Method, path: &str) -> AuthScheme {
        self.global
            .auth_scheme()
            .or_else(|| {
                self.find_route(method, path)
                    .and_then(|(route, _)| route.auth_scheme())
            })
            .unwrap_or_default()
    }

    /// Run the global pipeline, then the first matching route's pipeline.
    ///
    /// Sets 404 when no route matches and the global pipeline reaches its end.
    /// Faults propagate to the caller unchanged.
    pub fn dispatch(&self, exchange: &mut Exchange) -> HandlerResult {
        let method = exchange.request.method().clone();
        let path = exchange.request.path().to_owned();
        let unmatched = RouteMatch::none();

        self.global
            .pipeline()
            .run(&unmatched, exchange, &mut |exchange: &mut Exchange| {
                if let Some((route, matched)) = self.find_route(&method, &path) {
                    exchange.request.set_route_match(matched.clone());
                    route
                        .pipeline()
                        .run(&matched, exchange, &mut |_: &mut Exchange| Ok(()))
                } else {
                    debug!(%method, %path, "no route matched");
                    exchange.response.set_status(StatusCode::NOT_FOUND);
                    Ok(())
                }
            })
    }
}
