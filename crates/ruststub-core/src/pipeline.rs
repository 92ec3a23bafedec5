//! Continuation-passing middleware pipeline.
//!
//! A [`Pipeline`] is an append-only list of handlers. Running it calls the
//! first handler with a [`Next`] continuation; calling [`Next::run`] advances
//! to the following handler, and after the last one the caller-supplied
//! terminal continuation runs. A handler that returns without calling `next`
//! stops the chain there.
//!
//! ```text
//! run(m, ex, terminal)
//!   -> h0(m, ex, next0)
//!        -> next0.run(ex) -> h1(m, ex, next1)
//!                              -> next1.run(ex) -> terminal(ex)
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::auth::AuthScheme;
use crate::exchange::{Exchange, Request, Response};
use crate::route::RouteMatch;

/// Result of a handler. An `Err` is a handler fault and becomes a 500.
pub type HandlerResult = anyhow::Result<()>;

/// A middleware handler in canonical shape.
///
/// Implemented for every `Fn(&RouteMatch, &mut Exchange, Next<'_>) -> HandlerResult`.
pub trait Handler: Send + Sync + 'static {
    /// Handle the exchange, calling `next.run(exchange)` to continue the chain.
    fn call(&self, matched: &RouteMatch, exchange: &mut Exchange, next: Next<'_>)
    -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&RouteMatch, &mut Exchange, Next<'_>) -> HandlerResult + Send + Sync + 'static,
{
    fn call(
        &self,
        matched: &RouteMatch,
        exchange: &mut Exchange,
        next: Next<'_>,
    ) -> HandlerResult {
        self(matched, exchange, next)
    }
}

/// Continuation handed to each handler; advances to the next one.
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
    index: usize,
    matched: &'a RouteMatch,
    terminal: &'a mut dyn FnMut(&mut Exchange) -> HandlerResult,
}

impl Next<'_> {
    /// Continue with the next handler, or the terminal continuation after the last one.
    pub fn run(self, exchange: &mut Exchange) -> HandlerResult {
        drive(
            self.handlers,
            self.index,
            self.matched,
            exchange,
            self.terminal,
        )
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &(self.handlers.len() - self.index))
            .finish_non_exhaustive()
    }
}

fn drive(
    handlers: &[Arc<dyn Handler>],
    index: usize,
    matched: &RouteMatch,
    exchange: &mut Exchange,
    terminal: &mut dyn FnMut(&mut Exchange) -> HandlerResult,
) -> HandlerResult {
    match handlers.get(index) {
        Some(handler) => handler.call(
            matched,
            exchange,
            Next {
                handlers,
                index: index + 1,
                matched,
                terminal,
            },
        ),
        None => terminal(exchange),
    }
}

/// Append-only ordered list of handlers.
#[derive(Default)]
pub struct Pipeline {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler closure.
    pub fn add<F>(&self, handler: F)
    where
        F: Fn(&RouteMatch, &mut Exchange, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(handler));
    }

    /// Append a shared handler.
    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Run every handler in order, then `terminal`.
    ///
    /// The handler list is snapshotted first, so handlers may register more
    /// handlers without deadlocking; those only apply to later runs.
    pub fn run(
        &self,
        matched: &RouteMatch,
        exchange: &mut Exchange,
        terminal: &mut dyn FnMut(&mut Exchange) -> HandlerResult,
    ) -> HandlerResult {
        let handlers = self.handlers.read().clone();
        drive(&handlers, 0, matched, exchange, terminal)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Something that owns a pipeline and an optional auth scheme.
///
/// Implemented by the global pipeline and by every route, so the same
/// registration helpers work on both.
pub trait HandlerChain {
    /// The underlying pipeline.
    fn pipeline(&self) -> &Pipeline;

    /// The explicitly configured auth scheme, if any.
    fn auth_scheme(&self) -> Option<AuthScheme>;

    /// Demand `scheme` for requests negotiated against this chain.
    fn set_auth_scheme(&self, scheme: AuthScheme);

    /// Builder form of [`set_auth_scheme`](Self::set_auth_scheme).
    fn with_auth_scheme(&self, scheme: AuthScheme) -> &Self
    where
        Self: Sized,
    {
        self.set_auth_scheme(scheme);
        self
    }

    /// Append a handler in canonical shape.
    fn handle<F>(&self, handler: F) -> &Self
    where
        Self: Sized,
        F: Fn(&RouteMatch, &mut Exchange, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.pipeline().add(handler);
        self
    }

    /// Append a handler that does not need the route match.
    fn handle_exchange<F>(&self, handler: F) -> &Self
    where
        Self: Sized,
        F: Fn(&mut Exchange, Next<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.pipeline()
            .add(move |_: &RouteMatch, exchange: &mut Exchange, next: Next<'_>| {
                handler(exchange, next)
            });
        self
    }

    /// Append a handler that always continues the chain after running.
    fn respond<F>(&self, handler: F) -> &Self
    where
        Self: Sized,
        F: Fn(&mut Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.pipeline()
            .add(move |_: &RouteMatch, exchange: &mut Exchange, next: Next<'_>| {
                handler(&mut exchange.request, &mut exchange.response)?;
                next.run(exchange)
            });
        self
    }

    /// Like [`respond`](Self::respond), with access to the route match.
    fn respond_with_match<F>(&self, handler: F) -> &Self
    where
        Self: Sized,
        F: Fn(&RouteMatch, &mut Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.pipeline()
            .add(move |matched: &RouteMatch, exchange: &mut Exchange, next: Next<'_>| {
                handler(matched, &mut exchange.request, &mut exchange.response)?;
                next.run(exchange)
            });
        self
    }
}
