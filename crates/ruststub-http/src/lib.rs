//! Embeddable HTTP stub server for RustStub.
//!
//! This crate puts the routing core of `ruststub-core` on the network:
//!
//! - **Server**: owns the listener, the accept loop and a private runtime
//! - **Service**: hyper `Service` doing auth negotiation, body collection
//!   and pipeline dispatch

pub mod server;
pub mod service;

pub use server::{PORT_PROBE_ATTEMPTS, StubServer, choose_random_unused_port};
pub use service::{StubHttpConfig, StubHttpService, StubResponseBody};

pub use ruststub_core::{
    AuthScheme, BodyValue, Exchange, HandlerChain, HandlerResult, Next, Request, Response,
    RouteMatch, RoutePath, StubError, StubResult, StubServerConfig,
};
