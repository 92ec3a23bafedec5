//! Routing, middleware and request/response types for RustStub.
//!
//! This crate holds everything about a stub server that does not touch the
//! network:
//!
//! - **Pipeline**: ordered middleware chained through a [`Next`] continuation
//! - **Routes**: method + anchored path pattern + per-route pipeline
//! - **Route table**: registration order, first-match dispatch, auth negotiation
//! - **Exchange**: the [`Request`]/[`Response`] facade handlers work with
//! - **Codecs**: pluggable body parsing, body writing and parameter parsing

pub mod auth;
pub mod codec;
mod config;
mod error;
mod exchange;
mod pipeline;
mod route;
mod table;

pub use auth::{AuthError, AuthScheme, CredentialProvider, Principal, StaticCredentialProvider};
pub use codec::{BodyParser, BodyValue, BodyWriter, CodecError, Codecs, ParamsParser};
pub use config::{DEFAULT_REALM, DEFAULT_WORKER_THREADS, StubServerConfig};
pub use error::{StubError, StubResult};
pub use exchange::{Exchange, Request, Response};
pub use pipeline::{Handler, HandlerChain, HandlerResult, Next, Pipeline};
pub use route::{ResourceHandler, RouteMatch, RoutePath};
pub use table::{GlobalPipeline, RouteHandle, RouteTable};
