//! Error types for RustStub.

use std::net::SocketAddr;

/// Core error type for stub server configuration and serving.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// A route pattern could not be compiled at registration time.
    #[error("invalid route pattern `{pattern}`: {source}")]
    InvalidRoutePattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// The underlying regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// The listener could not be bound to the requested address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address the server tried to bind.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The async runtime backing the server could not be created.
    #[error("failed to start server runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The accept loop was cancelled by `stop()`.
    #[error("listener shut down")]
    ListenerShutdown,

    /// The accept loop failed for a reason other than shutdown.
    #[error("listener failed: {0}")]
    ListenerFatal(#[source] std::io::Error),

    /// A handler aborted the connection.
    #[error("connection aborted by handler")]
    Aborted,

    /// A request or response body could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
}

/// Convenience result type for RustStub operations.
pub type StubResult<T> = Result<T, StubError>;
