//! Stub server configuration.
//!
//! Plain values can come from environment variables; the codecs and the
//! credential provider are set in code.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use crate::auth::CredentialProvider;
use crate::codec::{
    BodyParser, BodyWriter, Codecs, DefaultBodyParser, DefaultBodyWriter, ParamsParser,
    UrlParamsParser,
};

/// Default realm announced in Basic challenges.
pub const DEFAULT_REALM: &str = "RustStub";

/// Default number of runtime worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Configuration for one stub server instance.
#[derive(Clone)]
pub struct StubServerConfig {
    /// Port to listen on. `None` probes a free ephemeral port.
    pub port: Option<u16>,
    /// Interface to bind.
    pub bind_host: IpAddr,
    /// Realm announced in Basic challenges.
    pub realm: String,
    /// Worker threads for the server's runtime.
    pub worker_threads: usize,
    /// Request body decoder.
    pub body_parser: Arc<dyn BodyParser>,
    /// Response body encoder.
    pub body_writer: Arc<dyn BodyWriter>,
    /// Query / form parameter parser.
    pub params_parser: Arc<dyn ParamsParser>,
    /// Password check for Basic authentication. `None` admits any credentials.
    pub credential_provider: Option<Arc<dyn CredentialProvider>>,
}

impl Default for StubServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            realm: DEFAULT_REALM.to_owned(),
            worker_threads: DEFAULT_WORKER_THREADS,
            body_parser: Arc::new(DefaultBodyParser),
            body_writer: Arc::new(DefaultBodyWriter),
            params_parser: Arc::new(UrlParamsParser),
            credential_provider: None,
        }
    }
}

impl fmt::Debug for StubServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubServerConfig")
            .field("port", &self.port)
            .field("bind_host", &self.bind_host)
            .field("realm", &self.realm)
            .field("worker_threads", &self.worker_threads)
            .field("credential_provider", &self.credential_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl StubServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RUSTSTUB_PORT` | probe a free port |
    /// | `RUSTSTUB_BIND_HOST` | `127.0.0.1` |
    /// | `RUSTSTUB_REALM` | `RustStub` |
    /// | `RUSTSTUB_WORKER_THREADS` | `2` |
    ///
    /// Unparsable values are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use ruststub_core::StubServerConfig;
    ///
    /// let config = StubServerConfig::from_env();
    /// assert!(config.worker_threads > 0);
    /// ```
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("RUSTSTUB_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.port = (port != 0).then_some(port);
            }
        }
        if let Ok(v) = std::env::var("RUSTSTUB_BIND_HOST") {
            if let Ok(host) = v.parse::<IpAddr>() {
                config.bind_host = host;
            }
        }
        if let Ok(v) = std::env::var("RUSTSTUB_REALM") {
            config.realm = v;
        }
        if let Ok(v) = std::env::var("RUSTSTUB_WORKER_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    config.worker_threads = n;
                }
            }
        }

        config
    }

    /// Listen on `port`.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Check Basic credentials with `provider`.
    #[must_use]
    pub fn with_credential_provider(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credential_provider = Some(Arc::new(provider));
        self
    }

    /// The codec set described by this configuration.
    #[must_use]
    pub fn codecs(&self) -> Codecs {
        Codecs {
            body_parser: Arc::clone(&self.body_parser),
            body_writer: Arc::clone(&self.body_writer),
            params_parser: Arc::clone(&self.params_parser),
        }
    }
}
