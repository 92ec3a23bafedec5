//! Stub HTTP service implementing the hyper `Service` trait.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use ruststub_core::auth::{self, AuthError, CredentialProvider};
use ruststub_core::{
    Codecs, DEFAULT_REALM, Exchange, HandlerResult, Request, Response, RouteTable, StubError,
};

/// Fully buffered response body; handler output is complete before the head is sent.
pub type StubResponseBody = Full<Bytes>;

/// Configuration for the stub HTTP service.
#[derive(Clone)]
pub struct StubHttpConfig {
    /// Realm announced in Basic challenges.
    pub realm: String,
    /// Credential provider for Basic authentication.
    pub credential_provider: Option<Arc<dyn CredentialProvider>>,
}

impl fmt::Debug for StubHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubHttpConfig")
            .field("realm", &self.realm)
            .field(
                "credential_provider",
                &self.credential_provider.as_ref().map(|_| "..."),
            )
            .finish()
    }
}

impl Default for StubHttpConfig {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_owned(),
            credential_provider: None,
        }
    }
}

/// Hyper `Service` that authenticates a request and runs it through a
/// [`RouteTable`].
///
/// Cloned once per connection; all clones share the route table and codecs.
#[derive(Clone)]
pub struct StubHttpService {
    routes: Arc<RouteTable>,
    codecs: Arc<RwLock<Codecs>>,
    config: Arc<StubHttpConfig>,
    remote_addr: Option<SocketAddr>,
}

impl StubHttpService {
    /// Create a new `StubHttpService`.
    pub fn new(routes: Arc<RouteTable>, codecs: Arc<RwLock<Codecs>>, config: StubHttpConfig) -> Self {
        Self {
            routes,
            codecs,
            config: Arc::new(config),
            remote_addr: None,
        }
    }

    /// A clone that reports `addr` as the peer of every request.
    #[must_use]
    pub fn for_connection(&self, addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(addr),
            ..self.clone()
        }
    }

    /// Handle one request end to end.
    ///
    /// Returns [`StubError::Aborted`] when a handler aborted the response, so
    /// that hyper drops the connection instead of answering.
    pub async fn handle<B>(
        &self,
        req: http::Request<B>,
    ) -> Result<http::Response<StubResponseBody>, StubError>
    where
        B: http_body::Body + Send + 'static,
        B::Data: Send,
        B::Error: fmt::Display,
    {
        process_request(self, req).await
    }
}

impl fmt::Debug for StubHttpService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubHttpService")
            .field("routes", &self.routes.len())
            .field("config", &self.config)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

impl hyper::service::Service<http::Request<Incoming>> for StubHttpService {
    type Response = http::Response<StubResponseBody>;
    type Error = StubError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move { svc.handle(req).await })
    }
}

/// Process a single request through authentication and the pipelines.
async fn process_request<B>(
    svc: &StubHttpService,
    req: http::Request<B>,
) -> Result<http::Response<StubResponseBody>, StubError>
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: fmt::Display,
{
    let (parts, incoming) = req.into_parts();
    debug!(method = %parts.method, path = parts.uri.path(), "handling request");

    // 1. Negotiate the auth scheme before routing.
    let scheme = svc
        .routes
        .resolve_auth_scheme(&parts.method, parts.uri.path());
    let principal = match auth::authenticate(
        scheme,
        &parts.headers,
        svc.config.credential_provider.as_deref(),
    ) {
        Ok(principal) => principal,
        Err(err) => {
            warn!(
                %scheme,
                path = parts.uri.path(),
                error = %err,
                "request rejected by authentication"
            );
            return Ok(auth_rejection(&err, &svc.config.realm));
        }
    };

    // 2. Collect body.
    let body = match collect_body(incoming).await {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "failed to read request body");
            return Ok(fault_response(&err));
        }
    };

    // 3. Build the exchange with the codecs currently in effect.
    let codecs = svc.codecs.read().clone();
    let response = Response::new(Arc::clone(&codecs.body_writer));
    let mut request = Request::new(parts, body, codecs).with_principal(principal);
    if let Some(addr) = svc.remote_addr {
        request = request.with_remote_addr(addr);
    }
    let exchange = Exchange { request, response };

    // 4. Run the pipelines off the reactor.
    let path = exchange.request.path().to_owned();
    let response = match run_pipelines(Arc::clone(&svc.routes), exchange).await {
        Ok(response) => response,
        Err(fault) => {
            let text = format!("{fault:#}");
            error!(path = %path, error = %text, "handler fault");
            return Ok(fault_response(&text));
        }
    };

    if response.is_aborted() {
        debug!(path = %path, "response aborted, dropping connection");
        return Err(StubError::Aborted);
    }

    Ok(into_http_response(response))
}

/// Run global and route pipelines on the blocking pool, catching panics.
async fn run_pipelines(routes: Arc<RouteTable>, mut exchange: Exchange) -> anyhow::Result<Response> {
    let joined = tokio::task::spawn_blocking(move || {
        let outcome: std::thread::Result<HandlerResult> =
            std::panic::catch_unwind(AssertUnwindSafe(|| routes.dispatch(&mut exchange)));
        (exchange.response, outcome)
    })
    .await;

    let (response, outcome) = joined.map_err(|e| anyhow::anyhow!("handler task failed: {e}"))?;
    match outcome {
        Ok(Ok(())) => Ok(response),
        Ok(Err(fault)) => Err(fault),
        Err(panic) => Err(anyhow::anyhow!(
            "handler panicked: {}",
            panic_message(&*panic)
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

/// Collect the incoming body into a single `Bytes` buffer.
async fn collect_body<B>(incoming: B) -> Result<Bytes, String>
where
    B: http_body::Body,
    B::Error: fmt::Display,
{
    incoming
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| format!("Failed to read request body: {e}"))
}

fn into_http_response(response: Response) -> http::Response<StubResponseBody> {
    let (status, headers, body) = response.into_parts();
    let mut resp = http::Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

/// 500 with the fault description as a plain-text body.
fn fault_response(text: &str) -> http::Response<StubResponseBody> {
    let mut resp = http::Response::new(Full::new(Bytes::from(text.to_owned())));
    *resp.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// 401 with a Basic challenge, or 403.
fn auth_rejection(err: &AuthError, realm: &str) -> http::Response<StubResponseBody> {
    let mut resp = http::Response::new(Full::default());
    let status = err.status_code();
    *resp.status_mut() = status;
    if status == http::StatusCode::UNAUTHORIZED {
        match http::HeaderValue::from_str(&auth::basic_challenge(realm)) {
            Ok(challenge) => {
                resp.headers_mut()
                    .insert(http::header::WWW_AUTHENTICATE, challenge);
            }
            Err(e) => warn!(realm, error = %e, "realm is not a valid header value"),
        }
    }
    resp
}
