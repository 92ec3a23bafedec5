//! Listener lifecycle and accept loop.
//!
//! A [`StubServer`] owns a private multi-threaded tokio runtime, so it can be
//! started and stopped from plain `#[test]` functions as well as from inside
//! another runtime.

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use http::Method;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ruststub_core::{
    BodyParser, BodyWriter, Codecs, GlobalPipeline, ParamsParser, RouteHandle, RoutePath,
    RouteTable, StubError, StubResult, StubServerConfig,
};

use crate::service::{StubHttpConfig, StubHttpService};

/// How many times an auto-selected port is re-probed when the bind loses the race.
pub const PORT_PROBE_ATTEMPTS: usize = 5;

/// How long `stop()` waits for the accept loop to release the listener.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// An embeddable HTTP stub server.
///
/// Construction binds the listener and starts serving. Routes and global
/// handlers may be registered at any time; requests accepted afterwards see
/// them.
///
/// ```no_run
/// use ruststub_http::{HandlerChain, StubServer, StubServerConfig};
///
/// let server = StubServer::start(StubServerConfig::default())?;
/// server
///     .on_get("/hello")?
///     .respond(|_, res| Ok(res.set_body("world")?));
/// println!("serving on {}", server.base_uri());
/// server.stop()?;
/// # Ok::<(), ruststub_http::StubError>(())
/// ```
pub struct StubServer {
    routes: Arc<RouteTable>,
    codecs: Arc<RwLock<Codecs>>,
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    done_rx: Mutex<Option<mpsc::Receiver<()>>>,
    fault: Arc<Mutex<ListenerFault>>,
    listening: Arc<AtomicBool>,
    runtime: Option<Runtime>,
}

/// The error that ended the accept loop.
///
/// The error itself is handed out once by `stop()`; its description stays.
#[derive(Debug, Default)]
struct ListenerFault {
    error: Option<StubError>,
    description: Option<String>,
}

impl ListenerFault {
    fn record(&mut self, error: StubError) {
        self.description = Some(error.to_string());
        self.error = Some(error);
    }
}

/// Source of inbound connections for the accept loop.
trait Acceptor: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

impl StubServer {
    /// Start a server with the default configuration on a free port.
    pub fn new() -> StubResult<Self> {
        Self::start(StubServerConfig::default())
    }

    /// Bind the listener described by `config` and start accepting.
    ///
    /// The listener is bound before the runtime is built, so a bind failure
    /// is returned even when called from inside another runtime.
    pub fn start(config: StubServerConfig) -> StubResult<Self> {
        let std_listener = bind_listener(&config)?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|source| StubError::Bind {
                addr: SocketAddr::new(config.bind_host, config.port.unwrap_or(0)),
                source,
            })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|source| StubError::Bind {
                addr: local_addr,
                source,
            })?;

        let runtime = build_runtime(&config)?;
        let registered = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)
        };
        let listener = match registered {
            Ok(listener) => listener,
            Err(source) => {
                // Dropping a runtime blocks, which panics inside async callers.
                runtime.shutdown_background();
                return Err(StubError::Bind {
                    addr: local_addr,
                    source,
                });
            }
        };

        Ok(Self::serve(&config, runtime, listener, local_addr))
    }

    fn serve<A: Acceptor>(
        config: &StubServerConfig,
        runtime: Runtime,
        acceptor: A,
        local_addr: SocketAddr,
    ) -> Self {
        let routes = Arc::new(RouteTable::new());
        let codecs = Arc::new(RwLock::new(config.codecs()));
        let service = StubHttpService::new(
            Arc::clone(&routes),
            Arc::clone(&codecs),
            StubHttpConfig {
                realm: config.realm.clone(),
                credential_provider: config.credential_provider.clone(),
            },
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let fault = Arc::new(Mutex::new(ListenerFault::default()));
        let listening = Arc::new(AtomicBool::new(true));

        runtime.spawn(accept_loop(
            acceptor,
            service,
            stop_rx,
            done_tx,
            Arc::clone(&fault),
            Arc::clone(&listening),
        ));
        info!(%local_addr, "stub server listening");

        Self {
            routes,
            codecs,
            local_addr,
            stop_tx,
            done_rx: Mutex::new(Some(done_rx)),
            fault,
            listening,
            runtime: Some(runtime),
        }
    }

    /// Register a route for `method` and return it for configuration.
    pub fn on(&self, method: Method, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.routes.add_route(method, path)
    }

    /// Register a `GET` route.
    pub fn on_get(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::GET, path)
    }

    /// Register a `HEAD` route.
    pub fn on_head(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::HEAD, path)
    }

    /// Register a `PUT` route.
    pub fn on_put(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::PUT, path)
    }

    /// Register a `PATCH` route.
    pub fn on_patch(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::PATCH, path)
    }

    /// Register a `POST` route.
    pub fn on_post(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::POST, path)
    }

    /// Register a `DELETE` route.
    pub fn on_delete(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::DELETE, path)
    }

    /// Register an `OPTIONS` route.
    pub fn on_options(&self, path: impl Into<RoutePath>) -> StubResult<RouteHandle> {
        self.on(Method::OPTIONS, path)
    }

    /// The global pipeline, run for every admitted request before routing.
    #[must_use]
    pub fn on_any_request(&self) -> Arc<GlobalPipeline> {
        self.routes.global()
    }

    /// The route table backing this server.
    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Replace the request body parser.
    pub fn set_body_parser(&self, parser: impl BodyParser) {
        self.codecs.write().body_parser = Arc::new(parser);
    }

    /// Replace the response body writer.
    pub fn set_body_writer(&self, writer: impl BodyWriter) {
        self.codecs.write().body_writer = Arc::new(writer);
    }

    /// Replace the query / form parameter parser.
    pub fn set_params_parser(&self, parser: impl ParamsParser) {
        self.codecs.write().params_parser = Arc::new(parser);
    }

    /// `http://localhost:<port>/`.
    #[must_use]
    pub fn base_uri(&self) -> String {
        format!("http://localhost:{}/", self.local_addr.port())
    }

    /// The bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is still running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Description of the fault that ended the accept loop, if any.
    #[must_use]
    pub fn listener_fault(&self) -> Option<String> {
        self.fault.lock().description.clone()
    }

    /// Stop accepting connections and release the port.
    ///
    /// Connections already accepted run to completion. Returns the listener
    /// fault when the accept loop had already died on its own; later calls
    /// return `Ok(())`.
    pub fn stop(&self) -> StubResult<()> {
        if !self.stop_tx.send_replace(true) {
            info!(local_addr = %self.local_addr, "stopping stub server");
        }

        if let Some(done) = self.done_rx.lock().take() {
            if done.recv_timeout(STOP_TIMEOUT).is_err() {
                warn!(local_addr = %self.local_addr, "accept loop did not confirm shutdown");
            }
        }

        match self.fault.lock().error.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for StubServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubServer")
            .field("local_addr", &self.local_addr)
            .field("listening", &self.is_listening())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "listener fault reported while dropping stub server");
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Probe a free ephemeral port on the loopback interface.
///
/// The probe socket is closed before returning, so another process may take
/// the port before the caller binds it.
pub fn choose_random_unused_port() -> io::Result<u16> {
    probe_unused_port(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn probe_unused_port(host: IpAddr) -> io::Result<u16> {
    let probe = std::net::TcpListener::bind((host, 0))?;
    Ok(probe.local_addr()?.port())
}

fn build_runtime(config: &StubServerConfig) -> StubResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads.max(1))
        .thread_name("ruststub-worker")
        .enable_all()
        .build()
        .map_err(StubError::Runtime)
}

fn bind_listener(config: &StubServerConfig) -> StubResult<std::net::TcpListener> {
    if let Some(port) = config.port {
        let addr = SocketAddr::new(config.bind_host, port);
        return std::net::TcpListener::bind(addr).map_err(|source| StubError::Bind { addr, source });
    }

    let mut attempt = 1;
    loop {
        let port = probe_unused_port(config.bind_host).map_err(|source| StubError::Bind {
            addr: SocketAddr::new(config.bind_host, 0),
            source,
        })?;
        let addr = SocketAddr::new(config.bind_host, port);
        match std::net::TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(source)
                if source.kind() == io::ErrorKind::AddrInUse && attempt < PORT_PROBE_ATTEMPTS =>
            {
                warn!(%addr, attempt, "probed port was taken, probing again");
                attempt += 1;
            }
            Err(source) => return Err(StubError::Bind { addr, source }),
        }
    }
}

async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    service: StubHttpService,
    mut stop_rx: watch::Receiver<bool>,
    done_tx: mpsc::SyncSender<()>,
    fault: Arc<Mutex<ListenerFault>>,
    listening: Arc<AtomicBool>,
) {
    let graceful = GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    loop {
        let (stream, peer_addr) = match next_connection(&mut acceptor, &mut stop_rx).await {
            Ok(conn) => conn,
            Err(StubError::ListenerShutdown) => {
                debug!("accept loop cancelled");
                break;
            }
            Err(e) => {
                error!(error = %e, "listener failed, no longer accepting connections");
                fault.lock().record(e);
                break;
            }
        };

        debug!(%peer_addr, "accepted connection");
        let svc = service.for_connection(peer_addr);
        let conn = http.serve_connection(TokioIo::new(stream), svc);
        let conn = graceful.watch(conn.into_owned());

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(peer_addr = %peer_addr, error = %e, "connection closed with error");
            }
        });
    }

    drop(acceptor);
    listening.store(false, Ordering::Release);
    done_tx.send(()).ok();

    // Let in-flight requests finish; idle keep-alive connections close.
    graceful.shutdown().await;
}

/// Wait for the next connection or for `stop()`.
///
/// Per-connection accept failures are skipped; any other failure is fatal.
async fn next_connection<A: Acceptor>(
    acceptor: &mut A,
    stop_rx: &mut watch::Receiver<bool>,
) -> StubResult<(A::Stream, SocketAddr)> {
    loop {
        if *stop_rx.borrow() {
            return Err(StubError::ListenerShutdown);
        }
        tokio::select! {
            result = acceptor.accept() => match result {
                Ok(conn) => return Ok(conn),
                Err(e) if is_connection_error(&e) => {
                    warn!(error = %e, "failed to accept connection");
                }
                Err(e) => return Err(StubError::ListenerFatal(e)),
            },
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return Err(StubError::ListenerShutdown);
                }
            }
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}
