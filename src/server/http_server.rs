//! HTTP server implementation.

use std::any::Any;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::signal;
use log::{debug, info, warn, error};

use crate::parser::{HttpRequest, HttpVersion, Method, RequestDecoder};
use crate::server::config::ServerConfig;
use crate::server::error::Error;
use crate::server::handler::{HandlerFuture, PathPattern, Route};
use crate::server::response::{HttpResponse, StatusCode};

/// Upper bound on writing a 503 to a client turned away at the connection limit.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// An HTTP server.
pub struct HttpServer {
    /// The server configuration.
    pub config: ServerConfig,
    /// The routes.
    pub routes: Arc<RwLock<Vec<Route>>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add a route to the server.
    ///
    /// `path` may contain `{name}` segments; their values are available to the
    /// handler through [`HttpRequest::param`].
    pub async fn add_route<F, Fut>(&self, path: impl Into<String>, methods: Vec<Method>, handler: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        let handler = Arc::new(move |req: HttpRequest| -> HandlerFuture { Box::pin(handler(req)) });

        let route = Route {
            path: PathPattern::new(path),
            methods,
            handler,
        };

        self.routes.write().await.push(route);
    }

    /// Display the server banner and registered endpoints.
    async fn display_server_info(&self) {
        let banner = include_str!("banner.txt");
        info!("\n{banner}");

        let routes = self.routes.read().await;
        info!("Registered endpoints:");
        for route in routes.iter() {
            let methods = route.methods.iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            info!("  {methods} {path}", path = route.path.as_str());
        }
    }

    /// Bind the TCP listener to the configured address.
    async fn setup_listener(&self) -> Result<TcpListener, Error> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        info!("Server listening on http://{addr}", addr = listener.local_addr()?);
        Ok(listener)
    }

    /// Start the server on the configured address and serve until Ctrl+C.
    pub async fn start(&self) -> Result<(), Error> {
        let listener = self.setup_listener().await?;

        self.serve_with_shutdown(listener, async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
                Err(e) => {
                    error!("Error setting up Ctrl+C handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
    }

    /// Serve connections from `listener` until `shutdown` completes, then wait
    /// for in-flight connections up to the configured shutdown timeout.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        self.display_server_info().await;

        // Limits concurrent connections; each connection task holds one permit
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let config = Arc::new(self.config.clone());
        let mut tasks = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server...");
                    break;
                }

                // Reap finished connections so the set does not grow unbounded
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!("Connection task failed: {e}");
                    }
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((socket, addr)) => {
                            Self::handle_new_connection(
                                socket,
                                addr,
                                semaphore.clone(),
                                self.routes.clone(),
                                config.clone(),
                                &mut tasks,
                            );
                        }
                        Err(e) => Self::handle_accept_error(e).await,
                    }
                }
            }
        }

        Self::perform_shutdown(&mut tasks, self.config.shutdown_timeout).await;

        Ok(())
    }

    /// Handle a new connection. Never waits on the socket: both the 503 for
    /// clients over the limit and regular serving run in spawned tasks.
    fn handle_new_connection(
        mut socket: TcpStream,
        addr: SocketAddr,
        semaphore: Arc<Semaphore>,
        routes: Arc<RwLock<Vec<Route>>>,
        config: Arc<ServerConfig>,
        tasks: &mut JoinSet<()>,
    ) {
        let permit = match semaphore.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Connection limit reached, rejecting connection from {addr}");
                tasks.spawn(async move {
                    let response = HttpResponse::new(StatusCode::ServiceUnavailable)
                        .with_header("Connection", "close")
                        .with_content_type("text/plain; charset=utf-8")
                        .with_body_string("Server is at capacity, please try again later");
                    match tokio::time::timeout(REJECT_WRITE_TIMEOUT, response.write_to(&mut socket)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("Could not send 503 to {addr}: {e}"),
                        Err(_) => debug!("Gave up sending 503 to {addr} after {REJECT_WRITE_TIMEOUT:?}"),
                    }
                });
                return;
            }
        };

        if let Err(e) = socket.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {addr}: {e}");
        }

        tasks.spawn(async move {
            // The permit is dropped when the task completes, releasing the semaphore slot
            let _permit = permit;
            debug!("Connection from {addr}");

            match Self::handle_connection(&mut socket, addr, routes, &config).await {
                Ok(()) => debug!("Connection from {addr} closed"),
                Err(Error::IoError(e)) if is_disconnect(&e) => {
                    debug!("Client {addr} went away: {e}");
                }
                Err(e) => warn!("Error handling connection from {addr}: {e}"),
            }
        });
    }

    /// Accept errors (e.g. file descriptor exhaustion) are never fatal; back off and retry.
    async fn handle_accept_error(e: std::io::Error) {
        error!("Error accepting connection: {e}");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Perform graceful shutdown.
    async fn perform_shutdown(tasks: &mut JoinSet<()>, timeout: Duration) {
        info!("Waiting for {len} active connections to complete...", len = tasks.len());

        let drained = tokio::time::timeout(timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Aborting {len} connections still open after {timeout:?}", len = tasks.len());
            tasks.abort_all();
        }

        info!("Server shutdown complete");
    }

    /// Serve requests on a single connection.
    ///
    /// Requests are read incrementally and answered in order. The loop ends when
    /// the peer closes the connection or stays silent for the idle timeout, when
    /// keep-alive does not apply, or after a request that cannot be parsed (400)
    /// or is too large (413). Every answered request is logged at info level.
    pub async fn handle_connection(
        socket: &mut (impl AsyncRead + AsyncWrite + Unpin),
        peer: SocketAddr,
        routes: Arc<RwLock<Vec<Route>>>,
        config: &ServerConfig,
    ) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(config.read_buffer_size);
        let mut chunk = vec![0; config.read_buffer_size];
        let mut decoder = RequestDecoder::new();

        loop {
            let request = loop {
                match decoder.decode(&buf) {
                    Ok(Some((request, consumed))) => {
                        buf.drain(..consumed);
                        break request;
                    }
                    Ok(None) => {
                        // A declared body past the limit is refused before it is read
                        let declared = decoder.declared_len().unwrap_or(0);
                        if buf.len() >= config.max_request_size || declared > config.max_request_size {
                            return Self::reject(socket, Error::RequestTooLarge(config.max_request_size)).await;
                        }

                        let n = match tokio::time::timeout(config.idle_timeout, socket.read(&mut chunk)).await {
                            Ok(read) => read?,
                            Err(_) => {
                                debug!("Closing connection from {peer} after {idle:?} idle", idle = config.idle_timeout);
                                return Ok(());
                            }
                        };
                        if n == 0 {
                            if !buf.is_empty() {
                                debug!("Peer closed with {len} bytes of partial request", len = buf.len());
                            }
                            return Ok(()); // Connection closed
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    Err(e) => return Self::reject(socket, Error::ParseError(e)).await,
                }
            };

            let keep_alive = config.keep_alive && request.keep_alive();
            let version = request.version;
            let method = request.method;
            let target = request.target.clone();
            let started = Instant::now();

            let response = match Self::dispatch(&routes, request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("{method} {target} failed: {e}");
                    e.to_response()
                }
            };
            info!("{}", access_log(peer, method, &target, response.status, started.elapsed()));

            let response = match (keep_alive, version) {
                (false, _) => response.with_header("Connection", "close"),
                (true, HttpVersion::Http10) => response.with_header("Connection", "keep-alive"),
                (true, HttpVersion::Http11) => response,
            };
            response.write_to(socket).await?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    /// Route `request` to the matching handler.
    ///
    /// Fails with [`Error::NotFound`] when no pattern matches the path and with
    /// [`Error::MethodNotAllowed`] when a pattern matches but the method does not.
    /// A panicking handler is reported as [`Error::InternalError`].
    pub async fn dispatch(routes: &RwLock<Vec<Route>>, mut request: HttpRequest) -> Result<HttpResponse, Error> {
        let handler = {
            let routes = routes.read().await;
            let mut allowed: Vec<Method> = Vec::new();
            let mut found = None;

            for route in routes.iter() {
                let Some(params) = route.path.matches(&request.path) else {
                    continue;
                };
                if route.methods.contains(&request.method) {
                    found = Some((route.handler.clone(), params));
                    break;
                }
                for method in &route.methods {
                    if !allowed.contains(method) {
                        allowed.push(*method);
                    }
                }
            }

            match found {
                Some((handler, params)) => {
                    request.path_params = params;
                    handler
                }
                None if allowed.is_empty() => return Err(Error::NotFound(request.path)),
                None => return Err(Error::MethodNotAllowed(request.method, request.path, allowed)),
            }
        };

        // The route table lock is released before the handler runs
        let method = request.method;
        let path = request.path.clone();
        match AssertUnwindSafe(async move { handler(request).await }).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Handler for {method} {path} panicked: {message}");
                Err(Error::InternalError(message))
            }
        }
    }

    /// Answer with the error's response, close the connection and report the error.
    async fn reject(socket: &mut (impl AsyncWrite + Unpin), error: Error) -> Result<(), Error> {
        error
            .to_response()
            .with_header("Connection", "close")
            .write_to(socket)
            .await?;
        Err(error)
    }
}

/// One access log line: `peer "METHOD target" status latency`.
pub(crate) fn access_log(peer: SocketAddr, method: Method, target: &str, status: StatusCode, latency: Duration) -> String {
    format!("{peer} \"{method} {target}\" {status} {latency:?}", status = status.as_u16())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
    )
}
