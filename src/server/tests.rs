//! Tests for the HTTP server implementation.

#[cfg(test)]
mod server_tests {
    use std::io::{self, Cursor};
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    use crate::parser::{HttpRequest, Method};
    use crate::server::{HttpServer, ServerConfig, HttpResponse, StatusCode, Error};
    use crate::server::http_server::access_log;

    // Mock TcpStream for testing; hands out at most `max_read` bytes per read
    struct MockTcpStream {
        read_data: Cursor<Vec<u8>>,
        write_data: Vec<u8>,
        max_read: usize,
    }

    impl MockTcpStream {
        fn new(read_data: Vec<u8>) -> Self {
            Self {
                read_data: Cursor::new(read_data),
                write_data: Vec::new(),
                max_read: usize::MAX,
            }
        }

        fn trickle(read_data: Vec<u8>, max_read: usize) -> Self {
            Self {
                max_read,
                ..Self::new(read_data)
            }
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.write_data).into_owned()
        }
    }

    impl AsyncRead for MockTcpStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let dst = buf.initialize_unfilled();
            let limit = dst.len().min(this.max_read);
            let n = std::io::Read::read(&mut this.read_data, &mut dst[..limit])?;
            buf.advance(n);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockTcpStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn test_server() -> HttpServer {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/test", vec![Method::GET], |_req| async {
            Ok(HttpResponse::new(StatusCode::Ok)
                .with_content_type("text/plain")
                .with_body_string("Test response"))
        }).await;
        server
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn serve(stream: &mut MockTcpStream, server: &HttpServer) -> Result<(), Error> {
        HttpServer::handle_connection(stream, peer(), server.routes.clone(), &server.config).await
    }

    fn get(path: &str) -> HttpRequest {
        crate::parser::parse_request(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            addr: "127.0.0.1:9090".parse().unwrap(),
            max_connections: 100,
            read_buffer_size: 4096,
            ..ServerConfig::default()
        };

        let server = HttpServer::new(config.clone());
        assert_eq!(server.config.addr, config.addr);
        assert_eq!(server.config.max_connections, 100);
        assert_eq!(server.config.read_buffer_size, 4096);
        assert!(server.config.keep_alive);
    }

    #[test]
    fn test_default_config_binds_port_8080() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8080);
        assert!(config.addr.ip().is_unspecified());
        assert_eq!(config.max_connections, 1024);
    }

    #[tokio::test]
    async fn test_add_route() {
        let server = test_server().await;

        let routes = server.routes.read().await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path.as_str(), "/test");
        assert_eq!(routes[0].methods, vec![Method::GET]);
    }

    #[tokio::test]
    async fn test_handle_connection_with_valid_request() {
        let mut stream = MockTcpStream::new(b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        let server = test_server().await;

        let result = serve(&mut stream, &server).await;

        assert!(result.is_ok());
        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/plain\r\n"));
        assert!(response.ends_with("Test response"));
    }

    #[tokio::test]
    async fn test_handle_connection_with_not_found() {
        let mut stream = MockTcpStream::new(b"GET /nonexistent HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        let server = test_server().await;

        // A 404 is answered without failing the connection
        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.contains("Not found: /nonexistent"));
    }

    #[tokio::test]
    async fn test_handle_connection_with_method_not_allowed() {
        let mut stream = MockTcpStream::new(b"POST /test HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        let server = test_server().await;

        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(response.contains("Method POST not allowed for path: /test"));
        assert!(response.contains("Allow: GET\r\n"));
    }

    #[tokio::test]
    async fn test_handle_connection_with_invalid_request() {
        let mut stream = MockTcpStream::new(b"INVALID REQUEST\r\n\r\n".to_vec());
        let server = test_server().await;

        let result = serve(&mut stream, &server).await;

        assert!(matches!(result, Err(Error::ParseError(_))));
        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.contains("Parse error:"));
    }

    #[tokio::test]
    async fn test_dispatch_reports_routing_errors() {
        let server = test_server().await;

        let result = HttpServer::dispatch(&server.routes, get("/missing")).await;
        assert!(matches!(result, Err(Error::NotFound(ref p)) if p == "/missing"));

        let mut request = get("/test");
        request.method = Method::DELETE;
        let result = HttpServer::dispatch(&server.routes, request).await;
        match result {
            Err(Error::MethodNotAllowed(method, path, allowed)) => {
                assert_eq!(method, Method::DELETE);
                assert_eq!(path, "/test");
                assert_eq!(allowed, vec![Method::GET]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_fills_path_params() {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/items/{id}/parts/{part}", vec![Method::GET], |req| async move {
            let body = format!(
                "{}:{}",
                req.param("id").unwrap_or_default(),
                req.param("part").unwrap_or_default()
            );
            Ok(HttpResponse::new(StatusCode::Ok).with_body_string(body))
        }).await;

        let response = HttpServer::dispatch(&server.routes, get("/items/7/parts/wheel?x=1")).await.unwrap();
        assert_eq!(response.body, b"7:wheel");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_500() {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/boom", vec![Method::GET], |_req| async {
            Err(Error::InternalError("handler exploded".to_string()))
        }).await;

        let mut stream = MockTcpStream::new(b"GET /boom HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("Internal server error: handler exploded"));
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_500_and_connection_survives() {
        let server = test_server().await;
        server.add_route("/panic", vec![Method::GET], |_req| async {
            if true {
                panic!("handler blew up");
            }
            Ok(HttpResponse::new(StatusCode::Ok))
        }).await;

        let requests = b"GET /panic HTTP/1.1\r\nHost: localhost\r\n\r\n\
GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut stream = MockTcpStream::new(requests.to_vec());
        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("Internal server error: handler blew up"));
        assert!(response.contains("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("Test response"));
    }

    #[tokio::test]
    async fn test_dispatch_turns_panic_into_internal_error() {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/panic", vec![Method::GET], |req: HttpRequest| async move {
            if req.path.starts_with('/') {
                panic!("no handler for {}", req.path);
            }
            Ok(HttpResponse::new(StatusCode::Ok))
        }).await;

        let result = HttpServer::dispatch(&server.routes, get("/panic")).await;
        assert!(matches!(result, Err(Error::InternalError(ref m)) if m == "no handler for /panic"));
    }

    #[test]
    fn test_access_log_line() {
        let line = access_log(peer(), Method::GET, "/delay/5?x=1", StatusCode::Ok, Duration::from_millis(5));
        assert_eq!(line, "127.0.0.1:40000 \"GET /delay/5?x=1\" 200 5ms");
    }

    #[tokio::test]
    async fn test_multiple_routes() {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/route1", vec![Method::GET], |_req| async {
            Ok(HttpResponse::new(StatusCode::Ok).with_body_string("Route 1"))
        }).await;
        server.add_route("/route1", vec![Method::POST], |_req| async {
            Ok(HttpResponse::new(StatusCode::Ok).with_body_string("Route 1 post"))
        }).await;

        let mut stream = MockTcpStream::new(b"POST /route1 HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec());
        assert!(serve(&mut stream, &server).await.is_ok());
        assert!(stream.written().ends_with("Route 1 post"));

        // Allowed methods are collected across routes sharing a path
        let mut request = get("/route1");
        request.method = Method::PUT;
        match HttpServer::dispatch(&server.routes, request).await {
            Err(Error::MethodNotAllowed(_, _, allowed)) => {
                assert_eq!(allowed, vec![Method::GET, Method::POST]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keep_alive_serves_several_requests() {
        let requests = b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n\
GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n\
GET /missing HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut stream = MockTcpStream::new(requests.to_vec());
        let server = test_server().await;

        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert_eq!(response.matches("HTTP/1.1 404 Not Found\r\n").count(), 1);
        assert!(!response.contains("Connection: close"));
    }

    #[tokio::test]
    async fn test_connection_close_stops_after_response() {
        let requests = b"GET /test HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n\
GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut stream = MockTcpStream::new(requests.to_vec());
        let server = test_server().await;

        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 1);
        assert!(response.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_http10_closes_by_default() {
        let requests = b"GET /test HTTP/1.0\r\n\r\nGET /test HTTP/1.0\r\n\r\n";
        let mut stream = MockTcpStream::new(requests.to_vec());
        let server = test_server().await;

        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert_eq!(response.matches("200 OK").count(), 1);
        assert!(response.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_keep_alive_disabled_in_config() {
        let requests = b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\nGET /test HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut stream = MockTcpStream::new(requests.to_vec());
        let mut server = test_server().await;
        server.config.keep_alive = false;

        assert!(serve(&mut stream, &server).await.is_ok());
        assert_eq!(stream.written().matches("200 OK").count(), 1);
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let server = HttpServer::new(ServerConfig::default());
        server.add_route("/echo", vec![Method::POST], |req| async move {
            Ok(HttpResponse::new(StatusCode::Ok).with_body_bytes(req.body))
        }).await;

        let request = b"POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 11\r\n\r\nhello world";
        let mut stream = MockTcpStream::trickle(request.to_vec(), 3);

        assert!(serve(&mut stream, &server).await.is_ok());

        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nhello world"));
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let mut server = test_server().await;
        server.config.max_request_size = 64;
        server.config.read_buffer_size = 16;

        let mut request = b"POST /test HTTP/1.1\r\nHost: localhost\r\nContent-Length: 500\r\n\r\n".to_vec();
        request.extend(std::iter::repeat(b'x').take(500));
        let mut stream = MockTcpStream::new(request);

        let result = serve(&mut stream, &server).await;

        assert!(matches!(result, Err(Error::RequestTooLarge(64))));
        let response = stream.written();
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(response.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_partial_request_then_eof_is_not_an_error() {
        let mut stream = MockTcpStream::new(b"GET /test HTTP/1.1\r\nHost: loc".to_vec());
        let server = test_server().await;

        assert!(serve(&mut stream, &server).await.is_ok());
        assert!(stream.written().is_empty());
    }

    #[tokio::test]
    async fn test_declared_body_over_limit_is_rejected_before_it_arrives() {
        let mut server = test_server().await;
        server.config.max_request_size = 1024;

        // Only the head is sent; the body would never fit
        let mut stream = MockTcpStream::new(
            b"POST /test HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000000\r\n\r\n".to_vec(),
        );

        let result = serve(&mut stream, &server).await;

        assert!(matches!(result, Err(Error::RequestTooLarge(1024))));
        assert!(stream.written().starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_large_unterminated_head_is_rejected_quickly() {
        let mut server = test_server().await;
        server.config.max_request_size = 4 * 1024 * 1024;

        let mut request = b"GET /test HTTP/1.1\r\nHost: localhost\r\nX-Filler: ".to_vec();
        request.extend(std::iter::repeat(b'a').take(5 * 1024 * 1024));
        let mut stream = MockTcpStream::new(request);

        let started = Instant::now();
        let result = serve(&mut stream, &server).await;

        assert!(matches!(result, Err(Error::RequestTooLarge(_))));
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_idle_keep_alive_connection_is_closed() {
        let mut server = test_server().await;
        server.config.idle_timeout = Duration::from_millis(50);

        let (mut client, mut socket) = tokio::io::duplex(4096);
        let routes = server.routes.clone();
        let config = server.config.clone();
        let handle = tokio::spawn(async move {
            HttpServer::handle_connection(&mut socket, peer(), routes, &config).await
        });

        client.write_all(b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();

        // The client keeps its end open but sends nothing more
        let mut response = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_string(&mut response)).await;
        assert!(read.is_ok(), "connection was not closed");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    async fn spawn_server(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), Error>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = HttpServer::new(config);
        server.add_route("/test", vec![Method::GET], |_req| async {
            Ok(HttpResponse::new(StatusCode::Ok).with_body_string("Test response"))
        }).await;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve_with_shutdown(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        (addr, shutdown_tx, handle)
    }

    #[tokio::test]
    async fn test_serve_over_tcp_and_shutdown() {
        let (addr, shutdown_tx, handle) = spawn_server(ServerConfig::default()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /test HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("Test response"));

        shutdown_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_connection_limit_answers_503() {
        let config = ServerConfig {
            max_connections: 1,
            ..ServerConfig::default()
        };
        let (addr, shutdown_tx, handle) = spawn_server(config).await;

        // The first client holds the only permit on an idle keep-alive connection
        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0; 1024];
        let n = first.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK\r\n"));

        // Rejected clients that never read must not hold up the accept loop
        let _silent = TcpStream::connect(addr).await.unwrap();

        for _ in 0..2 {
            let mut rejected = TcpStream::connect(addr).await.unwrap();
            let mut response = String::new();
            tokio::time::timeout(Duration::from_secs(5), rejected.read_to_string(&mut response))
                .await
                .unwrap()
                .unwrap();

            assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
            assert!(response.contains("Server is at capacity, please try again later"));
        }

        // The first connection is still served
        first
            .write_all(b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let n = first.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK\r\n"));

        drop(first);
        shutdown_tx.send(()).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
}
