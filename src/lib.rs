//! A minimal HTTP server for benchmarking HTTP clients and load-testing tools.
//!
//! The server exposes four stateless endpoints whose responses are fully
//! determined by the request:
//!
//! - `GET /ping` answers `OK`
//! - `GET /delay/{ms}` answers after sleeping `ms` milliseconds
//! - `GET /size/{kb}` answers with `kb * 1024` bytes
//! - `POST /echo` answers with the JSON it was sent
//!
//! Every connection runs in its own tokio task, so a pending `/delay` never
//! holds up other clients.
//!
//! # Examples
//!
//! ## Running the server
//!
//! ```no_run
//! use bench_server::{bench_server, BenchConfig, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bench_server::ServerError> {
//!     let server = bench_server(ServerConfig::default(), BenchConfig::default()).await;
//!     server.start().await
//! }
//! ```
//!
//! ## Parsing a request
//!
//! ```
//! use bench_server::{parse_request, Method};
//!
//! let raw = b"GET /delay/20 HTTP/1.1\r\nHost: localhost\r\n\r\n";
//! let request = parse_request(raw).unwrap();
//! assert_eq!(request.method, Method::GET);
//! assert_eq!(request.path, "/delay/20");
//! ```

pub mod bench;
pub mod parser;
pub mod server;

// Re-export commonly used items for convenience
pub use bench::{bench_server, register_routes, BenchConfig, BenchError};
pub use parser::{Error as ParserError, HttpRequest, HttpVersion, Method, RequestDecoder, parse_frame, parse_request};
pub use server::{Error as ServerError, HttpResponse, HttpServer, ServerConfig, StatusCode};
