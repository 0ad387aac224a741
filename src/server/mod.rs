//! HTTP server: accept loop, keep-alive connections and pattern routing.

mod response;
mod config;
mod error;
mod handler;
mod http_server;
mod tests;

// Re-export public items
pub use response::{HttpResponse, StatusCode, SERVER_NAME};
pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::Error;
pub use handler::{HandlerFn, HandlerFuture, PathPattern, Route};
pub use http_server::HttpServer;
