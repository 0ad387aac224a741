//! The benchmark endpoints.
//!
//! | Method | Path          | Response                                   |
//! |--------|---------------|--------------------------------------------|
//! | GET    | `/ping`       | `OK`                                       |
//! | GET    | `/delay/{ms}` | `Delayed response`, after `ms` milliseconds |
//! | GET    | `/size/{kb}`  | `kb * 1024` zero bytes                     |
//! | POST   | `/echo`       | the JSON request body                      |
//!
//! Malformed parameters and bodies are answered with 400 Bad Request.

mod error;
mod handlers;

pub use error::BenchError;
pub use handlers::{delay, echo, ping, size};

use crate::parser::Method;
use crate::server::{HttpServer, ServerConfig};

/// Limits applied by the benchmark endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    /// Largest payload `/size/{kb}` produces, in kilobytes.
    pub max_size_kb: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            max_size_kb: 1024 * 1024,
        }
    }
}

/// Register the four benchmark routes on `server`.
pub async fn register_routes(server: &HttpServer, config: BenchConfig) {
    server.add_route("/ping", vec![Method::GET], ping).await;
    server.add_route("/delay/{ms}", vec![Method::GET], delay).await;

    let max_kb = config.max_size_kb;
    server
        .add_route("/size/{kb}", vec![Method::GET], move |req| size(req, max_kb))
        .await;

    server.add_route("/echo", vec![Method::POST], echo).await;
}

/// A server with the benchmark routes registered.
pub async fn bench_server(config: ServerConfig, bench: BenchConfig) -> HttpServer {
    let server = HttpServer::new(config);
    register_routes(&server, bench).await;
    server
}
