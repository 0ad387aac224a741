//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the server binds when none is given.
pub const DEFAULT_PORT: u16 = 8080;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address to bind to.
    pub addr: SocketAddr,
    /// The maximum number of concurrent connections.
    pub max_connections: usize,
    /// The read buffer size.
    pub read_buffer_size: usize,
    /// Largest request (head and body) buffered before answering 413.
    pub max_request_size: usize,
    /// Serve more than one request per connection when the client allows it.
    pub keep_alive: bool,
    /// How long shutdown waits for in-flight connections.
    pub shutdown_timeout: Duration,
    /// How long a connection may sit without sending a byte before it is closed.
    pub idle_timeout: Duration,
}

impl ServerConfig {
    /// Default configuration bound to `addr`.
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 1024,
            read_buffer_size: 8192,
            max_request_size: 16 * 1024 * 1024,
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}
