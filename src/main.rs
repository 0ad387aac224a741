use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use log::info;

use bench_server::server::DEFAULT_PORT;
use bench_server::{bench_server, BenchConfig, ServerConfig, ServerError};

/// HTTP server with fixed endpoints for benchmarking HTTP clients.
#[derive(Parser, Debug)]
#[command(name = "bench-server", version, about)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = ServerConfig::with_addr(SocketAddr::new(cli.host, cli.port));
    info!("Starting bench-server with {cli:?}");

    let server = bench_server(config, BenchConfig::default()).await;
    server.start().await
}
