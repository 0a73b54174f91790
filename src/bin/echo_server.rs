//! muxwire Echo Server
//!
//! Serves the framed protocol and answers every request with its own
//! payload. Handy as a smoke-test peer for clients.

use bytes::Bytes;
use clap::Parser;
use muxwire::{ConnContext, HandlerResult, Server, ServerConfig};

/// muxwire echo server
#[derive(Parser, Debug)]
#[command(name = "muxwire-echo")]
#[command(about = "Echo server for the muxwire frame protocol")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7714")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Largest accepted payload in bytes
    #[arg(long, default_value = "16777216")]
    max_frame_size: u32,

    /// Drain deadline on shutdown (milliseconds)
    #[arg(long, default_value = "5000")]
    close_timeout_ms: u64,

    /// Idle read deadline per connection (milliseconds, 0 = none)
    #[arg(long, default_value = "0")]
    read_timeout_ms: u64,

    /// Payloads starting with this prefix are answered with an error
    #[arg(long)]
    fail_prefix: Option<String>,
}

fn main() {
    muxwire::logging::init("info,muxwire=debug");

    let args = Args::parse();

    tracing::info!("muxwire echo server v{}", muxwire::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    let config = ServerConfig::builder()
        .max_connections(args.max_connections)
        .max_frame_size(args.max_frame_size)
        .close_timeout_ms(args.close_timeout_ms)
        .read_timeout_ms(args.read_timeout_ms)
        .on_connected(|ctx| tracing::info!(peer = %ctx.peer_addr(), "Client connected"))
        .on_disconnected(|ctx| tracing::info!(peer = %ctx.peer_addr(), "Client disconnected"))
        .build();

    let fail_prefix = args.fail_prefix.map(Bytes::from);
    let handler = move |_ctx: &ConnContext, payload: Bytes| -> HandlerResult {
        match &fail_prefix {
            Some(prefix) if payload.starts_with(prefix) => {
                Err(format!("rejected payload of {} bytes", payload.len()).into())
            }
            _ => Ok(payload),
        }
    };

    let server = Server::new(args.listen, handler, config);
    if let Err(e) = server.serve() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
