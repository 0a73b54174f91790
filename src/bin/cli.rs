//! muxwire CLI Client
//!
//! Sends payloads to a muxwire server through a client pool and prints the
//! replies.

use std::process;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use muxwire::{ClientConfig, Context, Pool, PoolConfig};

/// muxwire CLI
#[derive(Parser, Debug)]
#[command(name = "muxwire-cli")]
#[command(about = "Send framed requests to a muxwire server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7714")]
    server: String,

    /// Number of pooled connections
    #[arg(short, long, default_value = "1")]
    concurrency: usize,

    /// Times each payload is sent
    #[arg(short = 'n', long, default_value = "1")]
    count: usize,

    /// Per-request deadline (milliseconds)
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    /// Payloads to send
    #[arg(required = true)]
    payloads: Vec<String>,
}

fn main() {
    muxwire::logging::init("warn");

    let args = Args::parse();

    let pool = match Pool::dial_addr(
        &args.server,
        ClientConfig::default(),
        PoolConfig::new(args.concurrency.max(1)),
    ) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(2);
        }
    };

    let timeout = Duration::from_millis(args.timeout_ms);
    let jobs: Vec<String> = args
        .payloads
        .iter()
        .flat_map(|p| std::iter::repeat(p.clone()).take(args.count))
        .collect();

    let workers: Vec<_> = jobs
        .into_iter()
        .map(|payload| {
            let pool = pool.clone();
            thread::spawn(move || -> muxwire::Result<(String, Bytes)> {
                let ctx = Context::with_timeout(timeout);
                let client = pool.take(&ctx)?;
                let reply = client.send(&ctx, payload.clone().into_bytes());
                client.close()?;
                reply.map(|body| (payload, body))
            })
        })
        .collect();

    let mut failures = 0;
    for worker in workers {
        match worker.join() {
            Ok(Ok((payload, body))) => {
                println!("{} -> {}", payload, String::from_utf8_lossy(&body));
            }
            Ok(Err(e)) => {
                failures += 1;
                eprintln!("error: {}", e);
            }
            Err(_) => {
                failures += 1;
                eprintln!("error: worker panicked");
            }
        }
    }

    let status = pool.status();
    eprintln!(
        "pool: limit={} in_use={} idle={} waiters={}",
        status.limit, status.in_use, status.idle, status.waiters
    );
    if let Err(e) = pool.close() {
        eprintln!("error closing pool: {}", e);
    }

    if failures > 0 {
        process::exit(1);
    }
}
