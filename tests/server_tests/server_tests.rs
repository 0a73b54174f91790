//! Tests for the Server
//!
//! These tests verify:
//! - Status reporting and lifecycle errors
//! - Admission bound on concurrent connections
//! - Hooks and panic isolation
//! - Protocol violations from clients
//! - Graceful drain and the drain deadline

#[path = "../common/mod.rs"]
mod common;

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel;
use muxwire::error::{ErrorKind, WireError};
use muxwire::protocol::{read_frame, write_frame, Frame};
use muxwire::{Client, ClientConfig, ConnContext, Context, HandlerResult, Server, ServerConfig};

use common::{echo, echo_server, start, wait_until};

// =============================================================================
// Helper Functions
// =============================================================================

fn open(addr: &str) -> Client {
    Client::open(addr, &ClientConfig::default()).unwrap()
}

fn raw_conn(addr: &str) -> (BufReader<TcpStream>, TcpStream) {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    (BufReader::new(stream.try_clone().unwrap()), stream)
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_status_tracks_connections() {
    let (server, handle, addr) = echo_server(ServerConfig::default());

    let status = server.status();
    assert!(status.serving);
    assert!(!status.closed);
    assert_eq!(status.connected, 0);

    let clients: Vec<Client> = (0..3).map(|_| open(&addr)).collect();
    for client in &clients {
        client.send(&Context::background(), "ping").unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || server.status().connected == 3));

    drop(clients);
    assert!(wait_until(Duration::from_secs(2), || server.status().connected == 0));

    server.close().unwrap();
    handle.join().unwrap();

    let status = server.status();
    assert!(!status.serving);
    assert!(status.closed);
}

#[test]
fn test_serve_twice_is_rejected() {
    let (server, handle, _addr) = echo_server(ServerConfig::default());

    let err = server.serve().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_close_before_serve() {
    let server = Server::new("127.0.0.1:0", echo, ServerConfig::default());

    server.close().unwrap();
    server.close().unwrap();

    let err = server.serve().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerClosed);
    assert!(matches!(server.spawn(), Err(WireError::ServerClosed)));
    assert!(server.local_addr().is_none());
}

#[test]
fn test_close_is_idempotent_while_serving() {
    let (server, handle, _addr) = echo_server(ServerConfig::default());

    server.close().unwrap();
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_invalid_config_rejected() {
    let config = ServerConfig::builder().max_connections(0).build();
    let server = Server::new("127.0.0.1:0", echo, config);

    let err = server.serve().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!server.status().serving);

    let config = ServerConfig::builder().accept_poll_interval_ms(0).build();
    let server = Server::new("127.0.0.1:0", echo, config);
    assert!(matches!(server.spawn(), Err(WireError::Config(_))));
}

#[test]
fn test_bind_failure_reported() {
    let (server, handle, addr) = echo_server(ServerConfig::default());

    let second = Server::new(addr, echo, ServerConfig::default());
    let err = second.spawn().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!second.status().serving);

    server.close().unwrap();
    handle.join().unwrap();
}

// =============================================================================
// Admission Tests
// =============================================================================

#[test]
fn test_admission_bounds_concurrent_connections() {
    let config = ServerConfig::builder().max_connections(2).build();
    let (server, handle, addr) = echo_server(config);

    let first = open(&addr);
    let second = open(&addr);
    first.send(&Context::background(), "1").unwrap();
    second.send(&Context::background(), "2").unwrap();

    // Connects at the TCP level but is not admitted while both tokens are held.
    let third = open(&addr);
    let err = third
        .send_timeout("3", Duration::from_millis(200))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(server.status().connected, 2);

    first.close().unwrap();

    let reply = third
        .send_timeout("3", Duration::from_secs(5))
        .unwrap();
    assert_eq!(&reply[..], b"3");
    assert!(server.status().connected <= 2);

    drop(second);
    drop(third);
    server.close().unwrap();
    handle.join().unwrap();
}

// =============================================================================
// Hook and Handler Tests
// =============================================================================

#[derive(Default)]
struct Counters {
    before_serving: AtomicUsize,
    after_serving: AtomicUsize,
    after_closing: AtomicUsize,
    connected: AtomicUsize,
    disconnected: AtomicUsize,
    before_handling: AtomicUsize,
    after_handling: AtomicUsize,
}

#[test]
fn test_hooks_fire_at_lifecycle_points() {
    let counters = Arc::new(Counters::default());

    let c = Arc::clone(&counters);
    let config = ServerConfig::builder().before_serving(move || {
        c.before_serving.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.after_serving(move || {
        c.after_serving.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.after_closing(move || {
        c.after_closing.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.on_connected(move |_| {
        c.connected.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.on_disconnected(move |_| {
        c.disconnected.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.before_handling(move |_| {
        c.before_handling.fetch_add(1, Ordering::SeqCst);
    });
    let c = Arc::clone(&counters);
    let config = config.after_handling(move |_| {
        c.after_handling.fetch_add(1, Ordering::SeqCst);
    });

    let (server, handle, addr) = echo_server(config.build());
    assert!(wait_until(Duration::from_secs(1), || {
        counters.before_serving.load(Ordering::SeqCst) == 1
    }));

    for _ in 0..2 {
        let client = open(&addr);
        client.send(&Context::background(), "hi").unwrap();
        client.close().unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || {
        counters.disconnected.load(Ordering::SeqCst) == 2
    }));

    server.close().unwrap();
    handle.join().unwrap();

    assert_eq!(counters.before_serving.load(Ordering::SeqCst), 1);
    assert_eq!(counters.after_serving.load(Ordering::SeqCst), 1);
    assert_eq!(counters.after_closing.load(Ordering::SeqCst), 1);
    assert_eq!(counters.connected.load(Ordering::SeqCst), 2);
    assert_eq!(counters.before_handling.load(Ordering::SeqCst), 2);
    assert_eq!(counters.after_handling.load(Ordering::SeqCst), 2);
}

#[test]
fn test_handler_sees_connection_details() {
    let handler = |ctx: &ConnContext, _payload: Bytes| -> HandlerResult {
        Ok(Bytes::from(format!("{}|{}", ctx.id(), ctx.peer_addr())))
    };
    let server = Server::new("127.0.0.1:0", handler, ServerConfig::default());
    let (handle, addr) = start(&server);

    let client = open(&addr);
    let reply = client.send(&Context::background(), "who").unwrap();
    let text = String::from_utf8(reply.to_vec()).unwrap();
    let (id, peer) = text.split_once('|').unwrap();

    assert!(id.parse::<u64>().unwrap() >= 1);
    assert_eq!(peer, client.local_addr().to_string());

    client.close().unwrap();
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_panicking_handler_only_kills_its_connection() {
    let handler = |_ctx: &ConnContext, payload: Bytes| -> HandlerResult {
        if &payload[..] == b"panic" {
            panic!("handler exploded");
        }
        Ok(payload)
    };
    let server = Server::new("127.0.0.1:0", handler, ServerConfig::default());
    let (handle, addr) = start(&server);

    let healthy = open(&addr);
    let doomed = open(&addr);

    let err = doomed.send(&Context::background(), "panic").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientClosed);

    let reply = healthy.send(&Context::background(), "still here").unwrap();
    assert_eq!(&reply[..], b"still here");
    assert!(wait_until(Duration::from_secs(2), || server.status().connected == 1));

    let fresh = open(&addr);
    assert_eq!(&fresh.send(&Context::background(), "new").unwrap()[..], b"new");

    drop(healthy);
    drop(fresh);
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_oversize_response_becomes_error() {
    let handler = |_ctx: &ConnContext, _payload: Bytes| -> HandlerResult {
        Ok(Bytes::from(vec![0u8; 64]))
    };
    let config = ServerConfig::builder().max_frame_size(16).build();
    let server = Server::new("127.0.0.1:0", handler, config);
    let (handle, addr) = start(&server);

    let client = open(&addr);
    let err = client.send(&Context::background(), "x").unwrap_err();
    // The notice itself is cut to the 16-byte limit.
    assert!(matches!(err, WireError::Remote(ref msg) if msg == "response too lar"));
    assert!(!client.is_closed());

    // The connection survives; the next oversize reply fails the same way.
    let err = client.send(&Context::background(), "y").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Remote);

    client.close().unwrap();
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_oversize_response_truncated_notice() {
    let handler = |_ctx: &ConnContext, _payload: Bytes| -> HandlerResult {
        Ok(Bytes::from(vec![0u8; 64]))
    };
    let config = ServerConfig::builder().max_frame_size(4).build();
    let server = Server::new("127.0.0.1:0", handler, config);
    let (handle, addr) = start(&server);

    let client = open(&addr);
    let err = client.send(&Context::background(), "x").unwrap_err();
    assert!(matches!(err, WireError::Remote(ref msg) if msg == "resp"));
    assert!(!client.is_closed());

    client.close().unwrap();
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_long_handler_error_is_truncated() {
    let handler = |_ctx: &ConnContext, _payload: Bytes| -> HandlerResult {
        Err("this handler error message is far longer than the frame limit".into())
    };
    let config = ServerConfig::builder().max_frame_size(16).build();
    let server = Server::new("127.0.0.1:0", handler, config);
    let (handle, addr) = start(&server);

    let client = open(&addr);
    for _ in 0..2 {
        let err = client.send(&Context::background(), "x").unwrap_err();
        assert!(matches!(err, WireError::Remote(ref msg) if msg == "this handler err"));
        assert!(!client.is_closed());
    }

    client.close().unwrap();
    server.close().unwrap();
    handle.join().unwrap();
}

// =============================================================================
// Protocol Violation Tests
// =============================================================================

#[test]
fn test_client_error_frame_gets_error_reply() {
    let (server, handle, addr) = echo_server(ServerConfig::default());
    let (mut reader, mut writer) = raw_conn(&addr);

    write_frame(&mut writer, &Frame::error(5, "client side failure")).unwrap();
    let reply = read_frame(&mut reader).unwrap();
    assert_eq!(reply.sequence(), 5);
    assert!(reply.is_error());

    // The connection keeps serving afterwards.
    write_frame(&mut writer, &Frame::request(6, "after")).unwrap();
    let reply = read_frame(&mut reader).unwrap();
    assert_eq!(reply.sequence(), 6);
    assert!(!reply.is_error());
    assert_eq!(&reply.payload[..], b"after");

    drop(writer);
    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_wrong_magic_closes_connection() {
    let (server, handle, addr) = echo_server(ServerConfig::default());
    let (mut reader, mut writer) = raw_conn(&addr);

    let mut bogus = vec![0u8; 8];
    bogus.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    bogus.extend_from_slice(&[0u8; 12]);
    writer.write_all(&bogus).unwrap();

    // No reply; the server just hangs up.
    let mut rest = Vec::new();
    let read = reader.read_to_end(&mut rest);
    assert!(rest.is_empty());
    assert!(read.is_ok() || read.unwrap_err().kind() == std::io::ErrorKind::ConnectionReset);
    assert!(wait_until(Duration::from_secs(2), || server.status().connected == 0));

    server.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn test_oversize_request_closes_connection() {
    let config = ServerConfig::builder().max_frame_size(8).build();
    let (server, handle, addr) = echo_server(config);

    let client = open(&addr);
    let err = client.send(&Context::background(), "much longer than eight").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientClosed);

    server.close().unwrap();
    handle.join().unwrap();
}

// =============================================================================
// Drain Tests
// =============================================================================

#[test]
fn test_drain_closes_idle_connections() {
    let (server, handle, addr) = echo_server(ServerConfig::default());

    let clients: Vec<Client> = (0..4).map(|_| open(&addr)).collect();
    for client in &clients {
        client.send(&Context::background(), "warm").unwrap();
    }

    let started = Instant::now();
    server.close().unwrap();
    handle.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(server.status().connected, 0);

    for client in &clients {
        assert!(wait_until(Duration::from_secs(2), || client.is_closed()));
    }
}

#[test]
fn test_inflight_request_completes_during_drain() {
    let (started_tx, started_rx) = channel::bounded(1);
    let handler = move |_ctx: &ConnContext, payload: Bytes| -> HandlerResult {
        let _ = started_tx.try_send(());
        thread::sleep(Duration::from_millis(200));
        Ok(payload)
    };
    let server = Server::new("127.0.0.1:0", handler, ServerConfig::default());
    let (handle, addr) = start(&server);

    let client = Arc::new(open(&addr));
    let pending = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send(&Context::background(), "slow"))
    };

    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    server.close().unwrap();

    let reply = pending.join().unwrap().unwrap();
    assert_eq!(&reply[..], b"slow");
    handle.join().unwrap();
}

#[test]
fn test_handler_observes_shutdown() {
    let handler = |ctx: &ConnContext, _payload: Bytes| -> HandlerResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ctx.is_shutting_down() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(Bytes::from_static(b"stopping"))
    };
    let server = Server::new("127.0.0.1:0", handler, ServerConfig::default());
    let (handle, addr) = start(&server);

    let client = Arc::new(open(&addr));
    let pending = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send(&Context::background(), "wait"))
    };
    assert!(wait_until(Duration::from_secs(2), || client.inflight_len() == 1));
    thread::sleep(Duration::from_millis(50));

    server.close().unwrap();
    let reply = pending.join().unwrap().unwrap();
    assert_eq!(&reply[..], b"stopping");
    handle.join().unwrap();
}

#[test]
fn test_drain_deadline_reports_close_timeout() {
    let (started_tx, started_rx) = channel::bounded(1);
    let handler = move |_ctx: &ConnContext, payload: Bytes| -> HandlerResult {
        let _ = started_tx.try_send(());
        thread::sleep(Duration::from_millis(1500));
        Ok(payload)
    };
    let config = ServerConfig::builder().close_timeout_ms(100).build();
    let server = Server::new("127.0.0.1:0", handler, config);
    let (handle, addr) = start(&server);

    let client = Arc::new(open(&addr));
    let pending = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send(&Context::background(), "stuck"))
    };
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let started = Instant::now();
    let err = server.close().unwrap_err();
    assert!(matches!(err, WireError::CloseTimeout { remaining: 1 }));
    assert!(started.elapsed() < Duration::from_millis(1000));

    let err = handle.join().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CloseTimeout);

    let _ = pending.join().unwrap();
}

#[test]
fn test_connection_after_close_is_refused() {
    let (server, handle, addr) = echo_server(ServerConfig::default());
    server.close().unwrap();
    handle.join().unwrap();

    let mut attempt = TcpStream::connect(&addr);
    if let Ok(stream) = attempt.as_mut() {
        // Some stacks accept into a dying backlog; the stream must be dead.
        stream
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert!(!matches!(stream.read(&mut buf), Ok(n) if n > 0));
    }
}
