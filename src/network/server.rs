//! TCP Server
//!
//! Accepts connections and runs each one on its own thread.
//!
//! ## Admission
//! A bounded channel holds `max_connections` tokens. The accept loop takes a
//! token before every `accept`, and the connection thread gives it back when
//! it exits, so the number of live connection threads never exceeds the
//! channel's capacity.
//!
//! ## Shutdown
//! `close` raises the shutdown signal. The accept loop notices it, drops the
//! listener and the token channel, then drains: the read half of every live
//! connection is shut down so idle handlers see EOF, and `serve` waits up to
//! `close_timeout` for the last connection thread to exit.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::config::{Hooks, ServerConfig};
use crate::context::{Context, Signal};
use crate::error::{Result, WireError};
use crate::network::connection::Connection;
use crate::network::handler::{ConnContext, Handler};
use crate::network::socket::SocketOptions;
use crate::protocol::FrameCodec;

/// Live view of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStatus {
    /// Connection threads currently running
    pub connected: usize,

    /// `serve` is running (accepting or draining)
    pub serving: bool,

    /// `close` has been called
    pub closed: bool,
}

/// Admission token; returned to the pool of tokens when dropped
struct Token {
    tx: Sender<()>,
}

impl Drop for Token {
    fn drop(&mut self) {
        // Fails only once the token channel is closed during drain.
        let _ = self.tx.try_send(());
    }
}

/// Result of waiting for an admission token
enum Admission {
    Granted,
    Retry,
    Stop,
}

/// How the last drain ended
#[derive(Debug, Clone, Copy)]
enum DrainOutcome {
    Complete,
    TimedOut { remaining: usize },
}

struct Shared {
    addr: String,
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    codec: FrameCodec,

    shutdown: Signal,
    bound: Signal,
    drained: Signal,

    serving: AtomicBool,
    connected: AtomicUsize,
    next_conn_id: AtomicU64,

    /// Clones of live streams, used to unblock readers during drain
    conns: Mutex<HashMap<u64, TcpStream>>,
    local_addr: Mutex<Option<SocketAddr>>,
    outcome: Mutex<Option<DrainOutcome>>,
}

/// TCP server dispatching framed requests to a [`Handler`]
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Create a server; no socket is opened until [`Server::serve`]
    pub fn new(addr: impl Into<String>, handler: impl Handler, config: ServerConfig) -> Self {
        let codec = FrameCodec::new(config.max_frame_size);
        Self {
            shared: Arc::new(Shared {
                addr: addr.into(),
                config,
                handler: Arc::new(handler),
                codec,
                shutdown: Signal::new(),
                bound: Signal::new(),
                drained: Signal::new(),
                serving: AtomicBool::new(false),
                connected: AtomicUsize::new(0),
                next_conn_id: AtomicU64::new(1),
                conns: Mutex::new(HashMap::new()),
                local_addr: Mutex::new(None),
                outcome: Mutex::new(None),
            }),
        }
    }

    /// Bind, accept until closed, then drain (blocking)
    ///
    /// Returns `CloseTimeout` when connection threads outlive the drain
    /// deadline.
    pub fn serve(&self) -> Result<()> {
        let shared = &self.shared;
        shared.config.validate()?;

        if shared.shutdown.is_fired() {
            return Err(WireError::ServerClosed);
        }
        if shared.serving.swap(true, Ordering::SeqCst) {
            return Err(WireError::Config("server is already serving".to_string()));
        }

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                shared.serving.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        Hooks::run(&shared.config.hooks.before_serving);

        let (alive_tx, alive_rx) = channel::bounded::<()>(0);
        self.accept_loop(&listener, &alive_tx);

        // No new admissions from here on.
        drop(listener);
        Hooks::run(&shared.config.hooks.after_serving);

        let outcome = self.drain(alive_tx, alive_rx);
        Hooks::run(&shared.config.hooks.after_closing);

        *shared.outcome.lock() = Some(outcome);
        shared.serving.store(false, Ordering::SeqCst);
        shared.drained.fire();

        match outcome {
            DrainOutcome::Complete => {
                tracing::info!(addr = %shared.addr, "Server stopped");
                Ok(())
            }
            DrainOutcome::TimedOut { remaining } => {
                tracing::warn!(addr = %shared.addr, remaining, "Drain deadline elapsed");
                Err(WireError::CloseTimeout { remaining })
            }
        }
    }

    /// Run [`Server::serve`] on a background thread
    ///
    /// Returns once the listener is bound, so [`Server::local_addr`] is set.
    pub fn spawn(&self) -> Result<ServeHandle> {
        let server = self.clone();
        let (result_tx, result_rx) = channel::bounded(1);
        let thread = thread::Builder::new()
            .name("muxwire-serve".to_string())
            .spawn(move || {
                let _ = result_tx.send(server.serve());
            })?;

        let bound = self.shared.bound.receiver();
        let early = select! {
            recv(bound) -> _ => None,
            recv(result_rx) -> result => Some(result),
        };

        match early {
            None => Ok(ServeHandle {
                result: result_rx,
                thread,
            }),
            Some(result) => {
                let _ = thread.join();
                match result {
                    Ok(Err(e)) => Err(e),
                    _ => Err(WireError::ServerClosed),
                }
            }
        }
    }

    /// Stop accepting and shut down (idempotent)
    ///
    /// When `serve` is running, waits for its drain and reports
    /// `CloseTimeout` if the drain deadline elapsed.
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared.shutdown.fire() {
            return Ok(());
        }
        tracing::info!(addr = %shared.addr, "Closing server");

        if !shared.serving.load(Ordering::SeqCst) {
            return Ok(());
        }

        let grace = shared.config.close_timeout() + Duration::from_secs(1);
        if !shared.drained.wait_timeout(grace) {
            return Err(WireError::CloseTimeout {
                remaining: shared.connected.load(Ordering::SeqCst),
            });
        }

        match *shared.outcome.lock() {
            Some(DrainOutcome::TimedOut { remaining }) => {
                Err(WireError::CloseTimeout { remaining })
            }
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            connected: self.shared.connected.load(Ordering::SeqCst),
            serving: self.shared.serving.load(Ordering::SeqCst),
            closed: self.shared.shutdown.is_fired(),
        }
    }

    /// Address the listener is bound to, once `serve` has bound it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    // =========================================================================
    // Accept Loop
    // =========================================================================

    fn bind(&self) -> Result<TcpListener> {
        let shared = &self.shared;
        let listener = TcpListener::bind(&shared.addr)?;
        // Polled so that `close` from another thread ends the loop promptly.
        listener.set_nonblocking(true)?;

        let local = listener.local_addr()?;
        *shared.local_addr.lock() = Some(local);
        shared.bound.fire();

        tracing::info!(
            addr = %local,
            max_connections = shared.config.max_connections,
            "Server listening"
        );
        Ok(listener)
    }

    fn accept_loop(&self, listener: &TcpListener, alive: &Sender<()>) {
        let shared = &self.shared;
        let max = shared.config.max_connections;

        // Fill the admission channel with one token per allowed connection
        let (token_tx, token_rx) = channel::bounded::<()>(max);
        for _ in 0..max {
            let _ = token_tx.try_send(());
        }

        let shutdown = shared.shutdown.receiver();
        let wait = shared.config.connect_timeout();

        loop {
            // Wait for a free token before accepting anything
            let admission = select! {
                recv(token_rx) -> token => {
                    if token.is_ok() { Admission::Granted } else { Admission::Stop }
                }
                recv(shutdown) -> _ => Admission::Stop,
                default(wait) => Admission::Retry,
            };
            let token = match admission {
                Admission::Granted => Token {
                    tx: token_tx.clone(),
                },
                Admission::Stop => break,
                Admission::Retry => {
                    tracing::warn!(
                        connected = shared.connected.load(Ordering::SeqCst),
                        "No admission token within {:?}, retrying",
                        wait
                    );
                    continue;
                }
            };

            // Accept the next connection (polled, so close() is noticed)
            let (stream, peer) = match self.accept(listener) {
                Ok(Some(accepted)) => accepted,
                // Listener closed: the token goes back as it drops.
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    shared.shutdown.wait_timeout(shared.config.accept_poll_interval());
                    continue;
                }
            };

            // Hand the connection and its token to a new thread
            if let Err(e) = self.dispatch(stream, peer, token, alive.clone()) {
                tracing::warn!(%peer, error = %e, "Failed to start connection handler");
            }
        }

        tracing::debug!("Accept loop exited");
    }

    /// Accept one connection; `None` once the server is shutting down
    fn accept(&self, listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let poll = self.shared.config.accept_poll_interval();
        loop {
            if self.shared.shutdown.is_fired() {
                return Ok(None);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    // Some platforms hand out streams inheriting O_NONBLOCK.
                    stream.set_nonblocking(false)?;
                    return Ok(Some((stream, peer)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.shared.shutdown.wait_timeout(poll) {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the connection thread; it owns `token` until it exits
    fn dispatch(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        token: Token,
        alive: Sender<()>,
    ) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let local = stream.local_addr()?;

        // Keep a clone so drain can unblock this connection's reader
        shared.conns.lock().insert(id, stream.try_clone()?);

        let spawned = thread::Builder::new()
            .name(format!("muxwire-conn-{}", id))
            .spawn(move || {
                let _alive = alive;
                let _token = token;
                let ctx = ConnContext::new(id, local, peer, Context::bound_to(&shared.shutdown));
                run_connection(&shared, stream, ctx);
            });

        if let Err(e) = spawned {
            self.shared.conns.lock().remove(&id);
            return Err(e.into());
        }
        Ok(())
    }

    // =========================================================================
    // Drain
    // =========================================================================

    fn drain(&self, alive_tx: Sender<()>, alive_rx: Receiver<()>) -> DrainOutcome {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.close_timeout();

        // Idle readers see EOF; in-flight replies can still be written
        for stream in shared.conns.lock().values() {
            let _ = stream.shutdown(Shutdown::Read);
        }

        // Every connection thread holds a sender; the channel disconnects
        // when the last one exits.
        drop(alive_tx);
        match alive_rx.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => DrainOutcome::TimedOut {
                remaining: shared.connected.load(Ordering::SeqCst),
            },
            _ => DrainOutcome::Complete,
        }
    }
}

/// Body of a connection thread
fn run_connection(shared: &Shared, stream: TcpStream, ctx: ConnContext) {
    let hooks = &shared.config.hooks;
    let id = ctx.id();

    shared.connected.fetch_add(1, Ordering::SeqCst);
    Hooks::run_conn(&hooks.on_connected, &ctx);

    let options = SocketOptions::from(&shared.config);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        Hooks::run_conn(&hooks.before_handling, &ctx);
        let result = Connection::new(
            stream,
            Arc::clone(&shared.handler),
            ctx.clone(),
            shared.codec,
            &options,
        )
        .and_then(|mut conn| conn.handle());
        Hooks::run_conn(&hooks.after_handling, &ctx);
        result
    }));

    match result {
        Ok(Ok(())) => tracing::debug!(conn_id = id, "Connection closed"),
        Ok(Err(e)) => {
            tracing::error!(conn_id = id, peer = %ctx.peer_addr(), error = %e, "Connection terminated")
        }
        Err(payload) => tracing::error!(
            conn_id = id,
            peer = %ctx.peer_addr(),
            "Handler panicked: {}",
            panic_message(&payload)
        ),
    }

    if let Some(stream) = shared.conns.lock().remove(&id) {
        let _ = stream.shutdown(Shutdown::Both);
    }
    shared.connected.fetch_sub(1, Ordering::SeqCst);
    Hooks::run_conn(&hooks.on_disconnected, &ctx);
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Handle to a server running on a background thread
#[derive(Debug)]
pub struct ServeHandle {
    result: Receiver<Result<()>>,
    thread: thread::JoinHandle<()>,
}

impl ServeHandle {
    /// Wait for `serve` to return
    pub fn join(self) -> Result<()> {
        let result = self.result.recv().unwrap_or(Err(WireError::ServerClosed));
        let _ = self.thread.join();
        result
    }
}
