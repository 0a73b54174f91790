//! Multiplexed client
//!
//! Many threads share one connection. Each `send` takes the next sequence
//! number, installs a mailbox under it, writes its request under the write
//! mutex and waits. A single reader thread owns the read half and routes
//! every response to the mailbox with the matching sequence.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::select;
use parking_lot::Mutex;

use super::inflight::{Delivery, InflightGuard, InflightTable};
use crate::config::ClientConfig;
use crate::context::{Context, Signal};
use crate::error::{ErrorKind, Result, WireError};
use crate::network::socket::SocketOptions;
use crate::protocol::{Frame, FrameCodec, FrameType};

struct Inner {
    /// Kept for `shutdown`, which unblocks the reader thread
    stream: TcpStream,
    writer: Mutex<TcpStream>,
    codec: FrameCodec,

    sequence: AtomicU64,
    inflight: InflightTable,
    done: Signal,

    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

/// Why a waiting `send` woke up
enum Wake {
    Reply(Frame),
    Closed,
    Canceled,
    Expired,
}

/// One connection shared by concurrent callers
pub struct Client {
    inner: Arc<Inner>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Client {
    /// Dial `addr` and start the reader thread
    pub fn open(addr: &str, config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let stream = dial(addr, config.connect_timeout())?;
        SocketOptions::from(config).apply(&stream)?;

        let inner = Arc::new(Inner {
            writer: Mutex::new(stream.try_clone()?),
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
            codec: FrameCodec::new(config.max_frame_size),
            sequence: AtomicU64::new(0),
            inflight: InflightTable::new(),
            done: Signal::new(),
            stream,
        });

        let read_stream = inner.stream.try_clone()?;
        let reader_inner = Arc::clone(&inner);
        let reader = thread::Builder::new()
            .name(format!("muxwire-reader-{}", inner.peer_addr))
            .spawn(move || read_loop(reader_inner, read_stream))?;

        tracing::debug!(peer = %inner.peer_addr, local = %inner.local_addr, "Client connected");

        Ok(Self {
            inner,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Send one request and wait for its response
    ///
    /// Returns the response payload, `Remote` for an ERROR reply,
    /// `Canceled`/`Timeout` when `ctx` ends first, and `ClientClosed` when
    /// the client shuts down while waiting.
    pub fn send(&self, ctx: &Context, payload: impl Into<Bytes>) -> Result<Bytes> {
        let inner = &self.inner;
        if inner.done.is_fired() {
            return Err(WireError::ClientClosed);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let seq = inner.sequence.fetch_add(1, Ordering::SeqCst);
        let mailbox = inner.inflight.install(seq)?;
        let _guard = InflightGuard {
            table: &inner.inflight,
            seq,
        };

        let frame = Frame::request(seq, payload);
        let written = {
            let mut writer = inner.writer.lock();
            inner.codec.encode(&mut *writer, &frame)
        };
        if let Err(e) = written {
            // A failed or timed-out write may leave half a frame on the wire.
            if matches!(e.kind(), ErrorKind::Io | ErrorKind::Timeout) {
                tracing::warn!(peer = %inner.peer_addr, seq, error = %e, "Write failed, closing client");
                let _ = inner.shutdown();
            }
            return Err(e);
        }
        tracing::trace!(seq, len = frame.payload.len(), "Request sent");

        let done = inner.done.receiver();
        let canceled = ctx.done_channel();
        let expired = ctx.deadline_channel();
        let wake = select! {
            recv(mailbox) -> reply => match reply {
                Ok(frame) => Wake::Reply(frame),
                Err(_) => Wake::Closed,
            },
            recv(done) -> _ => match mailbox.try_recv() {
                Ok(frame) => Wake::Reply(frame),
                Err(_) => Wake::Closed,
            },
            recv(canceled) -> _ => Wake::Canceled,
            recv(expired) -> _ => Wake::Expired,
        };

        match wake {
            Wake::Reply(frame) => match frame.frame_type(false) {
                FrameType::Response => Ok(frame.payload),
                FrameType::Error => Err(WireError::Remote(frame.error_message())),
                FrameType::Request => Err(WireError::Protocol(format!(
                    "unexpected request frame for sequence {}",
                    seq
                ))),
            },
            Wake::Closed => Err(WireError::ClientClosed),
            Wake::Canceled => {
                tracing::debug!(seq, "Send canceled");
                Err(WireError::Canceled)
            }
            Wake::Expired => {
                tracing::debug!(seq, "Send deadline elapsed");
                Err(WireError::Timeout("send deadline"))
            }
        }
    }

    /// [`Client::send`] with a fresh context bounded by `timeout`
    pub fn send_timeout(&self, payload: impl Into<Bytes>, timeout: Duration) -> Result<Bytes> {
        self.send(&Context::with_timeout(timeout), payload)
    }

    /// Close the connection and release every waiting caller (idempotent)
    pub fn close(&self) -> Result<()> {
        let result = self.inner.shutdown();
        if let Some(reader) = self.reader.lock().take() {
            if reader.join().is_err() {
                tracing::error!(peer = %self.inner.peer_addr, "Reader thread panicked");
            }
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.done.is_fired()
    }

    /// Number of callers currently waiting for a response
    pub fn inflight_len(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Sequence the next `send` will use
    pub fn next_sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .field("inflight", &self.inflight_len())
            .finish()
    }
}

impl Inner {
    /// Terminal shutdown; only the first call does anything
    fn shutdown(&self) -> Result<()> {
        if !self.done.fire() {
            return Ok(());
        }

        let result = match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        };
        let released = self.inflight.close();
        self.sequence.store(0, Ordering::SeqCst);

        tracing::debug!(peer = %self.peer_addr, released, "Client closed");
        result
    }
}

/// Reader thread: route responses until the stream ends, then close
fn read_loop(inner: Arc<Inner>, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    loop {
        let frame = match inner.codec.decode(&mut reader) {
            Ok(frame) => frame,
            Err(e) => {
                if inner.done.is_fired() || e.is_disconnect() {
                    tracing::debug!(peer = %inner.peer_addr, "Reader stopped: {}", e);
                } else {
                    tracing::warn!(peer = %inner.peer_addr, error = %e, "Reader failed");
                }
                break;
            }
        };

        let seq = frame.sequence();
        match inner.inflight.deliver(frame) {
            Delivery::Delivered => {}
            Delivery::Unclaimed => tracing::trace!(seq, "Dropping response nobody waits for"),
            Delivery::Duplicate => tracing::debug!(seq, "Dropping duplicate response"),
        }
    }

    // Pending callers must observe ClientClosed once reading stops.
    let _ = inner.shutdown();
}

/// Connect to the first address that accepts within `timeout`
fn dial(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
            None => TcpStream::connect(candidate),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(e) => WireError::from_io(e, "connect"),
        None => WireError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no addresses resolved for {}", addr),
        )),
    })
}
