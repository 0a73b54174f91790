//! Connection Handler
//!
//! Runs the request loop for one accepted connection.

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::network::handler::{ConnContext, Handler};
use crate::network::socket::SocketOptions;
use crate::protocol::{Frame, FrameCodec};

/// Handles a single client connection
pub(crate) struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer; every reply goes out in one write
    writer: TcpStream,

    handler: Arc<dyn Handler>,

    ctx: ConnContext,

    codec: FrameCodec,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Applies socket options (deadlines, buffer sizes) before anything is
    /// read from the stream.
    pub fn new(
        stream: TcpStream,
        handler: Arc<dyn Handler>,
        ctx: ConnContext,
        codec: FrameCodec,
        options: &SocketOptions,
    ) -> Result<Self> {
        // Deadlines, TCP_NODELAY and buffer sizes
        options.apply(&stream)?;

        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: stream,
            handler,
            ctx,
            codec,
        })
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads request frames in a loop and writes one reply per request.
    /// Returns `Ok` when the client disconnects, the read deadline passes on
    /// an idle connection, or the server shuts down; returns the error when
    /// the stream turns out to be corrupt.
    pub fn handle(&mut self) -> Result<()> {
        let peer = self.ctx.peer_addr();
        tracing::debug!(conn_id = self.ctx.id(), %peer, "Connection established");

        loop {
            // Stop between requests once the server is draining
            if self.ctx.is_shutting_down() {
                tracing::debug!(conn_id = self.ctx.id(), %peer, "Server shutting down, closing connection");
                return Ok(());
            }

            // Read next request; the header is validated before the payload
            let frame = match self.codec.decode(&mut self.reader) {
                Ok(frame) => frame,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!(conn_id = self.ctx.id(), %peer, "Client disconnected");
                    return Ok(());
                }
                Err(e) if e.is_timeout() => {
                    tracing::debug!(conn_id = self.ctx.id(), %peer, "Read timeout");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(conn_id = self.ctx.id(), %peer, error = %e, "Error reading frame");
                    return Err(e);
                }
            };

            let seq = frame.sequence();
            tracing::trace!(conn_id = self.ctx.id(), seq, len = frame.payload.len(), "Received request");

            // Run the handler and send exactly one reply per request
            let reply = self.execute(frame);

            if let Err(e) = self.send(&reply) {
                // Peer gone before the reply could be written: not a server error.
                if e.is_disconnect() {
                    tracing::debug!(conn_id = self.ctx.id(), %peer, seq, "Client disconnected before reply: {}", e);
                    return Ok(());
                }
                tracing::warn!(conn_id = self.ctx.id(), %peer, seq, error = %e, "Error writing reply");
                return Err(e);
            }
        }
    }

    /// Run the handler for one request frame and build the reply
    fn execute(&self, frame: Frame) -> Frame {
        let seq = frame.sequence();

        // Responses never travel client to server; answer instead of dying.
        if frame.is_error() {
            tracing::debug!(conn_id = self.ctx.id(), seq, "Client sent an ERROR frame");
            return self.error_frame(seq, "protocol error: unexpected ERROR frame from client");
        }

        match self.handler.handle(&self.ctx, frame.payload) {
            Ok(body) => Frame::response(seq, body),
            Err(e) => self.error_frame(seq, &e.to_string()),
        }
    }

    /// Write a reply; an oversized response becomes an ERROR frame
    fn send(&mut self, reply: &Frame) -> Result<()> {
        match self.codec.encode(&mut self.writer, reply) {
            Err(WireError::Oversize { length, max }) => {
                tracing::warn!(conn_id = self.ctx.id(), seq = reply.sequence(), length, max, "Response too large");
                let message = format!("response too large: {} bytes (max {})", length, max);
                let fallback = self.error_frame(reply.sequence(), &message);
                self.codec.encode(&mut self.writer, &fallback)
            }
            other => other,
        }
    }

    /// ERROR frame whose message is cut to fit the frame size limit
    fn error_frame(&self, seq: u64, message: &str) -> Frame {
        Frame::error(seq, truncate_utf8(message, self.codec.max_frame_size() as usize))
    }
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
