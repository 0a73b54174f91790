//! Application handler contract
//!
//! The server reads one request frame at a time, calls the handler with the
//! request payload, and answers with a RESPONSE frame on `Ok` or an ERROR
//! frame carrying the error's `Display` text on `Err`.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::context::Context;

/// Error returned by a handler; its message is sent to the client
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of handling one request
pub type HandlerResult = std::result::Result<Bytes, HandlerError>;

/// Serves requests arriving on server connections
///
/// One handler instance is shared by every connection thread. Requests on a
/// single connection are handled strictly one at a time.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ctx: &ConnContext, payload: Bytes) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&ConnContext, Bytes) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, ctx: &ConnContext, payload: Bytes) -> HandlerResult {
        self(ctx, payload)
    }
}

/// Per-connection view handed to handlers and hooks
///
/// Its [`Context`] cancels when the server starts shutting down, so long
/// running handlers can poll [`ConnContext::is_shutting_down`] and bail out.
#[derive(Debug, Clone)]
pub struct ConnContext {
    id: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    context: Context,
}

impl ConnContext {
    pub(crate) fn new(
        id: u64,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        context: Context,
    ) -> Self {
        Self {
            id,
            local_addr,
            peer_addr,
            context,
        }
    }

    /// Server-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Context canceled on server shutdown
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_shutting_down(&self) -> bool {
        self.context.is_canceled()
    }
}
