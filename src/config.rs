//! Configuration for muxwire
//!
//! Centralized configuration with sensible defaults. Durations are in
//! milliseconds and buffer sizes in bytes; `0` means "not set" (no timeout,
//! OS default buffer) unless noted otherwise.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WireError};
use crate::network::ConnContext;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// =============================================================================
// Client
// =============================================================================

/// Configuration for a single multiplexed client connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Dial deadline (milliseconds)
    pub connect_timeout_ms: u64,

    /// Per-read deadline on the connection (milliseconds)
    ///
    /// The reader thread sits in a read whenever the client is idle, so a
    /// read timeout also bounds how long a client may stay idle.
    pub read_timeout_ms: u64,

    /// Per-write deadline on the connection (milliseconds)
    pub write_timeout_ms: u64,

    /// Socket receive buffer (SO_RCVBUF)
    pub read_buffer_size: usize,

    /// Socket send buffer (SO_SNDBUF)
    pub write_buffer_size: usize,

    /// Largest payload accepted from the server
    pub max_frame_size: u32,

    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            read_buffer_size: 0,
            write_buffer_size: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(WireError::Config("max_frame_size must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.config.read_buffer_size = bytes;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.config.write_buffer_size = bytes;
        self
    }

    pub fn max_frame_size(mut self, bytes: u32) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// =============================================================================
// Server
// =============================================================================

/// Callback run at a server lifecycle point
pub type LifecycleHook = Arc<dyn Fn() + Send + Sync>;

/// Callback run at a connection lifecycle point
pub type ConnHook = Arc<dyn Fn(&ConnContext) + Send + Sync>;

/// Optional server callbacks; each one runs only when set
#[derive(Clone, Default)]
pub struct Hooks {
    /// After the listener is bound, before the first accept
    pub before_serving: Option<LifecycleHook>,

    /// After the accept loop exits, before draining
    pub after_serving: Option<LifecycleHook>,

    /// After draining finished (or timed out)
    pub after_closing: Option<LifecycleHook>,

    pub on_connected: Option<ConnHook>,
    pub on_disconnected: Option<ConnHook>,

    /// Around the connection's request loop
    pub before_handling: Option<ConnHook>,
    pub after_handling: Option<ConnHook>,
}

impl Hooks {
    pub(crate) fn run(hook: &Option<LifecycleHook>) {
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn run_conn(hook: &Option<ConnHook>, ctx: &ConnContext) {
        if let Some(hook) = hook {
            hook(ctx);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_serving", &self.before_serving.is_some())
            .field("after_serving", &self.after_serving.is_some())
            .field("after_closing", &self.after_closing.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("before_handling", &self.before_handling.is_some())
            .field("after_handling", &self.after_handling.is_some())
            .finish()
    }
}

/// Main configuration for a server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Connection Transport
    // -------------------------------------------------------------------------
    /// Per-read deadline on accepted connections (milliseconds)
    pub read_timeout_ms: u64,

    /// Per-write deadline on accepted connections (milliseconds)
    pub write_timeout_ms: u64,

    /// Socket receive buffer (SO_RCVBUF)
    pub read_buffer_size: usize,

    /// Socket send buffer (SO_SNDBUF)
    pub write_buffer_size: usize,

    /// Largest payload accepted from a client
    pub max_frame_size: u32,

    // -------------------------------------------------------------------------
    // Admission and Lifecycle
    // -------------------------------------------------------------------------
    /// Admission-token capacity: max concurrently handled connections
    pub max_connections: usize,

    /// How long the accept loop waits for a token before logging and
    /// retrying (milliseconds, must be > 0)
    pub connect_timeout_ms: u64,

    /// Drain deadline after the listener closes (milliseconds)
    pub close_timeout_ms: u64,

    /// How often the non-blocking accept loop polls (milliseconds, > 0)
    pub accept_poll_interval_ms: u64,

    pub hooks: Hooks,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            read_buffer_size: 0,
            write_buffer_size: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_connections: 1024,
            connect_timeout_ms: 1000,
            close_timeout_ms: 5000,
            accept_poll_interval_ms: 10,
            hooks: Hooks::default(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(WireError::Config("max_connections must be > 0".to_string()));
        }
        if self.max_frame_size == 0 {
            return Err(WireError::Config("max_frame_size must be > 0".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(WireError::Config("connect_timeout_ms must be > 0".to_string()));
        }
        if self.accept_poll_interval_ms == 0 {
            return Err(WireError::Config(
                "accept_poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.config.read_buffer_size = bytes;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.config.write_buffer_size = bytes;
        self
    }

    pub fn max_frame_size(mut self, bytes: u32) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.config.close_timeout_ms = ms;
        self
    }

    pub fn accept_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.accept_poll_interval_ms = ms;
        self
    }

    pub fn before_serving(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.hooks.before_serving = Some(Arc::new(hook));
        self
    }

    pub fn after_serving(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.hooks.after_serving = Some(Arc::new(hook));
        self
    }

    pub fn after_closing(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.config.hooks.after_closing = Some(Arc::new(hook));
        self
    }

    pub fn on_connected(mut self, hook: impl Fn(&ConnContext) + Send + Sync + 'static) -> Self {
        self.config.hooks.on_connected = Some(Arc::new(hook));
        self
    }

    pub fn on_disconnected(
        mut self,
        hook: impl Fn(&ConnContext) + Send + Sync + 'static,
    ) -> Self {
        self.config.hooks.on_disconnected = Some(Arc::new(hook));
        self
    }

    pub fn before_handling(
        mut self,
        hook: impl Fn(&ConnContext) + Send + Sync + 'static,
    ) -> Self {
        self.config.hooks.before_handling = Some(Arc::new(hook));
        self
    }

    pub fn after_handling(
        mut self,
        hook: impl Fn(&ConnContext) + Send + Sync + 'static,
    ) -> Self {
        self.config.hooks.after_handling = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Configuration for a client pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on live clients (idle + checked out)
    pub limit: usize,

    /// `take` fails with `PoolFull` instead of waiting
    pub fast_failed: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: 8,
            fast_failed: false,
        }
    }
}

impl PoolConfig {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn fast_failed(mut self, fast_failed: bool) -> Self {
        self.fast_failed = fast_failed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(WireError::Config("pool limit must be > 0".to_string()));
        }
        Ok(())
    }
}
