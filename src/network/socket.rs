//! Transport setup shared by dialed and accepted streams

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use crate::config::{ClientConfig, ServerConfig};

/// Socket-level options applied to every connection
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SocketOptions {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub nodelay: bool,
}

impl From<&ClientConfig> for SocketOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            nodelay: config.nodelay,
        }
    }
}

impl From<&ServerConfig> for SocketOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            read_buffer_size: config.read_buffer_size,
            write_buffer_size: config.write_buffer_size,
            nodelay: true,
        }
    }
}

impl SocketOptions {
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;

        if self.read_buffer_size > 0 {
            set_buffer_size(stream, BufferKind::Receive, self.read_buffer_size)?;
        }
        if self.write_buffer_size > 0 {
            set_buffer_size(stream, BufferKind::Send, self.write_buffer_size)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BufferKind {
    Receive,
    Send,
}

#[cfg(unix)]
fn set_buffer_size(stream: &TcpStream, kind: BufferKind, size: usize) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let option = match kind {
        BufferKind::Receive => libc::SO_RCVBUF,
        BufferKind::Send => libc::SO_SNDBUF,
    };
    let value = size.min(libc::c_int::MAX as usize) as libc::c_int;

    // SAFETY: the fd is owned by `stream` and stays open for the duration of
    // the call; `value` outlives the call and its size is passed alongside.
    let ret = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_buffer_size(_stream: &TcpStream, kind: BufferKind, size: usize) -> io::Result<()> {
    tracing::debug!(?kind, size, "socket buffer sizing not supported on this platform");
    Ok(())
}
