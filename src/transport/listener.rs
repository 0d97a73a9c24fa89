//! Listeners the server can accept connections from.
//!
//! - TCP: `tokio::net::TcpListener`
//! - Unix: `tokio::net::UnixListener` (unix only)
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::transport::{bind_unix, generate_socket_path};
//!
//! let path = generate_socket_path();
//! let (listener, _cleanup) = bind_unix(&path)?;
//! server.accept(listener).await?;
//! ```

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Source of already-open duplex streams.
pub trait Listener: Send + 'static {
    /// Connection type produced by this listener.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Wait for the next connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Printable local address, for logs.
    fn local_addr_string(&self) -> String;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, _addr) = TcpListener::accept(self).await?;
        Ok(stream)
    }

    fn local_addr_string(&self) -> String {
        self.local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string())
    }
}

/// Generate a unique Unix socket path for this process.
///
/// Format: `{tmp}/rpcwire-{pid}-{random}.sock`
pub fn generate_socket_path() -> String {
    let pid = std::process::id();
    let dir = std::env::temp_dir();
    dir.join(format!("rpcwire-{}-{:x}.sock", pid, rand_u64()))
        .to_string_lossy()
        .into_owned()
}

/// Random-enough u64 from the clock, process ID and a counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ u64::from(std::process::id()) ^ count.rotate_left(32)
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Cleanup guard that removes the socket file on drop.
    #[derive(Debug)]
    pub struct SocketCleanup {
        path: String,
    }

    impl Drop for SocketCleanup {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Bind a Unix socket, removing a stale socket file first.
    ///
    /// The returned guard deletes the socket file when dropped.
    pub fn bind_unix(path: &str) -> io::Result<(UnixListener, SocketCleanup)> {
        if Path::new(path).exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        Ok((
            listener,
            SocketCleanup {
                path: path.to_string(),
            },
        ))
    }

    impl Listener for UnixListener {
        type Stream = UnixStream;

        async fn accept(&mut self) -> io::Result<UnixStream> {
            let (stream, _addr) = UnixListener::accept(self).await?;
            Ok(stream)
        }

        fn local_addr_string(&self) -> String {
            self.local_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "<unnamed>".to_string())
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{bind_unix, SocketCleanup};
