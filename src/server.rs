//! Server builder, connection loop and acceptor.
//!
//! The [`Server`] handles each connection in three stages:
//! 1. Read and check the handshake option
//! 2. Read requests one at a time, spawning a task per request
//! 3. When reading stops, wait for every spawned task, then close the stream
//!
//! # Example
//!
//! ```no_run
//! use rpcwire::Server;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     Server::new().accept(listener).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;

use crate::codec::{Codec, CodecReader};
use crate::control::read_option;
use crate::error::{RpcError, Result};
use crate::handler::{Handler, InvalidRequest, PlaceholderHandler, Request};
use crate::protocol::{Header, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::Listener;
use crate::writer::SharedWriter;

/// Default maximum concurrent handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Handlers running at once on one connection. When all are busy the
    /// read loop waits for one to finish.
    pub max_concurrent_handlers: usize,
    /// Largest frame accepted from a client.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for configuring a [`Server`].
pub struct ServerBuilder {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a builder with the placeholder handler and default limits.
    pub fn new() -> Self {
        Self {
            handler: Arc::new(PlaceholderHandler),
            config: ServerConfig::default(),
        }
    }

    /// Set the handler run for every request.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Set the maximum number of concurrent handlers per connection.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the largest frame accepted from a client.
    ///
    /// Default: 16 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server {
        Server {
            handler: self.handler,
            config: self.config,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An RPC server.
///
/// Cloning is cheap; clones share the handler.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    config: ServerConfig,
}

impl Server {
    /// Create a server with the placeholder handler and default limits.
    pub fn new() -> Self {
        ServerBuilder::new().build()
    }

    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve a single connection until the client goes away.
    ///
    /// # Errors
    ///
    /// Returns the handshake error if the option is malformed, carries the
    /// wrong magic number or names an unknown codec. Nothing is written to
    /// the stream in that case. Failures after the handshake are logged and
    /// end the connection with `Ok(())`.
    pub async fn serve_conn<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let option = match read_option(&mut stream).await {
            Ok(option) => option,
            Err(e) => {
                tracing::error!("rpc server: options error: {}", e);
                let _ = stream.shutdown().await;
                return Err(e);
            }
        };

        let codec_type = match option.validate() {
            Ok(codec_type) => codec_type,
            Err(e) => {
                tracing::error!("rpc server: {}", e);
                let _ = stream.shutdown().await;
                return Err(e);
            }
        };

        tracing::debug!("rpc server: connection using {}", codec_type);
        let codec = Codec::new(codec_type, stream).with_max_frame_size(self.config.max_frame_size);
        self.serve_codec(codec).await;
        Ok(())
    }

    /// Main read loop - reads requests and schedules handlers.
    async fn serve_codec(&self, codec: Codec) {
        let (mut reader, writer) = codec.split();
        let writer = SharedWriter::new(writer);

        // Every running handler holds one permit; owning all of them means
        // no handler can still write.
        let limit = self
            .config
            .max_concurrent_handlers
            .clamp(1, u32::MAX as usize);
        let permits = Arc::new(Semaphore::new(limit));

        loop {
            let request = match Self::read_request(&mut reader).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(header) => {
                    send_response(&writer, &header, &InvalidRequest {}).await;
                    continue;
                }
            };

            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let handler = self.handler.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let _permit = permit;
                handle_request(handler, request, &writer).await;
            });
        }

        // `limit` was clamped to fit in u32 above
        if permits.acquire_many(limit as u32).await.is_err() {
            tracing::warn!("rpc server: handler barrier closed before drain");
        }
        if let Err(e) = writer.close().await {
            tracing::debug!("rpc server: close error: {}", e);
        }
    }

    /// Read one request.
    ///
    /// - `Ok(Some(request))`: header and argument decoded
    /// - `Ok(None)`: the stream ended or the header is unreadable; stop
    /// - `Err(header)`: the argument failed to decode; `header.error` is set
    async fn read_request(reader: &mut CodecReader) -> std::result::Result<Option<Request>, Header> {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => {
                if !e.is_eof() {
                    tracing::error!("rpc server: read header error: {}", e);
                }
                return Ok(None);
            }
        };

        match reader.read_body::<String>() {
            Ok(argv) => Ok(Some(Request { header, argv })),
            Err(e) => {
                tracing::error!("rpc server: read argv err: {}", e);
                let mut header = header;
                header.error = e.to_string();
                Err(header)
            }
        }
    }

    /// Accept connections until the listener fails, serving each on its own task.
    ///
    /// # Errors
    ///
    /// Returns the accept error that ended the loop. Connections already
    /// being served are not affected.
    pub async fn accept<L: Listener>(&self, mut listener: L) -> Result<()> {
        tracing::info!("rpc server: accepting on {}", listener.local_addr_string());
        loop {
            let stream = match listener.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!("rpc server: accept error: {}", e);
                    return Err(RpcError::Io(e));
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                // Already logged inside serve_conn.
                let _ = server.serve_conn(stream).await;
            });
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the handler for one request and send exactly one response.
async fn handle_request(handler: Arc<dyn Handler>, request: Request, writer: &SharedWriter) {
    let mut header = request.header.clone();

    // A panicking handler must still produce a response.
    let outcome = match tokio::spawn(handler.call(request)).await {
        Ok(outcome) => outcome,
        Err(e) => Err(RpcError::Handler(e.to_string())),
    };

    match outcome {
        Ok(reply) => send_response(writer, &header, &reply).await,
        Err(e) => {
            header.error = e.to_string();
            send_response(writer, &header, &InvalidRequest {}).await;
        }
    }
}

/// Write a response under the write lock. Failures are logged, not returned.
async fn send_response<B: serde::Serialize + ?Sized>(writer: &SharedWriter, header: &Header, body: &B) {
    if let Err(e) = writer.send(header, body).await {
        tracing::error!("rpc server: write response error: {}", e);
    }
}
