//! Client builder, call submission and the receive loop.
//!
//! A [`Client`] owns one connection after the handshake:
//! 1. Resolve the codec and write the [`HandshakeOption`]
//! 2. Spawn the receive task, the only reader of the stream
//! 3. Register each call under a fresh sequence number and write it
//! 4. Match each response to its pending call and deliver it
//!
//! When the receive task stops, every call still pending completes with
//! [`RpcError::Terminated`] and the client becomes unavailable.
//!
//! # Locking
//!
//! Two locks, always taken in this order:
//! - write lock (`tokio::sync::Mutex`): held across one frame write
//! - table lock (`parking_lot::Mutex`): sequence counter, pending calls and
//!   state flags; never held across an await
//!
//! # Example
//!
//! ```no_run
//! use rpcwire::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("127.0.0.1:9999", None).await?;
//!     let reply: String = client.call("Foo.Sum", "req 1").await?;
//!     println!("{}", reply);
//!     client.close()?;
//!     Ok(())
//! }
//! ```

mod call;

pub use call::Call;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::codec::{Codec, CodecReader, CodecType, CodecWriter};
use crate::control::{write_option, HandshakeOption};
use crate::error::{RpcError, Result};
use crate::protocol::{Header, DEFAULT_MAX_FRAME_SIZE};
use call::{Completion, PendingCall};

/// Builder for connecting a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    option: HandshakeOption,
    max_frame_size: usize,
}

impl ClientBuilder {
    /// Create a builder using the default codec.
    pub fn new() -> Self {
        Self {
            option: HandshakeOption::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Select the codec.
    pub fn codec(mut self, codec_type: CodecType) -> Self {
        self.option.codec_type = codec_type.tag().to_string();
        self
    }

    /// Send this handshake option. The magic number is always replaced by
    /// the protocol's own and an empty codec tag means the default codec.
    pub fn option(mut self, option: HandshakeOption) -> Self {
        self.option = option;
        self
    }

    /// Set the largest response frame accepted.
    ///
    /// Default: 16 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Perform the handshake on an open stream and start the receive task.
    ///
    /// # Errors
    ///
    /// `UnknownCodec` if the option names an unknown codec; nothing is
    /// written in that case. An I/O error if the option cannot be sent.
    pub async fn connect<S>(self, mut stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let option = HandshakeOption::normalized(Some(self.option));
        let codec_type = match option.codec() {
            Ok(codec_type) => codec_type,
            Err(e) => {
                tracing::error!("rpc client: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = write_option(&mut stream, &option).await {
            tracing::error!("rpc client: options error: {}", e);
            return Err(e);
        }

        let codec = Codec::new(codec_type, stream).with_max_frame_size(self.max_frame_size);
        Ok(Client::start(codec, option))
    }

    /// Connect over TCP, then [`connect`](Self::connect).
    pub async fn dial<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.connect(stream).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write side: the codec plus the header reused for every request.
struct ClientWriter {
    codec: CodecWriter,
    header: Header,
}

/// Everything guarded by the table lock.
struct CallTable {
    /// Next sequence number. 0 is never handed out.
    seq: u64,
    pending: HashMap<u64, Box<dyn Completion>>,
    /// Set by `close` or drop.
    closing: bool,
    /// Set when the receive task stops.
    shutdown: bool,
}

impl CallTable {
    fn is_available(&self) -> bool {
        !self.closing && !self.shutdown
    }
}

struct ClientInner {
    writer: tokio::sync::Mutex<ClientWriter>,
    table: parking_lot::Mutex<CallTable>,
    /// Flips to `true` once the client is closing or shut down. Wakes the
    /// receive task and aborts a write stuck on a peer that stopped reading.
    closed: watch::Sender<bool>,
}

impl ClientInner {
    /// Mark the client closing and wake the receive task.
    fn begin_close(&self) -> Result<()> {
        {
            let mut table = self.table.lock();
            if !table.is_available() {
                return Err(RpcError::Shutdown);
            }
            table.closing = true;
        }
        self.closed.send_replace(true);
        Ok(())
    }

    /// Receive loop. Runs on its own task until the stream fails or the
    /// client is closed.
    async fn receive(self: Arc<Self>, mut reader: CodecReader) {
        let mut closed = self.closed.subscribe();
        let err = loop {
            let header = tokio::select! {
                _ = wait_closed(&mut closed) => break RpcError::Shutdown,
                result = reader.read_header() => match result {
                    Ok(header) => header,
                    Err(e) => break e,
                },
            };

            let pending = self.table.lock().pending.remove(&header.seq);
            match pending {
                None => {
                    // Usually a request whose write failed after the server
                    // already answered it.
                    tracing::debug!("rpc client: no pending call for seq {}", header.seq);
                    reader.discard_body();
                }
                Some(call) if header.is_error() => {
                    reader.discard_body();
                    call.complete(Err(RpcError::Remote(header.error)));
                }
                Some(call) => call.complete(Ok(reader.take_body())),
            }
        };

        self.terminate_calls(err).await;
    }

    /// Fail every pending call with `err` and close the stream.
    async fn terminate_calls(&self, err: RpcError) {
        // Release the write lock if a request write is stuck.
        self.closed.send_replace(true);
        let mut writer = self.writer.lock().await;
        let (pending, closing) = {
            let mut table = self.table.lock();
            table.shutdown = true;
            (std::mem::take(&mut table.pending), table.closing)
        };

        if closing || err.is_eof() {
            tracing::debug!("rpc client: receive loop stopped: {}", err);
        } else {
            tracing::error!("rpc client: receive loop stopped: {}", err);
        }

        let err = Arc::new(err);
        for (_, call) in pending {
            call.complete(Err(RpcError::Terminated(err.clone())));
        }

        if let Err(e) = writer.codec.close().await {
            tracing::debug!("rpc client: close error: {}", e);
        }
    }
}

/// Resolve once the close signal is set.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// An RPC client bound to one connection.
///
/// Calls may be issued concurrently from many tasks through `&Client`;
/// wrap it in an `Arc` to share it. Dropping the client closes it.
pub struct Client {
    inner: Arc<ClientInner>,
    codec_type: CodecType,
    option: HandshakeOption,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Handshake over an open stream. `None` selects the default option.
    pub async fn new<S>(stream: S, option: Option<HandshakeOption>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        ClientBuilder::new()
            .option(option.unwrap_or_default())
            .connect(stream)
            .await
    }

    /// Connect over TCP. `None` selects the default option.
    pub async fn dial<A: ToSocketAddrs>(addr: A, option: Option<HandshakeOption>) -> Result<Self> {
        ClientBuilder::new()
            .option(option.unwrap_or_default())
            .dial(addr)
            .await
    }

    fn start(codec: Codec, option: HandshakeOption) -> Self {
        let codec_type = codec.codec_type();
        let (reader, writer) = codec.split();
        let inner = Arc::new(ClientInner {
            writer: tokio::sync::Mutex::new(ClientWriter {
                codec: writer,
                header: Header::default(),
            }),
            table: parking_lot::Mutex::new(CallTable {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            closed: watch::channel(false).0,
        });

        tokio::spawn(inner.clone().receive(reader));
        tracing::debug!("rpc client: connected using {}", codec_type);

        Self {
            inner,
            codec_type,
            option,
        }
    }

    /// Submit a call; the completed [`Call`] is sent on `done`.
    ///
    /// Returns once the request is written. Every submission produces
    /// exactly one message on `done`, including when the client is
    /// unavailable or the write fails.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future while the request is being written may
    /// leave a partial frame on the stream. Closing the client aborts such a
    /// write and the call fails with `ConnectionClosed`.
    pub async fn go_with<A, R>(&self, service_method: &str, args: &A, done: UnboundedSender<Call<R>>)
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let mut pending = Box::new(PendingCall::new(service_method, done));
        let mut closed = self.inner.closed.subscribe();

        // Holding the write lock across registration keeps sequence numbers
        // ascending on the wire.
        let mut writer = self.inner.writer.lock().await;
        let registered = {
            let mut table = self.inner.table.lock();
            if table.is_available() {
                let seq = table.seq;
                table.seq += 1;
                pending.call.seq = seq;
                table.pending.insert(seq, pending);
                Ok(seq)
            } else {
                Err(pending)
            }
        };
        let seq = match registered {
            Ok(seq) => seq,
            Err(pending) => {
                drop(writer);
                pending.complete(Err(RpcError::Shutdown));
                return;
            }
        };

        let ClientWriter { codec, header } = &mut *writer;
        header.reset(service_method, seq);
        let written = tokio::select! {
            result = codec.write(header, args) => result,
            _ = wait_closed(&mut closed) => Err(RpcError::ConnectionClosed),
        };
        if let Err(e) = written {
            tracing::debug!("rpc client: write request {} failed: {}", seq, e);
            // Already gone if the receive task answered or drained it.
            let call = self.inner.table.lock().pending.remove(&seq);
            if let Some(call) = call {
                call.complete(Err(e));
            }
        }
    }

    /// Submit a call and return the channel its completion arrives on.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> UnboundedReceiver<Call<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, rx) = unbounded_channel();
        self.go_with(service_method, args, done).await;
        rx
    }

    /// Submit a call and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `Shutdown` if the client is closed
    /// - `Remote` with the server's message
    /// - `ReadingBody` if the reply does not decode into `R`
    /// - `Terminated` if the connection failed first
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let mut rx = self.go(service_method, args).await;
        match rx.recv().await {
            Some(call) => call.into_result(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// Close the connection.
    ///
    /// Pending calls fail with `Terminated` once the receive task has
    /// closed the stream.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the client was already closed or the connection failed.
    pub fn close(&self) -> Result<()> {
        self.inner.begin_close()
    }

    /// Check if new calls can be submitted.
    pub fn is_available(&self) -> bool {
        self.inner.table.lock().is_available()
    }

    /// Negotiated codec.
    #[inline]
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// The option sent during the handshake.
    pub fn option(&self) -> &HandshakeOption {
        &self.option
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.inner.begin_close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("codec_type", &self.option.codec_type)
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{read_option, MAGIC_NUMBER};
    use crate::server::Server;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn connected(codec_type: CodecType) -> Client {
        let (client_end, server_end) = duplex(64 * 1024);
        tokio::spawn(async move { Server::new().serve_conn(server_end).await });
        Client::builder().codec(codec_type).connect(client_end).await.unwrap()
    }

    /// Client plus a hand-driven server end.
    async fn with_raw_peer() -> (Client, Codec) {
        let (client_end, mut server_end) = duplex(64 * 1024);
        let client = Client::new(client_end, None).await.unwrap();
        let option = read_option(&mut server_end).await.unwrap();
        let codec_type = option.validate().unwrap();
        (client, Codec::new(codec_type, server_end))
    }

    #[tokio::test]
    async fn test_call_placeholder_reply() {
        for codec_type in CodecType::ALL {
            let client = connected(codec_type).await;
            assert_eq!(client.codec_type(), codec_type);

            let reply: String = timeout(WAIT, client.call("Foo.Sum", "req 0"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply, "rpcwire resp 1");
        }
    }

    #[tokio::test]
    async fn test_sequential_calls_use_ascending_seqs() {
        let client = connected(CodecType::MsgPack).await;
        for i in 1..=5u64 {
            let reply: String = client.call("Foo.Sum", &format!("req {}", i)).await.unwrap();
            assert_eq!(reply, format!("rpcwire resp {}", i));
        }
    }

    #[tokio::test]
    async fn test_go_delivers_call_record() {
        let client = connected(CodecType::Json).await;
        let mut rx = client.go::<_, String>("Foo.Sum", "req").await;

        let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(call.seq, 1);
        assert_eq!(call.service_method, "Foo.Sum");
        assert_eq!(call.reply.as_deref(), Some("rpcwire resp 1"));
    }

    #[tokio::test]
    async fn test_go_with_shared_channel() {
        let client = connected(CodecType::MsgPack).await;
        let (tx, mut rx) = unbounded_channel::<Call<String>>();
        for i in 0..10 {
            client.go_with("Foo.Sum", &format!("req {}", i), tx.clone()).await;
        }

        let mut seqs = Vec::new();
        for _ in 0..10 {
            let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(call.reply.unwrap(), format!("rpcwire resp {}", call.seq));
            seqs.push(call.seq);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unknown_codec_writes_nothing() {
        let (client_end, mut server_end) = duplex(1024);
        let option = HandshakeOption {
            magic_number: MAGIC_NUMBER,
            codec_type: "application/gob".to_string(),
        };

        let err = Client::new(client_end, Some(option)).await.unwrap_err();
        assert!(matches!(err, RpcError::UnknownCodec(ref tag) if tag == "application/gob"));

        // The stream was dropped without a single byte written.
        let mut buf = [0u8; 16];
        assert_eq!(server_end.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_option_normalized() {
        let (client_end, mut server_end) = duplex(1024);
        let option = HandshakeOption {
            magic_number: 7,
            codec_type: String::new(),
        };
        let client = Client::new(client_end, Some(option)).await.unwrap();

        let sent = read_option(&mut server_end).await.unwrap();
        assert_eq!(sent.magic_number, MAGIC_NUMBER);
        assert_eq!(sent.codec_type, CodecType::MsgPack.tag());
        assert_eq!(client.option(), &sent);
    }

    #[tokio::test]
    async fn test_close_semantics() {
        let client = connected(CodecType::MsgPack).await;
        assert!(client.is_available());

        client.close().unwrap();
        assert!(!client.is_available());
        assert!(matches!(client.close(), Err(RpcError::Shutdown)));

        let err = client.call::<_, String>("Foo.Sum", "late").await.unwrap_err();
        assert!(matches!(err, RpcError::Shutdown));
    }

    #[tokio::test]
    async fn test_unavailable_call_has_no_seq() {
        let client = connected(CodecType::MsgPack).await;
        client.close().unwrap();

        let mut rx = client.go::<_, String>("Foo.Sum", "late").await;
        let call = rx.recv().await.unwrap();
        assert_eq!(call.seq, 0);
        assert!(matches!(call.error, Some(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_remote_error_and_unmatched_response() {
        let (client, mut peer) = with_raw_peer().await;
        let mut first = client.go::<_, String>("Svc.Fail", "x").await;
        let mut second = client.go::<_, String>("Svc.Ok", "y").await;

        peer.read_header().await.unwrap();
        peer.read_header().await.unwrap();

        // Nobody is waiting for seq 99; its body must be skipped.
        peer.write(&Header::new("Svc.Ghost", 99), "ignored").await.unwrap();
        let mut failed = Header::new("Svc.Fail", 1);
        failed.error = "method not found".to_string();
        peer.write(&failed, &()).await.unwrap();
        peer.write(&Header::new("Svc.Ok", 2), "fine").await.unwrap();

        let call = timeout(WAIT, first.recv()).await.unwrap().unwrap();
        assert!(matches!(call.error, Some(RpcError::Remote(ref m)) if m == "method not found"));
        let call = timeout(WAIT, second.recv()).await.unwrap().unwrap();
        assert_eq!(call.into_result().unwrap(), "fine");
    }

    #[tokio::test]
    async fn test_reply_decode_failure() {
        let (client, mut peer) = with_raw_peer().await;
        let mut rx = client.go::<_, String>("Svc.Num", "x").await;

        peer.read_header().await.unwrap();
        peer.write(&Header::new("Svc.Num", 1), &12345u32).await.unwrap();

        let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(call.error, Some(RpcError::ReadingBody(_))));
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_peer_failure_terminates_pending_calls() {
        let (client, peer) = with_raw_peer().await;
        let mut receivers = Vec::new();
        for i in 0..3 {
            receivers.push(client.go::<_, String>("Svc.Never", &i).await);
        }

        drop(peer);

        for mut rx in receivers {
            let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            match call.error {
                Some(RpcError::Terminated(cause)) => assert!(cause.is_eof()),
                other => panic!("expected terminated, got {:?}", other),
            }
        }

        assert!(!client.is_available());
        assert!(matches!(client.close(), Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_close_terminates_pending_calls() {
        let (client, mut peer) = with_raw_peer().await;
        let mut rx = client.go::<_, String>("Svc.Never", "x").await;
        peer.read_header().await.unwrap();

        client.close().unwrap();

        let call = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(call.error, Some(RpcError::Terminated(_))));

        // The peer sees the stream closed.
        let err = timeout(WAIT, peer.read_header()).await.unwrap().unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_close_aborts_blocked_write() {
        let (client_end, mut server_end) = duplex(256);
        let client = Arc::new(Client::new(client_end, None).await.unwrap());
        read_option(&mut server_end).await.unwrap();

        // The peer stops reading, so this write fills the pipe and stalls.
        let waiting = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call::<_, String>("Svc.Big", &"x".repeat(64 * 1024))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        client.close().unwrap();

        let result = timeout(WAIT, waiting).await.unwrap().unwrap();
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(!client.is_available());

        // The stream gets closed: the peer drains the partial frame, then EOF.
        let mut buf = Vec::new();
        timeout(WAIT, server_end.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drop_closes_stream() {
        let (client, mut peer) = with_raw_peer().await;
        drop(client);

        let err = timeout(WAIT, peer.read_header()).await.unwrap().unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_unencodable_args_fail_locally() {
        let (client_end, mut server_end) = duplex(1024);
        let client = Client::builder()
            .codec(CodecType::Json)
            .connect(client_end)
            .await
            .unwrap();
        read_option(&mut server_end).await.unwrap();
        let mut peer = Codec::new(CodecType::Json, server_end);

        // JSON object keys must be strings.
        let mut bad = std::collections::BTreeMap::new();
        bad.insert(vec![1u8], 1u8);
        let err = client.call::<_, String>("Svc.Bad", &bad).await.unwrap_err();
        assert!(matches!(err, RpcError::Json(_)));
        assert!(client.is_available());

        // Nothing reached the stream, so the next request is seq 2.
        let mut rx = client.go::<_, String>("Svc.Ok", "y").await;
        let header = peer.read_header().await.unwrap();
        assert_eq!(header.seq, 2);
        peer.write(&header, "ok").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().into_result().unwrap(), "ok");
    }
}
