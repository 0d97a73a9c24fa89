//! Codec bound to a duplex stream.
//!
//! After the handshake the stream is split once: the read half goes to the
//! single task that reads frames, the write half goes behind a mutex owned by
//! the server connection or the client.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Body, CodecType};
use crate::error::{RpcError, Result};
use crate::protocol::{FramePrefix, Header, DEFAULT_MAX_FRAME_SIZE, FRAME_PREFIX_SIZE};

/// Type-erased read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex stream carrying (header, body) frames in one format.
pub struct Codec {
    reader: CodecReader,
    writer: CodecWriter,
}

impl Codec {
    /// Wrap an open stream with the given format.
    pub fn new<S>(codec_type: CodecType, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(codec_type, Box::new(read_half), Box::new(write_half))
    }

    /// Wrap separate read and write halves with the given format.
    pub fn from_parts(codec_type: CodecType, reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader: CodecReader::new(codec_type, reader),
            writer: CodecWriter::new(codec_type, writer),
        }
    }

    /// Set the largest frame the reader accepts.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.reader.max_frame_size = max_frame_size;
        self
    }

    /// Format used on this stream.
    #[inline]
    pub fn codec_type(&self) -> CodecType {
        self.reader.codec_type
    }

    /// Read the next frame and return its header. See [`CodecReader::read_header`].
    pub async fn read_header(&mut self) -> Result<Header> {
        self.reader.read_header().await
    }

    /// Decode the body of the last frame. See [`CodecReader::read_body`].
    pub fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.reader.read_body()
    }

    /// Drop the body of the last frame without decoding it.
    pub fn discard_body(&mut self) {
        self.reader.discard_body();
    }

    /// Write one frame. See [`CodecWriter::write`].
    pub async fn write<B: Serialize + ?Sized>(&mut self, header: &Header, body: &B) -> Result<()> {
        self.writer.write(header, body).await
    }

    /// Shut down the write half.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Split into the read side and the write side.
    pub fn split(self) -> (CodecReader, CodecWriter) {
        (self.reader, self.writer)
    }
}

/// Read side of a [`Codec`].
pub struct CodecReader {
    inner: BoxedReader,
    codec_type: CodecType,
    max_frame_size: usize,
    /// Body of the last frame read, until taken or discarded.
    body: Option<Body>,
}

impl CodecReader {
    fn new(codec_type: CodecType, inner: BoxedReader) -> Self {
        Self {
            inner,
            codec_type,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            body: None,
        }
    }

    /// Format used on this stream.
    #[inline]
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Read one complete frame and decode its header.
    ///
    /// The body bytes are consumed from the stream as well and held until
    /// [`read_body`](Self::read_body), [`take_body`](Self::take_body) or
    /// [`discard_body`](Self::discard_body). An unclaimed body is dropped by
    /// the next call.
    ///
    /// # Errors
    ///
    /// `Io(UnexpectedEof)` when the peer closed the stream, a protocol error
    /// for a bad prefix, or a decode error for a malformed header. None of
    /// these leave the stream at a frame boundary the caller can rely on.
    pub async fn read_header(&mut self) -> Result<Header> {
        self.body = None;

        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        self.inner.read_exact(&mut prefix).await?;
        let prefix = FramePrefix::decode(&prefix);
        prefix.validate(self.max_frame_size)?;

        let mut frame = BytesMut::zeroed(prefix.frame_len());
        self.inner.read_exact(&mut frame).await?;

        let body = frame.split_off(prefix.header_len as usize).freeze();
        let header = self.codec_type.decode::<Header>(&frame)?;
        self.body = Some(Body::new(self.codec_type, body));

        Ok(header)
    }

    /// Decode the body of the last frame into `T`.
    ///
    /// The body is consumed even if decoding fails, so the stream stays in
    /// step with the next frame.
    pub fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.take_body().decode()
    }

    /// Take the raw body of the last frame.
    ///
    /// Returns an empty body if there is none pending.
    pub fn take_body(&mut self) -> Body {
        self.body
            .take()
            .unwrap_or_else(|| Body::new(self.codec_type, bytes::Bytes::new()))
    }

    /// Drop the body of the last frame without decoding it.
    #[inline]
    pub fn discard_body(&mut self) {
        self.body = None;
    }
}

/// Write side of a [`Codec`].
pub struct CodecWriter {
    inner: BoxedWriter,
    codec_type: CodecType,
    /// Reused frame buffer.
    buf: BytesMut,
    closed: bool,
}

impl CodecWriter {
    fn new(codec_type: CodecType, inner: BoxedWriter) -> Self {
        Self {
            inner,
            codec_type,
            buf: BytesMut::with_capacity(4 * 1024),
            closed: false,
        }
    }

    /// Format used on this stream.
    #[inline]
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Encode and write one (header, body) frame, then flush.
    ///
    /// Both parts are encoded before any byte reaches the stream, so an
    /// encoding error leaves the stream untouched.
    pub async fn write<B: Serialize + ?Sized>(&mut self, header: &Header, body: &B) -> Result<()> {
        if self.closed {
            return Err(RpcError::ConnectionClosed);
        }

        let header_bytes = self.codec_type.encode(header)?;
        let body_bytes = self.codec_type.encode(body)?;
        let prefix = FramePrefix::for_parts(header_bytes.len(), body_bytes.len())?;

        self.buf.clear();
        self.buf.reserve(FRAME_PREFIX_SIZE + prefix.frame_len());
        self.buf.put_slice(&prefix.encode());
        self.buf.put_slice(&header_bytes);
        self.buf.put_slice(&body_bytes);

        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half. Only the first call touches the stream.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Check if [`close`](Self::close) was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair(codec_type: CodecType) -> (Codec, Codec) {
        let (a, b) = duplex(64 * 1024);
        (Codec::new(codec_type, a), Codec::new(codec_type, b))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        for codec_type in CodecType::ALL {
            let (mut client, mut server) = pair(codec_type);

            let header = Header::new("Foo.Sum", 1);
            client.write(&header, "req 1").await.unwrap();

            let received = server.read_header().await.unwrap();
            assert_eq!(received, header);
            let body: String = server.read_body().unwrap();
            assert_eq!(body, "req 1");
        }
    }

    #[tokio::test]
    async fn test_discard_keeps_framing() {
        let (mut client, mut server) = pair(CodecType::MsgPack);

        client
            .write(&Header::new("Foo.Sum", 1), &vec![0u8; 1000])
            .await
            .unwrap();
        client.write(&Header::new("Foo.Sum", 2), "second").await.unwrap();

        let first = server.read_header().await.unwrap();
        assert_eq!(first.seq, 1);
        server.discard_body();

        let second = server.read_header().await.unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(server.read_body::<String>().unwrap(), "second");
    }

    #[tokio::test]
    async fn test_unread_body_is_skipped() {
        let (mut client, mut server) = pair(CodecType::Json);

        client.write(&Header::new("A.B", 1), "skipped").await.unwrap();
        client.write(&Header::new("A.B", 2), "kept").await.unwrap();

        assert_eq!(server.read_header().await.unwrap().seq, 1);
        assert_eq!(server.read_header().await.unwrap().seq, 2);
        assert_eq!(server.read_body::<String>().unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_body_decode_failure_keeps_framing() {
        let (mut client, mut server) = pair(CodecType::MsgPack);

        client.write(&Header::new("A.B", 1), &42u32).await.unwrap();
        client.write(&Header::new("A.B", 2), "ok").await.unwrap();

        server.read_header().await.unwrap();
        assert!(server.read_body::<String>().is_err());

        assert_eq!(server.read_header().await.unwrap().seq, 2);
        assert_eq!(server.read_body::<String>().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_eof_after_close() {
        let (mut client, mut server) = pair(CodecType::MsgPack);

        client.close().await.unwrap();
        let err = server.read_header().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut client, _server) = pair(CodecType::MsgPack);

        client.close().await.unwrap();
        client.close().await.unwrap();
        let err = client.write(&Header::new("A.B", 1), "x").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = pair(CodecType::MsgPack);
        let mut server = server.with_max_frame_size(64);

        client
            .write(&Header::new("A.B", 1), &vec![7u8; 256])
            .await
            .unwrap();

        let err = server.read_header().await.unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge { max: 64, .. }));
    }

    #[tokio::test]
    async fn test_take_body_without_frame_is_empty() {
        let (_client, server) = pair(CodecType::Json);
        let (mut reader, _writer) = server.split();
        assert!(reader.take_body().is_empty());
    }

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (client, server) = pair(CodecType::Json);
        let (mut client_reader, mut client_writer) = client.split();
        let (mut server_reader, mut server_writer) = server.split();

        client_writer
            .write(&Header::new("Echo.Say", 5), "ping")
            .await
            .unwrap();
        let header = server_reader.read_header().await.unwrap();
        let ping: String = server_reader.read_body().unwrap();
        server_writer.write(&header, &format!("{ping}-pong")).await.unwrap();

        assert_eq!(client_reader.read_header().await.unwrap().seq, 5);
        assert_eq!(client_reader.read_body::<String>().unwrap(), "ping-pong");
    }
}
