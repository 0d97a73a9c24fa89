//! Mutex-serialized frame writer shared by a connection's tasks.
//!
//! # Architecture
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► SharedWriter (tokio Mutex) ─► CodecWriter ─► stream
//! Read loop ─┘
//! ```
//!
//! The mutex is held for exactly one `write` call, so every frame reaches
//! the stream whole and frames are totally ordered.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::codec::CodecWriter;
use crate::error::Result;
use crate::protocol::Header;

/// Handle for writing frames on one connection.
///
/// This is cheaply cloneable and can be shared across handler tasks.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<CodecWriter>>,
}

impl SharedWriter {
    /// Wrap the write half of a codec.
    pub fn new(writer: CodecWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one frame while holding the write lock.
    pub async fn send<B: Serialize + ?Sized>(&self, header: &Header, body: &B) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write(header, body).await
    }

    /// Shut down the write half. Later sends fail with `ConnectionClosed`.
    pub async fn close(&self) -> Result<()> {
        self.inner.lock().await.close().await
    }
}
