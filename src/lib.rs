//! # rpcwire
//!
//! Request/response RPC over a single duplex byte stream.
//!
//! A client and a server agree on a wire format with a one-line handshake,
//! then exchange (header, body) frames. Requests are correlated with their
//! responses by sequence number, so many calls can be in flight on one
//! connection and the server may answer them in any order.
//!
//! ## Architecture
//!
//! - **Control Plane**: one JSON line carrying the magic number and codec tag
//! - **Data Plane**: length-prefixed (header, body) frames in the negotiated
//!   codec (MessagePack or JSON)
//!
//! ## Example
//!
//! ```no_run
//! use rpcwire::{Client, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { Server::new().accept(listener).await });
//!
//!     let client = Client::dial(addr, None).await?;
//!     let reply: String = client.call("Foo.Sum", "req 1").await?;
//!     assert_eq!(reply, "rpcwire resp 1");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod control;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;
mod writer;

pub use client::{Call, Client, ClientBuilder};
pub use codec::CodecType;
pub use control::HandshakeOption;
pub use error::{Result, RpcError};
pub use handler::{handler_fn, Handler, Request};
pub use protocol::Header;
pub use server::{Server, ServerBuilder, ServerConfig, DEFAULT_MAX_CONCURRENT_HANDLERS};
