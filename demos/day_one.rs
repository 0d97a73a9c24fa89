//! Day One - a server and a client in one process.
//!
//! This example demonstrates:
//! - Starting a server on a loopback TCP port
//! - Dialing it with the default handshake option
//! - Five synchronous calls, each waiting for its own reply
//!
//! # Running
//!
//! ```text
//! cargo run --example day_one
//! ```

use rpcwire::{Client, Server};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!("start rpc server on {}", addr);
    tokio::spawn(async move { Server::new().accept(listener).await });

    let client = Client::dial(addr, None).await?;

    for i in 0..5 {
        let args = format!("rpcwire req {}", i);
        let reply: String = client.call("Foo.Sum", &args).await?;
        tracing::info!("reply: {}", reply);
    }

    client.close()?;
    Ok(())
}
