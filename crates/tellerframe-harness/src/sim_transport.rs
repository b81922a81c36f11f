//! Turmoil-backed transport.
//!
//! Each simulated endpoint host binds a listener and waits for the
//! controller host to connect, standing in for the serial cable.

use std::io;

use async_trait::async_trait;
use tellerframe_core::Transport;
use tokio::io::{ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

/// Port every simulated endpoint listens on.
pub const ENDPOINT_PORT: u16 = 7000;

/// Simulated link listener.
pub struct SimTransport {
    listener: TcpListener,
}

impl SimTransport {
    /// Bind the listener inside the current simulated host.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Bind on [`ENDPOINT_PORT`] on all interfaces.
    pub async fn bind_default() -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", ENDPOINT_PORT)).await?;
        Ok(Self { listener })
    }

    /// Connect to an endpoint host from the controller side.
    pub async fn connect_to(host: &str) -> io::Result<TcpStream> {
        TcpStream::connect((host, ENDPOINT_PORT)).await
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Reader = ReadHalf<TcpStream>;
    type Writer = WriteHalf<TcpStream>;

    async fn attach(&self) -> io::Result<(Self::Reader, Self::Writer)> {
        let (stream, _peer) = self.listener.accept().await?;
        Ok(tokio::io::split(stream))
    }
}
