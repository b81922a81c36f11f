//! Production transports.
//!
//! - [`DeviceTransport`]: a serial device node (`/dev/ttyACM0`). Line
//!   settings are left to the OS (configure with `stty` beforehand).
//! - [`TcpTransport`]: accepts one controller connection on a TCP port, for
//!   serial-over-network bridges and local testing.

use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tellerframe_core::Transport;
use tokio::{
    fs::{File, OpenOptions},
    io::{ReadHalf, WriteHalf},
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::info;

/// Serial device opened read-write.
#[derive(Debug, Clone)]
pub struct DeviceTransport {
    path: PathBuf,
}

impl DeviceTransport {
    /// Use the device at `path`. Nothing is opened until `attach`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl Transport for DeviceTransport {
    type Reader = ReadHalf<File>;
    type Writer = WriteHalf<File>;

    async fn attach(&self) -> io::Result<(Self::Reader, Self::Writer)> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path).await?;
        info!(device = %self.path.display(), "device attached");
        Ok(tokio::io::split(file))
    }
}

/// TCP listener accepting a single controller.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn attach(&self) -> io::Result<(Self::Reader, Self::Writer)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "controller connected");
        Ok(stream.into_split())
    }
}
