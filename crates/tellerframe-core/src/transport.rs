//! Transport abstraction for the serial link.
//!
//! Abstracts over anything that can hand the runtime one full-duplex byte
//! stream to the controller. Production uses a serial device or a TCP bridge
//! in front of one, tests use Turmoil (simulated TCP).

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of a link to the controller.
///
/// The link carries no framing or session state of its own: the runtime
/// layers length-prefixed frames on top and recovers alignment with the
/// handshake. `attach` is called once per runtime, and again only if the
/// caller chooses to restart after a fatal transport error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Read half of the link.
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Write half of the link.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Wait until the controller is reachable and return both halves.
    ///
    /// Blocks until a device is opened or a peer connects.
    async fn attach(&self) -> io::Result<(Self::Reader, Self::Writer)>;
}
