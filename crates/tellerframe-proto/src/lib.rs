//! Wire format for the tellerframe serial protocol.
//!
//! A frame is a single length byte followed by that many payload bytes. There
//! is no header, checksum, or sequence number: the link is a byte-at-a-time
//! UART and the endpoints on it are small enough that anything more would not
//! fit. Corruption is not detected here; it shows up as a desynchronised
//! handshake and is recovered one layer up.
//!
//! Payloads are either short ASCII literals (`"READY"`, `"K"`, `"BAD"`, ...)
//! or fixed-width fields (PIN, UUID, bill records). The controller on the
//! other side of the link terminates its literals with a NUL byte, so literal
//! comparison only looks at the bytes before the first NUL.
//!
//! # Security
//!
//! Every receive is bounded by a caller-supplied capacity. A length byte that
//! declares more than the receiver can hold is a [`ProtocolError`], never a
//! silent truncation. The oversized payload is drained from the link so the
//! next length byte is still read at a frame boundary.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod literals;
pub mod mode;

pub use codec::Framer;
pub use errors::{FrameError, ProtocolError, Result};
pub use frame::{DEFAULT_CAPACITY, Frame, MAX_PAYLOAD};
pub use mode::{Role, SessionMode};
