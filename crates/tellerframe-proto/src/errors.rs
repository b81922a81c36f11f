//! Error types for framing and wire-level validation.

use std::io;

use thiserror::Error;

/// Result alias for wire-level operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Violations of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A length byte declared more bytes than the receive buffer can hold.
    #[error("frame declares {declared} bytes but receive capacity is {capacity}")]
    LengthExceedsCapacity {
        /// Length announced by the frame's length byte
        declared: usize,
        /// Capacity supplied by the receiver
        capacity: usize,
    },

    /// An outgoing message does not fit behind a one-byte length prefix.
    #[error("message of {len} bytes exceeds the {max} byte frame limit")]
    MessageTooLong {
        /// Length of the rejected message
        len: usize,
        /// Largest encodable payload
        max: usize,
    },

    /// A fixed-width field arrived wider than its storage slot.
    #[error("{field} is {len} bytes, at most {max} allowed")]
    FieldTooLong {
        /// Name of the field being written
        field: &'static str,
        /// Received width
        len: usize,
        /// Slot width
        max: usize,
    },

    /// The peer sent something other than what the protocol position
    /// requires.
    ///
    /// Raised by the initiating side. Responders never fail on unexpected
    /// input during the handshake; they echo it or fall back to waiting for
    /// `READY`.
    #[error("desynchronised: expected {expected}, got {got:?}")]
    Desync {
        /// Literal or message class that was expected
        expected: &'static str,
        /// Raw bytes that arrived instead
        got: Vec<u8>,
    },
}

/// Failure of a framed receive or send.
///
/// Transport failures are fatal for the endpoint. Protocol failures abort the
/// current session only.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying byte stream failed or closed.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    /// The bytes on the link violated the framing rules.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl FrameError {
    /// Whether the error ends the endpoint rather than just the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
