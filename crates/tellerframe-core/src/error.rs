//! Error types for endpoints and the session runtime.

use std::io;

use tellerframe_proto::{FrameError, ProtocolError};
use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by the handshake and endpoint state machines.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// A message arrived in a state that does not accept one.
    #[error("invalid state {state} for operation {operation}")]
    InvalidState {
        /// Name of the state the machine was in
        state: String,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// The peer sent a malformed field.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Durable storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors escaping the session runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The link failed or closed. Fatal.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    /// The peer violated the wire protocol. Aborts the session only.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A state machine or the store failed.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

impl RuntimeError {
    /// Whether the runtime can continue with a fresh handshake.
    pub fn aborts_session_only(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Endpoint(EndpointError::Protocol(_)))
    }
}

impl From<FrameError> for RuntimeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(e) => Self::Transport(e),
            FrameError::Protocol(e) => Self::Protocol(e),
        }
    }
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        Self::Endpoint(EndpointError::Store(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordKey;

    #[test]
    fn protocol_errors_abort_session_only() {
        let err = RuntimeError::from(FrameError::Protocol(ProtocolError::LengthExceedsCapacity {
            declared: 200,
            capacity: 128,
        }));
        assert!(err.aborts_session_only());

        let err = RuntimeError::from(EndpointError::Protocol(ProtocolError::FieldTooLong {
            field: "bill",
            len: 17,
            max: 16,
        }));
        assert!(err.aborts_session_only());
    }

    #[test]
    fn transport_and_store_errors_are_fatal() {
        let err = RuntimeError::from(FrameError::Transport(io::ErrorKind::UnexpectedEof.into()));
        assert!(!err.aborts_session_only());

        let err = RuntimeError::from(StoreError::PowerLoss(RecordKey::Ledger));
        assert!(!err.aborts_session_only());
    }
}
