//! Length-prefixed frames.
//!
//! ```text
//! ┌────────┬──────────────────────────┐
//! │ len u8 │ payload (len bytes)      │
//! └────────┴──────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Largest payload a single length byte can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Receive buffer size used by both endpoints.
pub const DEFAULT_CAPACITY: usize = 128;

/// A single message on the serial link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Create a frame, rejecting payloads the length byte cannot describe.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::MessageTooLong { len: payload.len(), max: MAX_PAYLOAD });
        }
        Ok(Self { payload })
    }

    /// Payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        // Length is bounded by the constructor.
        dst.put_u8(self.payload.len() as u8);
        dst.put_slice(&self.payload);
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` without consuming anything when `src` does not yet
    /// hold a complete frame. A length byte larger than `capacity` is
    /// rejected before any payload byte is looked at.
    pub fn decode(src: &mut impl Buf, capacity: usize) -> Result<Option<Self>> {
        if !src.has_remaining() {
            return Ok(None);
        }

        let declared = src.chunk()[0] as usize;
        if declared > capacity {
            return Err(ProtocolError::LengthExceedsCapacity { declared, capacity });
        }

        if src.remaining() < 1 + declared {
            return Ok(None);
        }

        src.advance(1);
        let payload = src.copy_to_bytes(declared);
        Ok(Some(Self { payload }))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}
