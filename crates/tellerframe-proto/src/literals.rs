//! ASCII literals exchanged on the link.
//!
//! The controller appends a NUL terminator to most of what it sends, the
//! endpoints never do. [`matches`] compares only the bytes in front of the
//! first NUL so both spellings are accepted.

/// Controller asks the endpoint to start a handshake.
pub const READY: &[u8] = b"READY";

/// Controller confirms the mode announcement.
pub const GO: &[u8] = b"GO";

/// Endpoint announces that it is waiting to be provisioned.
pub const PROVISION: &[u8] = b"P";

/// Generic acknowledgement, used in both directions.
pub const ACK: &[u8] = b"K";

/// PIN accepted.
pub const PIN_OK: &[u8] = b"OK";

/// PIN, UUID or withdrawal rejected.
pub const REJECT: &[u8] = b"BAD";

/// PIN change stored.
pub const PIN_CHANGED: &[u8] = b"SUCCESS";

/// Command byte selecting a PIN change on the card.
pub const CHANGE_PIN_OPCODE: u8 = b'3';

/// Width of a bill record.
pub const BILL_LEN: usize = 16;

/// Contents of a bill slot that holds no bill.
pub const EMPTY_BILL: [u8; BILL_LEN] = *b"*****EMPTY*****\0";

/// Bytes of `payload` up to (not including) the first NUL.
pub fn cstr(payload: &[u8]) -> &[u8] {
    match payload.iter().position(|&b| b == 0) {
        Some(end) => &payload[..end],
        None => payload,
    }
}

/// Whether `payload` spells `literal`, ignoring a NUL terminator and
/// anything after it.
pub fn matches(payload: &[u8], literal: &[u8]) -> bool {
    cstr(payload) == literal
}
