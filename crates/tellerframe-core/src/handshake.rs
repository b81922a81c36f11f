//! Connection synchronisation for a responder endpoint.
//!
//! The link has no framing recovery of its own: if either side loses track
//! of where it is in an exchange, every following length byte is read at the
//! wrong offset. The handshake is the only recovery mechanism, so it is an
//! unbounded retry loop that accepts anything and only completes on the
//! exact sequence below.
//!
//! # State Machine
//!
//! ```text
//!               other / echo it back
//!                  ┌──────┐
//!                  v      │
//! ┌──────────────────┐  READY / announce mode  ┌────────────┐  GO   ┌────────┐
//! │  AwaitingReady   │────────────────────────>│ AwaitingGo │──────>│ Synced │
//! └──────────────────┘                         └────────────┘       └────────┘
//!          ^                                         │
//!          └─────────────── other (no echo) ─────────┘
//! ```
//!
//! A `READY` that arrives while waiting for `GO` is not special: it is
//! consumed as a desync and the machine waits for a fresh `READY`.

use std::fmt;

use bytes::Bytes;
use tellerframe_proto::{Role, SessionMode, literals};

use crate::error::EndpointError;

/// Handshake position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for `READY`
    AwaitingReady,
    /// Mode announced, waiting for `GO`
    AwaitingGo,
    /// Controller confirmed, session established
    Synced,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a handshake round was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesyncReason {
    /// Expected `READY`, the message was echoed back
    NotReady,
    /// Expected `GO`, waiting for `READY` again
    NotGo,
}

/// Per-connection state fixed by a completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Mode for the remainder of the session
    pub mode: SessionMode,
    /// Whether the controller confirmed with `GO`
    pub synced: bool,
}

/// Actions produced by the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send this payload as one frame.
    Send(Bytes),
    /// A round was abandoned; informational.
    Resync(DesyncReason),
    /// The session is established.
    Synced(Session),
}

/// Responder side of the READY / mode / GO exchange.
#[derive(Debug, Clone)]
pub struct Handshake {
    role: Role,
    mode: SessionMode,
    state: HandshakeState,
    desyncs: u64,
}

impl Handshake {
    /// Create a handshake that will announce `mode` for `role`.
    pub fn new(role: Role, mode: SessionMode) -> Self {
        Self { role, mode, state: HandshakeState::AwaitingReady, desyncs: 0 }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Session as seen so far.
    pub fn session(&self) -> Session {
        Session { mode: self.mode, synced: self.state == HandshakeState::Synced }
    }

    /// Number of abandoned rounds.
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Feed one received payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the handshake has already completed.
    pub fn handle_message(
        &mut self,
        payload: &[u8],
    ) -> Result<Vec<HandshakeAction>, EndpointError> {
        match self.state {
            HandshakeState::AwaitingReady => {
                if literals::matches(payload, literals::READY) {
                    self.state = HandshakeState::AwaitingGo;
                    let announce = Bytes::from_static(self.role.announcement(self.mode));
                    Ok(vec![HandshakeAction::Send(announce)])
                } else {
                    self.desyncs += 1;
                    Ok(vec![
                        HandshakeAction::Send(Bytes::copy_from_slice(payload)),
                        HandshakeAction::Resync(DesyncReason::NotReady),
                    ])
                }
            },
            HandshakeState::AwaitingGo => {
                if literals::matches(payload, literals::GO) {
                    self.state = HandshakeState::Synced;
                    Ok(vec![HandshakeAction::Synced(self.session())])
                } else {
                    self.state = HandshakeState::AwaitingReady;
                    self.desyncs += 1;
                    Ok(vec![HandshakeAction::Resync(DesyncReason::NotGo)])
                }
            },
            HandshakeState::Synced => Err(EndpointError::InvalidState {
                state: self.state.to_string(),
                operation: "handshake_message",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sent(actions: &[HandshakeAction]) -> Vec<&[u8]> {
        actions
            .iter()
            .filter_map(|a| match a {
                HandshakeAction::Send(b) => Some(b.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn clean_handshake() {
        let mut hs = Handshake::new(Role::SecurityModule, SessionMode::Normal);

        let actions = hs.handle_message(b"READY\0").unwrap();
        assert_eq!(sent(&actions), vec![&b"HSM_N"[..]]);
        assert_eq!(hs.state(), HandshakeState::AwaitingGo);

        let actions = hs.handle_message(b"GO\0").unwrap();
        assert_eq!(
            actions,
            vec![HandshakeAction::Synced(Session { mode: SessionMode::Normal, synced: true })]
        );
        assert_eq!(hs.desyncs(), 0);
    }

    #[test]
    fn card_announces_its_own_literal() {
        let mut hs = Handshake::new(Role::Card, SessionMode::Provisioning);
        let actions = hs.handle_message(b"READY").unwrap();
        assert_eq!(sent(&actions), vec![&b"CARD_P"[..]]);
    }

    #[test]
    fn garbage_is_echoed() {
        let mut hs = Handshake::new(Role::Card, SessionMode::Normal);

        let actions = hs.handle_message(b"\x17junk").unwrap();
        assert_eq!(sent(&actions), vec![&b"\x17junk"[..]]);
        assert!(actions.contains(&HandshakeAction::Resync(DesyncReason::NotReady)));
        assert_eq!(hs.state(), HandshakeState::AwaitingReady);
    }

    #[test]
    fn bad_go_restarts_without_echo() {
        let mut hs = Handshake::new(Role::Card, SessionMode::Normal);
        hs.handle_message(b"READY").unwrap();

        let actions = hs.handle_message(b"NO").unwrap();
        assert!(sent(&actions).is_empty());
        assert_eq!(hs.state(), HandshakeState::AwaitingReady);
    }

    #[test]
    fn ready_while_awaiting_go_is_desync() {
        let mut hs = Handshake::new(Role::SecurityModule, SessionMode::Provisioning);
        hs.handle_message(b"READY").unwrap();

        let actions = hs.handle_message(b"READY").unwrap();
        assert_eq!(actions, vec![HandshakeAction::Resync(DesyncReason::NotGo)]);
        assert_eq!(hs.state(), HandshakeState::AwaitingReady);

        // A GO now is not enough, a fresh READY is required first
        let actions = hs.handle_message(b"GO").unwrap();
        assert_eq!(sent(&actions), vec![&b"GO"[..]]);
        assert!(!hs.session().synced);
    }

    #[test]
    fn message_after_sync_is_invalid() {
        let mut hs = Handshake::new(Role::Card, SessionMode::Normal);
        hs.handle_message(b"READY").unwrap();
        hs.handle_message(b"GO").unwrap();

        let result = hs.handle_message(b"READY");
        assert!(matches!(result, Err(EndpointError::InvalidState { .. })));
    }

    proptest! {
        /// Any garbage prefix followed by READY/GO synchronises, and every
        /// garbage message costs at most one retry.
        #[test]
        fn prop_resyncs_after_garbage(
            garbage in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 0..20)
        ) {
            let mut hs = Handshake::new(Role::SecurityModule, SessionMode::Normal);

            for msg in &garbage {
                if hs.state() == HandshakeState::Synced {
                    break;
                }
                hs.handle_message(msg).unwrap();
            }
            // Garbage may end mid-round; one extra READY/GO pair is always
            // enough to come back.
            for msg in [&b"READY"[..], b"GO", b"READY", b"GO"] {
                if hs.state() == HandshakeState::Synced {
                    break;
                }
                hs.handle_message(msg).unwrap();
            }

            prop_assert_eq!(hs.state(), HandshakeState::Synced);
            prop_assert!(hs.desyncs() <= garbage.len() as u64 + 2);
        }
    }
}
