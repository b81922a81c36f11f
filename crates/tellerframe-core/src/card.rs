//! Card endpoint: PIN verification and account identity.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐  on_synced / "P"  ┌─────────────────┐ PIN / "K" ┌──────────────────┐
//! │ Unprovisioned │──────────────────>│ ProvisioningPin │──────────>│ ProvisioningUuid │
//! └───────────────┘                   └─────────────────┘           └──────────────────┘
//!                                                                            │ UUID / "K"
//!                                                                            v
//! ┌──────┐  on_synced  ┌────────────┐  PIN ok / "OK"  ┌─────────────────┐   end
//! │ Idle │────────────>│ AwaitingPin│────────────────>│ AwaitingCommand │
//! └──────┘             └────────────┘                 └─────────────────┘
//!    ^                       │ PIN bad / "BAD"          │ "3"     │ other
//!    │                       v                          v         v
//!    └──────────────────── end <──── "SUCCESS" ── ChangingPin   UUID
//! ```
//!
//! The PIN is compared with C `strncmp` semantics over 8 bytes: comparison
//! stops at the first NUL, and a short message compares as if padded with
//! NULs. A mismatch is answered with `"BAD"` and ends the session. There is
//! no attempt counter.

use std::fmt;

use tellerframe_proto::{Role, SessionMode, literals};

use crate::{
    endpoint::{Endpoint, EndpointAction, Rejection, SessionOutcome},
    error::EndpointError,
    store::{Block, PersistentStore, RecordKey},
};

/// Width of the stored PIN.
pub const PIN_LEN: usize = 8;

/// Width of the account UUID returned to the controller.
pub const UUID_LEN: usize = 36;

/// Card position within the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// Not provisioned, waiting for the provisioning handshake
    Unprovisioned,
    /// Sent `"P"`, waiting for the initial PIN
    ProvisioningPin,
    /// PIN stored, waiting for the account UUID
    ProvisioningUuid,
    /// Provisioned, waiting for a normal handshake
    Idle,
    /// Waiting for the PIN to verify
    AwaitingPin,
    /// PIN accepted, waiting for a command byte
    AwaitingCommand,
    /// Waiting for the replacement PIN
    ChangingPin,
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Card endpoint state machine.
#[derive(Debug, Clone)]
pub struct Card {
    state: CardState,
}

impl Card {
    /// Create a card that has not yet inspected its store.
    pub fn new() -> Self {
        Self { state: CardState::Unprovisioned }
    }

    /// Current state.
    pub fn state(&self) -> CardState {
        self.state
    }

    fn invalid(&self, operation: &'static str) -> EndpointError {
        EndpointError::InvalidState { state: self.state.to_string(), operation }
    }

    fn store_pin<S: PersistentStore>(store: &mut S, payload: &[u8]) -> Result<(), EndpointError> {
        store.write(RecordKey::Pin, &Block::from_field(&fixed_width::<PIN_LEN>(payload))?)?;
        Ok(())
    }

    fn provisioning_pin<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        Self::store_pin(store, payload)?;
        self.state = CardState::ProvisioningUuid;
        Ok(vec![EndpointAction::send(literals::ACK)])
    }

    fn provisioning_uuid<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        store.write(RecordKey::Uuid, &Block::from_field(&fixed_width::<UUID_LEN>(payload))?)?;
        store.mark_provisioned()?;
        self.state = CardState::Idle;
        Ok(vec![
            EndpointAction::send(literals::ACK),
            EndpointAction::EndSession(SessionOutcome::Provisioned),
        ])
    }

    fn verify_pin<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        let stored = store.read(RecordKey::Pin)?;
        if pin_matches(payload, stored.field(PIN_LEN)) {
            self.state = CardState::AwaitingCommand;
            Ok(vec![EndpointAction::send(literals::PIN_OK)])
        } else {
            self.state = CardState::Idle;
            Ok(vec![
                EndpointAction::send(literals::REJECT),
                EndpointAction::EndSession(SessionOutcome::Rejected(Rejection::AuthMismatch)),
            ])
        }
    }

    fn command<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        let ack = EndpointAction::send(literals::ACK);

        if payload.first() == Some(&literals::CHANGE_PIN_OPCODE) {
            self.state = CardState::ChangingPin;
            return Ok(vec![ack]);
        }

        let uuid = store.read(RecordKey::Uuid)?;
        self.state = CardState::Idle;
        Ok(vec![
            ack,
            EndpointAction::send(uuid.field(UUID_LEN).to_vec()),
            EndpointAction::EndSession(SessionOutcome::IdentityReturned),
        ])
    }

    fn change_pin<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        Self::store_pin(store, payload)?;
        self.state = CardState::Idle;
        Ok(vec![
            EndpointAction::send(literals::PIN_CHANGED),
            EndpointAction::EndSession(SessionOutcome::PinChanged),
        ])
    }
}

impl Default for Card {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for Card {
    fn role(&self) -> Role {
        Role::Card
    }

    fn begin_session<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<SessionMode, EndpointError> {
        if store.is_provisioned()? {
            self.state = CardState::Idle;
            Ok(SessionMode::Normal)
        } else {
            self.state = CardState::Unprovisioned;
            Ok(SessionMode::Provisioning)
        }
    }

    fn on_synced<S: PersistentStore>(
        &mut self,
        _store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        match self.state {
            CardState::Unprovisioned => {
                self.state = CardState::ProvisioningPin;
                Ok(vec![EndpointAction::send(literals::PROVISION)])
            },
            CardState::Idle => {
                self.state = CardState::AwaitingPin;
                Ok(Vec::new())
            },
            _ => Err(self.invalid("on_synced")),
        }
    }

    fn handle_message<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        match self.state {
            CardState::ProvisioningPin => self.provisioning_pin(payload, store),
            CardState::ProvisioningUuid => self.provisioning_uuid(payload, store),
            CardState::AwaitingPin => self.verify_pin(payload, store),
            CardState::AwaitingCommand => self.command(payload, store),
            CardState::ChangingPin => self.change_pin(payload, store),
            CardState::Unprovisioned | CardState::Idle => Err(self.invalid("handle_message")),
        }
    }
}

/// Truncate or zero-pad `payload` to exactly `N` bytes.
fn fixed_width<const N: usize>(payload: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let len = payload.len().min(N);
    out[..len].copy_from_slice(&payload[..len]);
    out
}

/// `strncmp(candidate, stored, PIN_LEN) == 0`.
fn pin_matches(candidate: &[u8], stored: &[u8]) -> bool {
    for i in 0..PIN_LEN {
        let a = candidate.get(i).copied().unwrap_or(0);
        let b = stored.get(i).copied().unwrap_or(0);
        if a != b {
            return false;
        }
        if a == 0 {
            return true;
        }
    }
    true
}
