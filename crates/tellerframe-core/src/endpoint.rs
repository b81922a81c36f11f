//! Interface shared by the card and the vault.
//!
//! An endpoint is driven in three steps per session:
//!
//! 1. [`Endpoint::begin_session`] inspects the store and picks the mode the
//!    handshake will announce. Work that must happen before the handshake
//!    (the vault clears its bill stack before first provisioning) happens
//!    here.
//! 2. [`Endpoint::on_synced`] runs once the controller confirmed with `GO`.
//! 3. [`Endpoint::handle_message`] is called for every following frame until
//!    an [`EndpointAction::EndSession`] is returned.

use bytes::Bytes;
use tellerframe_proto::{Role, SessionMode};

use crate::{error::EndpointError, store::PersistentStore};

/// Effects requested by an endpoint, executed in order by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAction {
    /// Send this payload as one frame.
    Send(Bytes),

    /// The session is finished; the next frame starts a new handshake.
    EndSession(SessionOutcome),
}

impl EndpointAction {
    pub(crate) fn send(payload: impl Into<Bytes>) -> Self {
        Self::Send(payload.into())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// First-boot provisioning stored all secrets and inventory.
    Provisioned,
    /// The card stored a new PIN.
    PinChanged,
    /// The card returned its account UUID.
    IdentityReturned,
    /// The vault dispensed bills.
    Dispensed {
        /// Number of bills sent
        count: u8,
    },
    /// The request was refused; nothing was mutated.
    Rejected(Rejection),
}

/// Recoverable refusals. Reported to the controller as `"BAD"`.
///
/// There is no attempt counter or lockout behind these: a controller may
/// retry immediately and indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// PIN or UUID did not match the stored value.
    AuthMismatch,
    /// More bills were requested than remain in the vault.
    InsufficientFunds {
        /// Bills asked for
        requested: u8,
        /// Bills remaining
        available: u8,
    },
}

/// A responder endpoint on the serial link.
pub trait Endpoint {
    /// Role announced during the handshake.
    fn role(&self) -> Role;

    /// Start a new session and choose its mode.
    fn begin_session<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<SessionMode, EndpointError>;

    /// Handshake completed; return the endpoint's opening actions.
    fn on_synced<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError>;

    /// Process one frame received during the session.
    fn handle_message<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError>;
}
