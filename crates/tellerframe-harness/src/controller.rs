//! Scripted controller (the ATM / bank side of the link).
//!
//! The endpoints are responders; this is the initiator they are built for.
//! It is used by simulations and tests only.
//!
//! # Synchronisation
//!
//! [`Controller::sync`] repeats `READY` until the endpoint answers with the
//! expected mode literal, then confirms with `GO`. Echoed garbage and silence
//! (after `reply_timeout`) both cause another `READY`. If the endpoint
//! announces the other mode of the expected role, the controller declines
//! with a non-`GO` frame, which the endpoint consumes without replying, and
//! reports [`ControllerError::AlreadyProvisioned`] or
//! [`ControllerError::NotProvisioned`].

use std::time::Duration;

use bytes::Bytes;
use tellerframe_proto::{
    FrameError, Framer, MAX_PAYLOAD, ProtocolError, Role, SessionMode, literals,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// How long `sync` waits for a reply before sending `READY` again.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

const READY: &[u8] = b"READY\0";
const GO: &[u8] = b"GO\0";

/// Controller failures.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The link failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The endpoint replied with something the exchange does not allow.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Provisioning was requested but the endpoint announced normal mode.
    #[error("{role} is already provisioned")]
    AlreadyProvisioned {
        /// Endpoint role
        role: Role,
    },

    /// A normal exchange was requested but the endpoint wants provisioning.
    #[error("{role} is not provisioned")]
    NotProvisioned {
        /// Endpoint role
        role: Role,
    },
}

/// Card operations selectable after a successful PIN check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardOp {
    /// Read the account UUID for a balance query
    CheckBalance,
    /// Read the account UUID for a withdrawal
    Withdraw,
    /// Replace the PIN
    ChangePin,
}

impl CardOp {
    /// Command byte on the wire.
    pub fn opcode(self) -> u8 {
        match self {
            Self::CheckBalance => b'1',
            Self::Withdraw => b'2',
            Self::ChangePin => literals::CHANGE_PIN_OPCODE,
        }
    }
}

/// Result of a vault withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawal {
    /// Bills in dispensing order
    Dispensed(Vec<Bytes>),
    /// The vault did not recognise the UUID
    UnknownVault,
    /// More bills were asked for than the vault holds
    InsufficientBills,
}

/// Initiator side of the link.
#[derive(Debug)]
pub struct Controller<R, W> {
    framer: Framer<R, W>,
    reply_timeout: Duration,
    ready_sent: u64,
}

impl<R, W> Controller<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap both halves of a link.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framer: Framer::new(reader, writer),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            ready_sent: 0,
        }
    }

    /// Override how long `sync` waits before retrying.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Number of `READY` frames sent so far.
    pub fn ready_sent(&self) -> u64 {
        self.ready_sent
    }

    /// Send one raw frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ControllerError> {
        self.framer.send(payload).await?;
        Ok(())
    }

    /// Receive one frame.
    pub async fn receive(&mut self) -> Result<Bytes, ControllerError> {
        Ok(self.framer.receive(MAX_PAYLOAD).await?)
    }

    /// Send a frame that is not `READY` while the endpoint is between
    /// sessions and read back its echo.
    ///
    /// Only valid when no session is open; anything else would be consumed
    /// by the endpoint exchange instead.
    pub async fn inject_garbage(&mut self, payload: &[u8]) -> Result<(), ControllerError> {
        self.send(payload).await?;
        let echo = self.receive().await?;
        if echo.as_ref() == payload {
            Ok(())
        } else {
            Err(ProtocolError::Desync { expected: "echo", got: echo.to_vec() }.into())
        }
    }

    async fn expect(
        &mut self,
        literal: &'static [u8],
        name: &'static str,
    ) -> Result<(), ControllerError> {
        let reply = self.receive().await?;
        if literals::matches(&reply, literal) {
            Ok(())
        } else {
            Err(ProtocolError::Desync { expected: name, got: reply.to_vec() }.into())
        }
    }

    async fn expect_ack(&mut self) -> Result<(), ControllerError> {
        self.expect(literals::ACK, "K").await
    }

    /// Send `READY` until any mode announcement comes back.
    async fn announce_round(&mut self) -> Result<(Role, SessionMode), ControllerError> {
        loop {
            self.send(READY).await?;
            self.ready_sent += 1;

            // A timed-out receive keeps any partial reply buffered in the framer
            let reply = match tokio::time::timeout(self.reply_timeout, self.receive()).await {
                Ok(reply) => reply?,
                Err(_elapsed) => {
                    debug!(ready_sent = self.ready_sent, "no reply to READY");
                    continue;
                },
            };

            match Role::parse_announcement(&reply) {
                Some(announced) => return Ok(announced),
                None => debug!(len = reply.len(), "ignoring non-announcement"),
            }
        }
    }

    /// Make the endpoint forget a pending announcement without starting a
    /// session.
    async fn decline(&mut self) -> Result<(), ControllerError> {
        self.send(READY).await
    }

    /// Ask which endpoint is on the link and in which mode, leaving it
    /// waiting for a fresh `READY`.
    pub async fn probe(&mut self) -> Result<(Role, SessionMode), ControllerError> {
        let announced = self.announce_round().await?;
        self.decline().await?;
        Ok(announced)
    }

    /// Synchronise with `role` in `mode` and confirm with `GO`.
    pub async fn sync(&mut self, role: Role, mode: SessionMode) -> Result<(), ControllerError> {
        loop {
            let (got_role, got_mode) = self.announce_round().await?;
            if got_role != role {
                continue;
            }
            if got_mode != mode {
                self.decline().await?;
                return Err(match mode {
                    SessionMode::Provisioning => ControllerError::AlreadyProvisioned { role },
                    SessionMode::Normal => ControllerError::NotProvisioned { role },
                });
            }

            self.send(GO).await?;
            return Ok(());
        }
    }

    /// First-boot card provisioning.
    pub async fn provision_card(&mut self, pin: &[u8], uuid: &[u8]) -> Result<(), ControllerError> {
        self.sync(Role::Card, SessionMode::Provisioning).await?;
        self.expect(literals::PROVISION, "P").await?;

        self.send(pin).await?;
        self.expect_ack().await?;

        self.send(uuid).await?;
        self.expect_ack().await
    }

    async fn authenticate_pin(&mut self, pin: &[u8]) -> Result<bool, ControllerError> {
        self.send(pin).await?;
        let reply = self.receive().await?;
        Ok(literals::matches(&reply, literals::PIN_OK))
    }

    async fn send_op(&mut self, op: CardOp) -> Result<(), ControllerError> {
        self.send(&[op.opcode()]).await?;
        self.expect_ack().await
    }

    /// Verify `pin` and read the account UUID. `None` means the PIN was
    /// rejected.
    pub async fn card_identity(
        &mut self,
        pin: &[u8],
        op: CardOp,
    ) -> Result<Option<Bytes>, ControllerError> {
        self.sync(Role::Card, SessionMode::Normal).await?;
        if !self.authenticate_pin(pin).await? {
            return Ok(None);
        }

        self.send_op(op).await?;
        Ok(Some(self.receive().await?))
    }

    /// Verify `old_pin` and replace it. Returns whether the PIN changed.
    pub async fn change_pin(
        &mut self,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<bool, ControllerError> {
        self.sync(Role::Card, SessionMode::Normal).await?;
        if !self.authenticate_pin(old_pin).await? {
            return Ok(false);
        }

        self.send_op(CardOp::ChangePin).await?;
        self.send(new_pin).await?;
        let reply = self.receive().await?;
        Ok(literals::matches(&reply, literals::PIN_CHANGED))
    }

    /// First-boot vault provisioning.
    pub async fn provision_vault(
        &mut self,
        uuid: &[u8],
        bills: &[&[u8]],
    ) -> Result<(), ControllerError> {
        self.sync(Role::SecurityModule, SessionMode::Provisioning).await?;
        self.expect(literals::PROVISION, "P").await?;

        self.send(&nul_terminated(uuid)).await?;
        self.expect_ack().await?;

        self.send(&[bills.len() as u8]).await?;
        self.expect_ack().await?;

        for bill in bills {
            self.send(bill).await?;
            self.expect_ack().await?;
        }
        Ok(())
    }

    /// Open a normal vault session and read the vault's UUID.
    pub async fn vault_uuid(&mut self) -> Result<Bytes, ControllerError> {
        self.sync(Role::SecurityModule, SessionMode::Normal).await?;
        self.receive().await
    }

    /// Complete the session opened by [`Controller::vault_uuid`]: present
    /// `uuid` and ask for `amount` bills.
    pub async fn withdraw(
        &mut self,
        uuid: &[u8],
        amount: u8,
    ) -> Result<Withdrawal, ControllerError> {
        self.send(&nul_terminated(uuid)).await?;
        let reply = self.receive().await?;
        if !literals::matches(&reply, literals::ACK) {
            return Ok(Withdrawal::UnknownVault);
        }

        self.send(&[amount]).await?;
        let reply = self.receive().await?;
        if !literals::matches(&reply, literals::ACK) {
            return Ok(Withdrawal::InsufficientBills);
        }

        let mut bills = Vec::with_capacity(amount as usize);
        for _ in 0..amount {
            bills.push(self.receive().await?);
        }
        Ok(Withdrawal::Dispensed(bills))
    }

    /// Read the vault's UUID and withdraw against it in one session.
    pub async fn withdraw_from_vault(&mut self, amount: u8) -> Result<Withdrawal, ControllerError> {
        let uuid = self.vault_uuid().await?;
        self.withdraw(&uuid, amount).await
    }
}

fn nul_terminated(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len() + 1);
    out.extend_from_slice(field);
    out.push(0);
    out
}
