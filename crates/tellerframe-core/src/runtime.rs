//! Session loop driving an endpoint over a framed link.
//!
//! The runtime is the only component that performs I/O. One session is:
//!
//! 1. [`Endpoint::begin_session`] picks the mode from the store
//! 2. frames are fed to a fresh [`Handshake`] until it reports `Synced`
//! 3. [`Endpoint::on_synced`], then one [`Endpoint::handle_message`] per
//!    frame until the endpoint returns `EndSession`
//!
//! [`Runtime::run`] repeats sessions forever. Protocol violations (an
//! oversized frame, a provisioning field that does not fit) abort the
//! current session and the next frame starts a new handshake. Transport and
//! store failures are returned to the caller.
//!
//! Every receive blocks without timeout. [`Runtime::run_until`] and
//! [`RuntimeConfig::session_limit`] are the only ways to stop a runtime that
//! is waiting on a silent controller.

use std::future::Future;

use tellerframe_proto::{DEFAULT_CAPACITY, Framer};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::{
    endpoint::{Endpoint, EndpointAction, SessionOutcome},
    error::RuntimeError,
    handshake::{Handshake, HandshakeAction, HandshakeState},
    store::PersistentStore,
    transport::Transport,
};

/// Runtime tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Largest payload accepted from the controller.
    pub receive_capacity: usize,
    /// Stop after this many sessions, counting aborted ones. `None` runs
    /// forever.
    pub session_limit: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { receive_capacity: DEFAULT_CAPACITY, session_limit: None }
    }
}

/// Drives one endpoint and its store.
#[derive(Debug)]
pub struct Runtime<E, S> {
    endpoint: E,
    store: S,
    config: RuntimeConfig,
    sessions: u64,
}

impl<E, S> Runtime<E, S>
where
    E: Endpoint,
    S: PersistentStore,
{
    /// Create a runtime.
    pub fn new(endpoint: E, store: S, config: RuntimeConfig) -> Self {
        Self { endpoint, store, config, sessions: 0 }
    }

    /// Sessions served so far, including aborted ones.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// The endpoint's store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Take the endpoint and store back.
    pub fn into_parts(self) -> (E, S) {
        (self.endpoint, self.store)
    }

    /// Attach to `transport` and run until a fatal error or the session
    /// limit.
    pub async fn serve<T: Transport>(&mut self, transport: &T) -> Result<(), RuntimeError> {
        let (reader, writer) = transport.attach().await?;
        let mut framer = Framer::new(reader, writer);
        self.run(&mut framer).await
    }

    /// Run sessions until `shutdown` resolves, a fatal error occurs, or the
    /// session limit is reached.
    pub async fn run_until<R, W, F>(
        &mut self,
        framer: &mut Framer<R, W>,
        shutdown: F,
    ) -> Result<(), RuntimeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(framer) => result,
            () = shutdown => {
                info!("shutdown requested");
                Ok(())
            },
        }
    }

    /// Run sessions until a fatal error or the session limit.
    pub async fn run<R, W>(&mut self, framer: &mut Framer<R, W>) -> Result<(), RuntimeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while self.config.session_limit.is_none_or(|limit| self.sessions < limit) {
            let result = self.serve_session(framer).await;
            self.sessions += 1;

            match result {
                Ok(outcome) => self.record(outcome),
                Err(err) if err.aborts_session_only() => {
                    warn!(role = %self.endpoint.role(), error = %err, "session aborted");
                },
                Err(err) => return Err(err),
            }
        }

        info!(sessions = self.sessions, "session limit reached");
        Ok(())
    }

    /// Run exactly one session: handshake, then the endpoint exchange.
    pub async fn serve_session<R, W>(
        &mut self,
        framer: &mut Framer<R, W>,
    ) -> Result<SessionOutcome, RuntimeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let role = self.endpoint.role();
        let mode = self.endpoint.begin_session(&mut self.store)?;
        let mut handshake = Handshake::new(role, mode);

        while handshake.state() != HandshakeState::Synced {
            let payload = framer.receive(self.config.receive_capacity).await?;
            for action in handshake.handle_message(&payload)? {
                match action {
                    HandshakeAction::Send(bytes) => framer.send(&bytes).await?,
                    HandshakeAction::Resync(reason) => {
                        debug!(%role, ?reason, desyncs = handshake.desyncs(), "handshake desync");
                    },
                    HandshakeAction::Synced(session) => {
                        debug!(%role, mode = %session.mode, "synced");
                    },
                }
            }
        }

        let mut actions = self.endpoint.on_synced(&mut self.store)?;
        loop {
            for action in actions {
                match action {
                    EndpointAction::Send(bytes) => framer.send(&bytes).await?,
                    EndpointAction::EndSession(outcome) => return Ok(outcome),
                }
            }

            let payload = framer.receive(self.config.receive_capacity).await?;
            actions = self.endpoint.handle_message(&payload, &mut self.store)?;
        }
    }

    fn record(&self, outcome: SessionOutcome) {
        let role = self.endpoint.role();
        match outcome {
            SessionOutcome::Provisioned => info!(%role, "provisioning complete"),
            SessionOutcome::Rejected(rejection) => warn!(%role, ?rejection, "request rejected"),
            SessionOutcome::Dispensed { count } => info!(%role, count, "bills dispensed"),
            SessionOutcome::PinChanged | SessionOutcome::IdentityReturned => {
                info!(%role, ?outcome, "session complete");
            },
        }
    }
}
