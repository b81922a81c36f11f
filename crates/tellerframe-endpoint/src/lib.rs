//! tellerframe endpoint process
//!
//! Runs one card or security module endpoint against a real controller.
//!
//! # Components
//!
//! - [`config`]: clap arguments and their validated form
//! - [`store`]: redb-backed [`tellerframe_core::PersistentStore`]
//! - [`transport`]: serial device and TCP transports
//!
//! [`serve`] wires them to a [`tellerframe_core::Runtime`] and runs until the
//! session limit, Ctrl-C, or a fatal error.

pub mod config;
pub mod store;
pub mod transport;

use std::io;

pub use config::{Args, EndpointConfig, EndpointConfigError, LinkConfig};
pub use store::{RedbStore, RedbStoreError};
use tellerframe_core::{Card, Endpoint, Runtime, RuntimeError, Transport, Vault};
use tellerframe_proto::{Framer, Role};
use thiserror::Error;
use tracing::{info, warn};
pub use transport::{DeviceTransport, TcpTransport};

/// Fatal endpoint failure.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The store could not be opened.
    #[error("store: {0}")]
    Store(#[from] RedbStoreError),

    /// The link could not be set up.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    /// The session loop stopped on a fatal error.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Run the configured endpoint until the session limit, Ctrl-C, or a fatal
/// error.
pub async fn serve(config: &EndpointConfig) -> Result<(), ServeError> {
    let store = RedbStore::open(&config.store_path)?;
    info!(role = %config.role, store = %config.store_path.display(), "store opened");

    match config.role {
        Role::Card => serve_endpoint(Card::new(), store, config).await,
        Role::SecurityModule => serve_endpoint(Vault::new(), store, config).await,
    }
}

async fn serve_endpoint<E: Endpoint>(
    endpoint: E,
    store: RedbStore,
    config: &EndpointConfig,
) -> Result<(), ServeError> {
    let mut runtime = Runtime::new(endpoint, store, config.runtime);

    match &config.link {
        LinkConfig::Listen(addr) => {
            let transport = TcpTransport::bind(*addr).await?;
            info!(addr = %transport.local_addr()?, "waiting for controller");
            attach_and_run(&mut runtime, &transport).await
        },
        LinkConfig::Device(path) => {
            attach_and_run(&mut runtime, &DeviceTransport::new(path)).await
        },
    }
}

async fn attach_and_run<E: Endpoint, T: Transport>(
    runtime: &mut Runtime<E, RedbStore>,
    transport: &T,
) -> Result<(), ServeError> {
    let (reader, writer) = transport.attach().await?;
    let mut framer = Framer::new(reader, writer);
    runtime.run_until(&mut framer, ctrl_c()).await?;
    info!(sessions = runtime.sessions(), "endpoint stopped");
    Ok(())
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
