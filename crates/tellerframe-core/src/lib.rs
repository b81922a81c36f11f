//! tellerframe protocol core logic
//!
//! Pure state machines for the two responder endpoints of the link, a CARD
//! identity token and a SECURITY_MODULE cash vault, decoupled from I/O so
//! that the same code runs on the device loop and in deterministic tests.
//!
//! # Architecture
//!
//! Every machine consumes one received payload at a time and returns
//! declarative actions ("send these bytes", "the session is over"). Durable
//! state lives behind the [`store::PersistentStore`] handle the caller passes
//! in; the machines themselves only hold the volatile position inside the
//! current session. The [`runtime::Runtime`] is the only component that
//! touches the link: it pulls frames, feeds them to the handshake and then to
//! the endpoint, and executes the actions in order.
//!
//! ```text
//!            ┌───────────┐   Synced    ┌──────────────────┐  EndSession
//! frames ──> │ Handshake │ ──────────> │ Card / Vault     │ ───────────┐
//!            └───────────┘             └──────────────────┘            │
//!                  ^                          │ read/write             │
//!                  │                          v                        │
//!                  │                   PersistentStore                 │
//!                  └───────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`handshake`]: READY / mode / GO synchronisation
//! - [`card`]: PIN and account identity
//! - [`vault`]: bill stack and dispensing
//! - [`endpoint`]: the interface both endpoints implement
//! - [`store`]: block-granular durable storage
//! - [`runtime`]: session loop over a framed link
//! - [`transport`]: link abstraction (serial device, TCP bridge, simulation)
//! - [`error`]: endpoint and runtime error types

pub mod card;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod vault;

pub use card::{Card, CardState};
pub use endpoint::{Endpoint, EndpointAction, Rejection, SessionOutcome};
pub use error::{EndpointError, RuntimeError};
pub use handshake::{Handshake, HandshakeAction, HandshakeState, Session};
pub use runtime::{Runtime, RuntimeConfig};
pub use store::{BILL_SLOTS, BLOCK_SIZE, Block, MemoryStore, PersistentStore, RecordKey, StoreError};
pub use transport::Transport;
pub use vault::{Ledger, Vault, VaultState};
