//! Deterministic simulation harness for the tellerframe endpoints.
//!
//! The endpoints are responders; this crate supplies everything on the
//! other side of the link:
//!
//! - [`controller`]: a scripted controller that speaks the handshake and
//!   both endpoint exchanges
//! - [`model`]: a reference model of card and vault behaviour with
//!   generated [`Operation`]s
//! - [`atm`]: executes model operations through a pair of controllers
//! - [`sim_transport`] / [`sim_store`]: turmoil links and inspectable or
//!   failing stores
//! - [`scenario`]: declarative turmoil scenarios checked by oracles

#![forbid(unsafe_code)]

pub mod atm;
pub mod controller;
pub mod model;
pub mod scenario;
pub mod sim_store;
pub mod sim_transport;

pub use atm::{Atm, AtmError};
pub use controller::{CardOp, Controller, ControllerError, Withdrawal};
pub use model::{IdentityQuery, ModelPin, ModelWorld, Observation, Operation};
pub use sim_store::{PowerCutStore, SharedStore};
pub use sim_transport::SimTransport;
