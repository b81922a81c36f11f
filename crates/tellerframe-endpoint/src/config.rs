//! Command-line configuration.
//!
//! [`Args`] is what clap parses; [`EndpointConfig`] is the validated form the
//! process runs with. Validation happens before any file or socket is opened.

use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};
use tellerframe_core::RuntimeConfig;
use tellerframe_proto::{DEFAULT_CAPACITY, MAX_PAYLOAD, Role};
use thiserror::Error;

/// Smallest receive capacity that still fits every field the controller
/// sends (a NUL-terminated 36 byte vault UUID).
pub const MIN_RECEIVE_CAPACITY: usize = 37;

/// Endpoint role on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// PIN and account identity token
    Card,
    /// Cash vault
    SecurityModule,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Card => Self::Card,
            RoleArg::SecurityModule => Self::SecurityModule,
        }
    }
}

/// tellerframe endpoint process.
#[derive(Debug, Clone, Parser)]
#[command(name = "tellerframe-endpoint", version, about)]
pub struct Args {
    /// Which endpoint to run.
    #[arg(long, value_enum)]
    pub role: RoleArg,

    /// Path of the redb file holding durable state.
    #[arg(long)]
    pub store: PathBuf,

    /// Accept the controller on this TCP address.
    #[arg(long, conflicts_with = "device")]
    pub listen: Option<SocketAddr>,

    /// Talk to the controller over this serial device.
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Largest frame payload accepted from the controller.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub receive_capacity: usize,

    /// Exit after this many sessions.
    #[arg(long)]
    pub sessions: Option<u64>,

    /// Log filter, overrides `RUST_LOG` (e.g. `debug`, `tellerframe_core=trace`).
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Where the controller is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    /// TCP listen address
    Listen(SocketAddr),
    /// Serial device path
    Device(PathBuf),
}

/// Validated process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint role
    pub role: Role,
    /// redb file
    pub store_path: PathBuf,
    /// Controller link
    pub link: LinkConfig,
    /// Session loop settings
    pub runtime: RuntimeConfig,
}

/// Rejected configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointConfigError {
    /// Neither `--listen` nor `--device` was given.
    #[error("one of --listen or --device is required")]
    MissingLink,

    /// Capacity outside what the protocol can carry.
    #[error("receive capacity {capacity} outside {min}..={max}")]
    CapacityOutOfRange {
        /// Requested capacity
        capacity: usize,
        /// Smallest allowed
        min: usize,
        /// Largest allowed
        max: usize,
    },

    /// `--sessions 0` would exit before doing anything.
    #[error("session limit must be at least 1")]
    ZeroSessionLimit,
}

impl TryFrom<Args> for EndpointConfig {
    type Error = EndpointConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let link = match (args.listen, args.device) {
            (Some(addr), _) => LinkConfig::Listen(addr),
            (None, Some(path)) => LinkConfig::Device(path),
            (None, None) => return Err(EndpointConfigError::MissingLink),
        };

        if !(MIN_RECEIVE_CAPACITY..=MAX_PAYLOAD).contains(&args.receive_capacity) {
            return Err(EndpointConfigError::CapacityOutOfRange {
                capacity: args.receive_capacity,
                min: MIN_RECEIVE_CAPACITY,
                max: MAX_PAYLOAD,
            });
        }

        if args.sessions == Some(0) {
            return Err(EndpointConfigError::ZeroSessionLimit);
        }

        Ok(Self {
            role: args.role.into(),
            store_path: args.store,
            link,
            runtime: RuntimeConfig {
                receive_capacity: args.receive_capacity,
                session_limit: args.sessions,
            },
        })
    }
}
