//! Scenario framework.
//!
//! ```ignore
//! Scenario::new("withdraw twice")
//!     .vault("vault")
//!     .operations([
//!         Operation::ProvisionVault { bills: 3 },
//!         Operation::Withdraw { amount: 2 },
//!         Operation::Withdraw { amount: 2 },
//!     ])
//!     .oracle(oracle::all_of(vec![
//!         oracle::observations_match_model(),
//!         oracle::bills_conserved(3),
//!     ]))
//!     .run()?;
//! ```

mod builder;
pub mod oracle;
mod world;

pub use builder::{ATM_HOST, RunnableScenario, Scenario};
pub use world::{Step, World};

/// Verification run against the final [`World`].
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
