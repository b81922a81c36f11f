//! Reusable oracles.
//!
//! Each function returns an [`OracleFn`] so scenarios can combine them with
//! [`all_of`] or pass a closure of their own.

use tellerframe_proto::Role;

use crate::{model::Observation, scenario::OracleFn};

/// Run every oracle in order and fail on the first failure.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in &oracles {
            oracle(world)?;
        }
        Ok(())
    })
}

/// Every observation equals the reference model's prediction.
pub fn observations_match_model() -> OracleFn {
    Box::new(|world| {
        for (index, step) in world.steps().iter().enumerate() {
            if step.observed != step.expected {
                return Err(format!(
                    "step {index} {:?}: observed {:?}, model expected {:?}",
                    step.operation, step.observed, step.expected
                ));
            }
        }
        Ok(())
    })
}

/// A provisioned vault's `bills_left` is fully backed by loaded slots
/// starting at the cursor.
pub fn ledger_backed_by_bills() -> OracleFn {
    Box::new(|world| {
        let Some(vault) = world.endpoint_with_role(Role::SecurityModule) else {
            return Ok(());
        };
        if !world.is_provisioned(&vault).map_err(|e| e.to_string())? {
            return Ok(());
        }

        if world.ledger_backed_by_bills(&vault).map_err(|e| e.to_string())? {
            Ok(())
        } else {
            let ledger = world.ledger(&vault).map_err(|e| e.to_string())?;
            Err(format!("vault {vault}: ledger {ledger:?} points at empty slots"))
        }
    })
}

/// Bills handed out plus bills still loaded equals bills provisioned.
pub fn bills_conserved(provisioned: usize) -> OracleFn {
    Box::new(move |world| {
        let Some(vault) = world.endpoint_with_role(Role::SecurityModule) else {
            return Err("no vault in scenario".to_string());
        };

        let dispensed: usize = world
            .steps()
            .iter()
            .map(|step| match &step.observed {
                Observation::Dispensed(bills) => bills.len(),
                _ => 0,
            })
            .sum();
        let loaded = world.loaded_slots(&vault).map_err(|e| e.to_string())?.unwrap_or(0);

        if dispensed + loaded == provisioned {
            Ok(())
        } else {
            Err(format!(
                "vault {vault}: {dispensed} dispensed + {loaded} loaded, {provisioned} provisioned"
            ))
        }
    })
}

/// Every endpoint host in the scenario finished provisioning.
pub fn all_provisioned() -> OracleFn {
    Box::new(|world| {
        for name in world.endpoint_names() {
            if !world.is_provisioned(&name).map_err(|e| e.to_string())? {
                return Err(format!("{name} is not provisioned"));
            }
        }
        Ok(())
    })
}
