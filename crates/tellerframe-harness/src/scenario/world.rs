//! World state for scenario execution.
//!
//! The World holds a handle to every endpoint's store plus everything the
//! controller observed, so oracles can check durable state and the
//! conversation after the simulation has finished.

use std::collections::HashMap;

use tellerframe_core::{BILL_SLOTS, EndpointError, Ledger, PersistentStore, RecordKey, Vault};
use tellerframe_proto::{Role, literals};

use crate::{
    model::{Observation, Operation},
    sim_store::SharedStore,
};

/// One executed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// What the controller did
    pub operation: Operation,
    /// What the real endpoint answered
    pub observed: Observation,
    /// What the reference model predicted
    pub expected: Observation,
}

/// World state containing all endpoints and the conversation log.
#[derive(Debug, Default)]
pub struct World {
    stores: HashMap<String, SharedStore>,
    roles: HashMap<String, Role>,
    steps: Vec<Step>,
    garbage_echoed: usize,
    ready_sent: HashMap<String, u64>,
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint host and its store.
    pub fn add_endpoint(&mut self, name: String, role: Role, store: SharedStore) {
        self.stores.insert(name.clone(), store);
        self.roles.insert(name, role);
    }

    /// Store of an endpoint host.
    pub fn store(&self, name: &str) -> Option<&SharedStore> {
        self.stores.get(name)
    }

    /// Role of an endpoint host.
    pub fn role(&self, name: &str) -> Option<Role> {
        self.roles.get(name).copied()
    }

    /// Host names of all endpoints, sorted.
    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.keys().cloned().collect();
        names.sort();
        names
    }

    /// First host with `role`, if any.
    pub fn endpoint_with_role(&self, role: Role) -> Option<String> {
        self.endpoint_names().into_iter().find(|name| self.role(name) == Some(role))
    }

    /// Record an executed operation.
    pub fn record_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Executed operations in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Record that a garbage frame came back as an echo.
    pub fn record_garbage_echo(&mut self) {
        self.garbage_echoed += 1;
    }

    /// Number of echoed garbage frames.
    pub fn garbage_echoed(&self) -> usize {
        self.garbage_echoed
    }

    /// Record how many `READY` frames the controller sent to a host.
    pub fn record_ready_sent(&mut self, name: &str, count: u64) {
        self.ready_sent.insert(name.to_string(), count);
    }

    /// `READY` frames the controller sent to a host.
    pub fn ready_sent(&self, name: &str) -> u64 {
        self.ready_sent.get(name).copied().unwrap_or(0)
    }

    /// Whether the endpoint on `name` has completed provisioning.
    pub fn is_provisioned(&self, name: &str) -> Result<bool, EndpointError> {
        match self.store(name) {
            Some(store) => Ok(store.is_provisioned()?),
            None => Ok(false),
        }
    }

    /// Vault ledger on `name`.
    pub fn ledger(&self, name: &str) -> Result<Option<Ledger>, EndpointError> {
        self.store(name).map(Ledger::load).transpose()
    }

    /// Slots on `name` that do not hold the empty sentinel.
    pub fn loaded_slots(&self, name: &str) -> Result<Option<usize>, EndpointError> {
        self.store(name).map(Vault::loaded_slots).transpose()
    }

    /// Whether every one of the next `bills_left` slots from the cursor
    /// still holds a bill.
    pub fn ledger_backed_by_bills(&self, name: &str) -> Result<bool, EndpointError> {
        let Some(store) = self.store(name) else {
            return Ok(true);
        };
        let ledger = Ledger::load(store)?;

        for offset in 0..ledger.bills_left as usize {
            let slot = ((ledger.cursor as usize + offset) % BILL_SLOTS) as u8;
            let block = store.read(RecordKey::Bill(slot))?;
            if block.field(literals::BILL_LEN) == literals::EMPTY_BILL {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
