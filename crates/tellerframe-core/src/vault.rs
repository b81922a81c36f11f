//! Security module endpoint: vault identity and bill dispensing.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐ "P" ┌──────────────────┐ UUID ┌───────────────────┐ count ┌──────────────┐
//! │ Unprovisioned │────>│ ProvisioningUuid │─────>│ ProvisioningCount │──────>│ LoadingBills │─┐
//! └───────────────┘     └──────────────────┘      └───────────────────┘       └──────────────┘ │
//!                                                                                  bill ^   │  │
//!                                                                                       └───┘  │
//! ┌──────┐ UUID ┌──────────────┐ match ┌──────────────┐ count ok                               │
//! │ Idle │─────>│ AwaitingUuid │──────>│ AwaitingCount│──────────> dispense ──> end <─────────┘
//! └──────┘      └──────────────┘       └──────────────┘
//!                      │ mismatch             │ count > bills_left
//!                      └──> "BAD" end <───────┘
//! ```
//!
//! # Ledger
//!
//! `bills_left` and the dispense cursor live in one [`Ledger`] block so the
//! pair is always written together. A dispense of `M` bills writes, in order:
//!
//! 1. the ledger with `bills_left - M` (cursor unchanged)
//! 2. for each bill: the ledger with the cursor advanced, then the emptied
//!    slot
//!
//! A power cut between any two writes leaves `bills_left` at or below the
//! number of bills still reachable from the cursor. The vault may then
//! refuse a withdrawal it could have served, but never hands out a bill
//! twice.

use std::fmt;

use tellerframe_proto::{ProtocolError, Role, SessionMode, literals};

use crate::{
    endpoint::{Endpoint, EndpointAction, Rejection, SessionOutcome},
    error::EndpointError,
    store::{BILL_SLOTS, Block, PersistentStore, RecordKey},
};

/// Longest vault UUID, excluding its NUL terminator.
pub const UUID_MAX: usize = 36;

/// Durable dispensing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ledger {
    /// Bills that may still be dispensed
    pub bills_left: u8,
    /// Slot the next dispense reads from
    pub cursor: u8,
}

impl Ledger {
    /// Read the ledger from the store.
    pub fn load<S: PersistentStore + ?Sized>(store: &S) -> Result<Self, EndpointError> {
        let block = store.read(RecordKey::Ledger)?;
        let bytes = block.as_bytes();
        Ok(Self { bills_left: bytes[0], cursor: bytes[1] % BILL_SLOTS as u8 })
    }

    /// Persist the ledger as one block.
    pub fn save<S: PersistentStore + ?Sized>(self, store: &mut S) -> Result<(), EndpointError> {
        store.write(RecordKey::Ledger, &Block::from_field(&[self.bills_left, self.cursor])?)?;
        Ok(())
    }

    fn advance(self) -> Self {
        Self { cursor: ((self.cursor as usize + 1) % BILL_SLOTS) as u8, ..self }
    }
}

/// Vault position within the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// Not provisioned, waiting for the provisioning handshake
    Unprovisioned,
    /// Sent `"P"`, waiting for the vault UUID
    ProvisioningUuid,
    /// Waiting for the number of bills to load
    ProvisioningCount,
    /// Receiving bill records
    LoadingBills {
        /// Bills stored so far
        loaded: u8,
        /// Bills announced
        total: u8,
    },
    /// Provisioned, waiting for a normal handshake
    Idle,
    /// UUID sent, waiting for the controller's copy
    AwaitingUuid,
    /// UUID matched, waiting for a withdrawal amount
    AwaitingCount,
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadingBills { loaded, total } => write!(f, "LoadingBills({loaded}/{total})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Security module state machine.
#[derive(Debug, Clone)]
pub struct Vault {
    state: VaultState,
}

impl Vault {
    /// Create a vault that has not yet inspected its store.
    pub fn new() -> Self {
        Self { state: VaultState::Unprovisioned }
    }

    /// Current state.
    pub fn state(&self) -> VaultState {
        self.state
    }

    /// Bill record stored in `slot`.
    pub fn bill<S: PersistentStore + ?Sized>(
        store: &S,
        slot: u8,
    ) -> Result<[u8; literals::BILL_LEN], EndpointError> {
        let block = store.read(RecordKey::Bill(slot))?;
        let mut bill = [0u8; literals::BILL_LEN];
        bill.copy_from_slice(block.field(literals::BILL_LEN));
        Ok(bill)
    }

    /// Number of slots that do not hold the empty sentinel.
    pub fn loaded_slots<S: PersistentStore + ?Sized>(store: &S) -> Result<usize, EndpointError> {
        let mut count = 0;
        for slot in 0..BILL_SLOTS as u8 {
            if Self::bill(store, slot)? != literals::EMPTY_BILL {
                count += 1;
            }
        }
        Ok(count)
    }

    fn invalid(&self, operation: &'static str) -> EndpointError {
        EndpointError::InvalidState { state: self.state.to_string(), operation }
    }

    fn empty_slot<S: PersistentStore>(store: &mut S, slot: u8) -> Result<(), EndpointError> {
        store.write(RecordKey::Bill(slot), &Block::from_field(&literals::EMPTY_BILL)?)?;
        Ok(())
    }

    fn provisioning_uuid<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        let uuid = literals::cstr(payload);
        if uuid.len() > UUID_MAX {
            return Err(ProtocolError::FieldTooLong { field: "uuid", len: uuid.len(), max: UUID_MAX }
                .into());
        }

        store.write(RecordKey::Uuid, &Block::from_field(uuid)?)?;
        self.state = VaultState::ProvisioningCount;
        Ok(vec![EndpointAction::send(literals::ACK)])
    }

    fn provisioning_count<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        let total = payload.first().copied().unwrap_or(0);
        if total as usize > BILL_SLOTS {
            return Err(ProtocolError::FieldTooLong {
                field: "bill count",
                len: total as usize,
                max: BILL_SLOTS,
            }
            .into());
        }

        Ledger { bills_left: total, cursor: 0 }.save(store)?;

        let mut actions = vec![EndpointAction::send(literals::ACK)];
        if total == 0 {
            actions.extend(self.finish_provisioning(store)?);
        } else {
            self.state = VaultState::LoadingBills { loaded: 0, total };
        }
        Ok(actions)
    }

    fn load_bill<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
        loaded: u8,
        total: u8,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        if payload.len() > literals::BILL_LEN {
            return Err(ProtocolError::FieldTooLong {
                field: "bill",
                len: payload.len(),
                max: literals::BILL_LEN,
            }
            .into());
        }

        store.write(RecordKey::Bill(loaded), &Block::from_field(payload)?)?;

        let loaded = loaded + 1;
        let mut actions = vec![EndpointAction::send(literals::ACK)];
        if loaded == total {
            actions.extend(self.finish_provisioning(store)?);
        } else {
            self.state = VaultState::LoadingBills { loaded, total };
        }
        Ok(actions)
    }

    fn finish_provisioning<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        store.mark_provisioned()?;
        self.state = VaultState::Idle;
        Ok(vec![EndpointAction::EndSession(SessionOutcome::Provisioned)])
    }

    fn check_uuid<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        let stored = store.read(RecordKey::Uuid)?;
        if literals::cstr(payload) == literals::cstr(stored.as_bytes()) {
            self.state = VaultState::AwaitingCount;
            Ok(vec![EndpointAction::send(literals::ACK)])
        } else {
            self.state = VaultState::Idle;
            Ok(vec![
                EndpointAction::send(literals::REJECT),
                EndpointAction::EndSession(SessionOutcome::Rejected(Rejection::AuthMismatch)),
            ])
        }
    }

    fn dispense<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        self.state = VaultState::Idle;

        let requested = payload.first().copied().unwrap_or(0);
        let mut ledger = Ledger::load(&*store)?;

        if ledger.bills_left < requested {
            return Ok(vec![
                EndpointAction::send(literals::REJECT),
                EndpointAction::EndSession(SessionOutcome::Rejected(
                    Rejection::InsufficientFunds { requested, available: ledger.bills_left },
                )),
            ]);
        }

        ledger.bills_left -= requested;
        ledger.save(store)?;

        let mut actions = Vec::with_capacity(requested as usize + 2);
        actions.push(EndpointAction::send(literals::ACK));

        for _ in 0..requested {
            let slot = ledger.cursor;
            let bill = Self::bill(&*store, slot)?;

            ledger = ledger.advance();
            ledger.save(store)?;
            Self::empty_slot(store, slot)?;

            actions.push(EndpointAction::send(bill.to_vec()));
        }

        actions.push(EndpointAction::EndSession(SessionOutcome::Dispensed { count: requested }));
        Ok(actions)
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for Vault {
    fn role(&self) -> Role {
        Role::SecurityModule
    }

    fn begin_session<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<SessionMode, EndpointError> {
        if store.is_provisioned()? {
            self.state = VaultState::Idle;
            return Ok(SessionMode::Normal);
        }

        for slot in 0..BILL_SLOTS as u8 {
            Self::empty_slot(store, slot)?;
        }
        self.state = VaultState::Unprovisioned;
        Ok(SessionMode::Provisioning)
    }

    fn on_synced<S: PersistentStore>(
        &mut self,
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        match self.state {
            VaultState::Unprovisioned => {
                self.state = VaultState::ProvisioningUuid;
                Ok(vec![EndpointAction::send(literals::PROVISION)])
            },
            VaultState::Idle => {
                let uuid = store.read(RecordKey::Uuid)?;
                self.state = VaultState::AwaitingUuid;
                Ok(vec![EndpointAction::send(literals::cstr(uuid.as_bytes()).to_vec())])
            },
            _ => Err(self.invalid("on_synced")),
        }
    }

    fn handle_message<S: PersistentStore>(
        &mut self,
        payload: &[u8],
        store: &mut S,
    ) -> Result<Vec<EndpointAction>, EndpointError> {
        match self.state {
            VaultState::ProvisioningUuid => self.provisioning_uuid(payload, store),
            VaultState::ProvisioningCount => self.provisioning_count(payload, store),
            VaultState::LoadingBills { loaded, total } => {
                self.load_bill(payload, store, loaded, total)
            },
            VaultState::AwaitingUuid => self.check_uuid(payload, store),
            VaultState::AwaitingCount => self.dispense(payload, store),
            VaultState::Unprovisioned | VaultState::Idle => Err(self.invalid("handle_message")),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::store::MemoryStore;

    const UUID: &[u8] = b"3f2b8c1e-0000-4a5b-9c7d-112233445566";

    fn sent(actions: &[EndpointAction]) -> Vec<&[u8]> {
        actions
            .iter()
            .filter_map(|a| match a {
                EndpointAction::Send(b) => Some(b.as_ref()),
                EndpointAction::EndSession(_) => None,
            })
            .collect()
    }

    fn outcome(actions: &[EndpointAction]) -> Option<SessionOutcome> {
        actions.iter().find_map(|a| match a {
            EndpointAction::EndSession(o) => Some(*o),
            EndpointAction::Send(_) => None,
        })
    }

    fn bill(n: usize) -> Vec<u8> {
        format!("BILL-{n:011}").into_bytes()
    }

    fn provisioned(bills: usize) -> (Vault, MemoryStore) {
        let mut vault = Vault::new();
        let mut store = MemoryStore::new();

        assert_eq!(vault.begin_session(&mut store).unwrap(), SessionMode::Provisioning);
        assert_eq!(sent(&vault.on_synced(&mut store).unwrap()), vec![b"P"]);

        let mut uuid = UUID.to_vec();
        uuid.push(0);
        assert_eq!(sent(&vault.handle_message(&uuid, &mut store).unwrap()), vec![b"K"]);

        let actions = vault.handle_message(&[bills as u8], &mut store).unwrap();
        assert_eq!(sent(&actions), vec![b"K"]);

        let mut last = actions;
        for n in 0..bills {
            last = vault.handle_message(&bill(n), &mut store).unwrap();
            assert_eq!(sent(&last), vec![b"K"]);
        }
        assert_eq!(outcome(&last), Some(SessionOutcome::Provisioned));

        (vault, store)
    }

    fn withdraw(vault: &mut Vault, store: &mut MemoryStore, amount: u8) -> Vec<EndpointAction> {
        assert_eq!(vault.begin_session(store).unwrap(), SessionMode::Normal);
        let actions = vault.on_synced(store).unwrap();
        assert_eq!(sent(&actions), vec![UUID]);

        let actions = vault.handle_message(UUID, store).unwrap();
        assert_eq!(sent(&actions), vec![b"K"]);

        vault.handle_message(&[amount], store).unwrap()
    }

    #[test]
    fn provisioning_clears_and_loads_stack() {
        let (vault, store) = provisioned(3);

        assert_eq!(vault.state(), VaultState::Idle);
        assert!(store.is_provisioned().unwrap());
        assert_eq!(Ledger::load(&store).unwrap(), Ledger { bills_left: 3, cursor: 0 });
        assert_eq!(Vault::loaded_slots(&store).unwrap(), 3);
        assert_eq!(Vault::bill(&store, 127).unwrap(), literals::EMPTY_BILL);
        assert_eq!(&Vault::bill(&store, 0).unwrap()[..], &bill(0)[..]);
    }

    #[test]
    fn zero_bills_provisions_immediately() {
        let (_, store) = provisioned(0);
        assert!(store.is_provisioned().unwrap());
        assert_eq!(Ledger::load(&store).unwrap().bills_left, 0);
    }

    #[test]
    fn withdraw_two_of_three_then_reject() {
        let (mut vault, mut store) = provisioned(3);

        let actions = withdraw(&mut vault, &mut store, 2);
        let payloads = sent(&actions);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0], b"K");
        assert_eq!(payloads[1], &bill(0)[..]);
        assert_eq!(payloads[2], &bill(1)[..]);
        assert_eq!(outcome(&actions), Some(SessionOutcome::Dispensed { count: 2 }));
        assert_eq!(Ledger::load(&store).unwrap(), Ledger { bills_left: 1, cursor: 2 });

        let writes = store.writes();
        let actions = withdraw(&mut vault, &mut store, 2);
        assert_eq!(sent(&actions), vec![b"BAD"]);
        assert_eq!(
            outcome(&actions),
            Some(SessionOutcome::Rejected(Rejection::InsufficientFunds {
                requested: 2,
                available: 1
            }))
        );
        assert_eq!(Ledger::load(&store).unwrap().bills_left, 1);
        assert_eq!(store.writes(), writes);
    }

    #[test]
    fn dispensed_slots_are_emptied() {
        let (mut vault, mut store) = provisioned(3);
        withdraw(&mut vault, &mut store, 2);

        assert_eq!(Vault::bill(&store, 0).unwrap(), literals::EMPTY_BILL);
        assert_eq!(Vault::bill(&store, 1).unwrap(), literals::EMPTY_BILL);
        assert_eq!(Vault::loaded_slots(&store).unwrap(), 1);
    }

    #[test]
    fn wrong_uuid_rejected() {
        let (mut vault, mut store) = provisioned(1);
        vault.begin_session(&mut store).unwrap();
        vault.on_synced(&mut store).unwrap();

        let actions = vault.handle_message(b"not-the-vault", &mut store).unwrap();
        assert_eq!(sent(&actions), vec![b"BAD"]);
        assert_eq!(
            outcome(&actions),
            Some(SessionOutcome::Rejected(Rejection::AuthMismatch))
        );
        assert_eq!(vault.state(), VaultState::Idle);
    }

    #[test]
    fn zero_withdrawal_succeeds_empty() {
        let (mut vault, mut store) = provisioned(1);
        let actions = withdraw(&mut vault, &mut store, 0);
        assert_eq!(sent(&actions), vec![b"K"]);
        assert_eq!(outcome(&actions), Some(SessionOutcome::Dispensed { count: 0 }));
    }

    #[test]
    fn oversized_uuid_rejected() {
        let mut vault = Vault::new();
        let mut store = MemoryStore::new();
        vault.begin_session(&mut store).unwrap();
        vault.on_synced(&mut store).unwrap();

        let result = vault.handle_message(&[b'u'; 37], &mut store);
        assert!(matches!(
            result,
            Err(EndpointError::Protocol(ProtocolError::FieldTooLong { len: 37, max: 36, .. }))
        ));
        assert!(!store.is_provisioned().unwrap());
    }

    #[test]
    fn bill_count_above_capacity_rejected() {
        let mut vault = Vault::new();
        let mut store = MemoryStore::new();
        vault.begin_session(&mut store).unwrap();
        vault.on_synced(&mut store).unwrap();
        vault.handle_message(UUID, &mut store).unwrap();

        let result = vault.handle_message(&[129], &mut store);
        assert!(matches!(
            result,
            Err(EndpointError::Protocol(ProtocolError::FieldTooLong { len: 129, .. }))
        ));
    }

    #[test]
    fn oversized_bill_rejected() {
        let mut vault = Vault::new();
        let mut store = MemoryStore::new();
        vault.begin_session(&mut store).unwrap();
        vault.on_synced(&mut store).unwrap();
        vault.handle_message(UUID, &mut store).unwrap();
        vault.handle_message(&[1], &mut store).unwrap();

        let result = vault.handle_message(&[b'$'; 17], &mut store);
        assert!(matches!(
            result,
            Err(EndpointError::Protocol(ProtocolError::FieldTooLong { field: "bill", .. }))
        ));
    }

    #[test]
    fn cursor_wraps_around_stack() {
        let mut store = MemoryStore::new();
        Ledger { bills_left: 2, cursor: 127 }.save(&mut store).unwrap();
        store.write(RecordKey::Uuid, &Block::from_field(UUID).unwrap()).unwrap();
        store.write(RecordKey::Bill(127), &Block::from_field(b"last").unwrap()).unwrap();
        store.write(RecordKey::Bill(0), &Block::from_field(b"first").unwrap()).unwrap();
        store.mark_provisioned().unwrap();

        let mut vault = Vault::new();
        let actions = withdraw(&mut vault, &mut store, 2);
        let payloads = sent(&actions);
        assert!(payloads[1].starts_with(b"last"));
        assert!(payloads[2].starts_with(b"first"));
        assert_eq!(Ledger::load(&store).unwrap(), Ledger { bills_left: 0, cursor: 1 });
    }

    proptest! {
        /// Every withdrawal either dispenses exactly the requested number of
        /// distinct, never-before-seen bills or is rejected without effect.
        #[test]
        fn prop_dispense_counts(
            loaded in 0usize..=20,
            requests in prop::collection::vec(0u8..8, 1..10),
        ) {
            let (mut vault, mut store) = provisioned(loaded);
            let mut seen = std::collections::HashSet::new();
            let mut left = loaded as u8;

            for amount in requests {
                let actions = withdraw(&mut vault, &mut store, amount);
                let payloads = sent(&actions);

                if amount <= left {
                    prop_assert_eq!(payloads.len(), amount as usize + 1);
                    for bill in &payloads[1..] {
                        prop_assert_ne!(*bill, &literals::EMPTY_BILL[..]);
                        prop_assert!(seen.insert(bill.to_vec()));
                    }
                    left -= amount;
                } else {
                    prop_assert_eq!(payloads, vec![&b"BAD"[..]]);
                }
                prop_assert_eq!(Ledger::load(&store).unwrap().bills_left, left);
                prop_assert_eq!(Vault::loaded_slots(&store).unwrap(), left as usize);
            }
        }
    }
}
