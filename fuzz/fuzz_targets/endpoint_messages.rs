//! Fuzz the card and vault state machines with arbitrary message streams.
//!
//! Messages are fed the way the runtime feeds them: a handshake per session,
//! then the endpoint until it ends the session or rejects a message. The
//! machines must never panic, and a provisioned vault's ledger must always
//! be backed by loaded slots.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tellerframe_core::{
    BILL_SLOTS, Card, Endpoint, EndpointAction, Handshake, HandshakeState, Ledger, MemoryStore,
    PersistentStore, Vault,
};
use tellerframe_proto::{DEFAULT_CAPACITY, literals};

#[derive(Debug, Arbitrary)]
struct Input {
    vault: bool,
    messages: Vec<Vec<u8>>,
}

/// A bill spelling the empty sentinel is indistinguishable from an empty
/// slot, so such inputs are skipped.
fn is_empty_sentinel(message: &[u8]) -> bool {
    if message.len() > literals::BILL_LEN {
        return false;
    }
    let mut bill = [0u8; literals::BILL_LEN];
    bill[..message.len()].copy_from_slice(message);
    bill == literals::EMPTY_BILL
}

fn drive<E: Endpoint>(mut endpoint: E, messages: &[Vec<u8>], store: &mut MemoryStore) {
    let mut frames = messages
        .iter()
        .filter(|m| !is_empty_sentinel(m))
        .map(|m| &m[..m.len().min(DEFAULT_CAPACITY)]);

    loop {
        let Ok(mode) = endpoint.begin_session(store) else {
            return;
        };
        let mut handshake = Handshake::new(endpoint.role(), mode);
        while handshake.state() != HandshakeState::Synced {
            let Some(frame) = frames.next() else {
                return;
            };
            if handshake.handle_message(frame).is_err() {
                return;
            }
        }

        let mut result = endpoint.on_synced(store);
        loop {
            match result {
                Ok(actions) if actions.iter().any(|a| matches!(a, EndpointAction::EndSession(_))) => {
                    break;
                },
                Ok(_) => {},
                Err(_) => break,
            }
            let Some(frame) = frames.next() else {
                return;
            };
            result = endpoint.handle_message(frame, store);
        }
    }
}

fn check_vault(store: &MemoryStore) {
    if !store.is_provisioned().unwrap_or(false) {
        return;
    }
    let Ok(ledger) = Ledger::load(store) else {
        return;
    };
    for offset in 0..ledger.bills_left as usize {
        let slot = ((ledger.cursor as usize + offset) % BILL_SLOTS) as u8;
        let bill = Vault::bill(store, slot).unwrap_or(literals::EMPTY_BILL);
        assert_ne!(bill, literals::EMPTY_BILL, "ledger {ledger:?} points at empty slot {slot}");
    }
}

fuzz_target!(|input: Input| {
    let mut store = MemoryStore::new();
    if input.vault {
        drive(Vault::new(), &input.messages, &mut store);
        check_vault(&store);
    } else {
        drive(Card::new(), &input.messages, &mut store);
    }
});
