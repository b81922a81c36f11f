//! End-to-end scenarios over simulated links.
//!
//! Each endpoint runs the real runtime on its own turmoil host; the `atm`
//! host drives them with a controller and the reference model predicts every
//! answer.

use std::time::Duration;

use arbitrary::{Arbitrary, Unstructured};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tellerframe_harness::{
    IdentityQuery, ModelPin, Observation, Operation,
    model::{self, account_uuid},
    scenario::{Scenario, oracle},
};

#[test]
fn card_provisioning_then_pin_checks() {
    Scenario::new("card pin checks")
        .card("card")
        .operations([
            Operation::ProvisionCard { pin: ModelPin(1), account: 42 },
            Operation::CardIdentity { pin: ModelPin(1), query: IdentityQuery::Balance },
            Operation::CardIdentity { pin: ModelPin(0), query: IdentityQuery::Balance },
        ])
        .oracle(oracle::all_of(vec![
            oracle::observations_match_model(),
            oracle::all_provisioned(),
            Box::new(|world| {
                let steps = world.steps();
                if steps[1].observed != Observation::Identity(account_uuid(42).to_vec()) {
                    return Err(format!("correct PIN returned {:?}", steps[1].observed));
                }
                if steps[2].observed != Observation::PinRejected {
                    return Err(format!("wrong PIN returned {:?}", steps[2].observed));
                }
                Ok(())
            }),
        ]))
        .run()
        .expect("card scenario should pass");
}

#[test]
fn vault_withdraws_until_short() {
    Scenario::new("vault withdraw twice")
        .vault("vault")
        .operations([
            Operation::ProvisionVault { bills: 3 },
            Operation::Withdraw { amount: 2 },
            Operation::Withdraw { amount: 2 },
        ])
        .oracle(oracle::all_of(vec![
            oracle::observations_match_model(),
            oracle::bills_conserved(3),
            oracle::ledger_backed_by_bills(),
            Box::new(|world| {
                let ledger = world.ledger("vault").map_err(|e| e.to_string())?;
                match ledger {
                    Some(ledger) if ledger.bills_left == 1 => Ok(()),
                    other => Err(format!("expected one bill left, ledger {other:?}")),
                }
            }),
            Box::new(|world| match &world.steps()[1].observed {
                Observation::Dispensed(bills)
                    if bills == &[model::bill(0).to_vec(), model::bill(1).to_vec()] =>
                {
                    Ok(())
                },
                other => Err(format!("first withdrawal returned {other:?}")),
            }),
        ]))
        .run()
        .expect("vault scenario should pass");
}

#[test]
fn refusals_leave_link_in_sync() {
    Scenario::new("refusals")
        .card("card")
        .vault("vault")
        .operations([
            Operation::Withdraw { amount: 1 },
            Operation::CardIdentity { pin: ModelPin(1), query: IdentityQuery::Balance },
            Operation::ProvisionCard { pin: ModelPin(1), account: 1 },
            Operation::ProvisionCard { pin: ModelPin(2), account: 2 },
            Operation::ProvisionVault { bills: 2 },
            Operation::ProvisionVault { bills: 5 },
            Operation::ForgedWithdraw { amount: 1 },
            Operation::ChangePin { old: ModelPin(1), new: ModelPin(2) },
            Operation::CardIdentity { pin: ModelPin(2), query: IdentityQuery::Withdrawal },
            Operation::Withdraw { amount: 2 },
        ])
        .oracle(oracle::all_of(vec![
            oracle::observations_match_model(),
            oracle::all_provisioned(),
            oracle::bills_conserved(2),
        ]))
        .run()
        .expect("refusal scenario should pass");
}

#[test]
fn handshake_survives_garbage_prefix() {
    for seed in [1, 7, 0xDEAD_BEEF] {
        Scenario::new(format!("garbage prefix seed {seed}"))
            .card("card")
            .vault("vault")
            .seed(seed)
            .garbage_frames(20)
            .operations([
                Operation::ProvisionCard { pin: ModelPin(3), account: 9 },
                Operation::ProvisionVault { bills: 1 },
                Operation::CardIdentity { pin: ModelPin(3), query: IdentityQuery::Balance },
                Operation::Withdraw { amount: 1 },
            ])
            .oracle(oracle::all_of(vec![
                oracle::observations_match_model(),
                oracle::all_provisioned(),
                Box::new(|world| {
                    if world.garbage_echoed() == 40 {
                        Ok(())
                    } else {
                        Err(format!("{} garbage frames echoed", world.garbage_echoed()))
                    }
                }),
                // Echoes were consumed up front, so one READY per session
                Box::new(|world| match world.ready_sent("card") {
                    2 => Ok(()),
                    n => Err(format!("{n} READY frames sent to the card")),
                }),
            ]))
            .run()
            .expect("handshake should recover from garbage");
    }
}

#[test]
fn full_flow_with_latency() {
    Scenario::new("slow link")
        .card("card")
        .vault("vault")
        .latency(Duration::from_millis(50))
        .operations([
            Operation::ProvisionCard { pin: ModelPin(0), account: 3 },
            Operation::ProvisionVault { bills: 8 },
            Operation::CardIdentity { pin: ModelPin(0), query: IdentityQuery::Withdrawal },
            Operation::Withdraw { amount: 5 },
            Operation::Withdraw { amount: 3 },
            Operation::Withdraw { amount: 1 },
        ])
        .oracle(oracle::all_of(vec![
            oracle::observations_match_model(),
            oracle::bills_conserved(8),
            oracle::ledger_backed_by_bills(),
        ]))
        .run()
        .expect("latency should not change outcomes");
}

/// Operation sequences decoded from seeded random bytes.
fn random_operations(seed: u64, count: usize) -> Vec<Operation> {
    let mut bytes = vec![0u8; 1024];
    ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut bytes);
    let mut u = Unstructured::new(&bytes);
    (0..count).map_while(|_| Operation::arbitrary(&mut u).ok()).collect()
}

#[test]
fn random_sequences_match_model() {
    for seed in 0..6 {
        Scenario::new(format!("random seed {seed}"))
            .card("card")
            .vault("vault")
            .seed(seed)
            .garbage_frames(3)
            .operations(random_operations(seed, 20))
            .oracle(oracle::all_of(vec![
                oracle::observations_match_model(),
                oracle::ledger_backed_by_bills(),
            ]))
            .run()
            .expect("random sequence should match the model");
    }
}
