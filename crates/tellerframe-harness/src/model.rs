//! Reference model of a card and a vault as seen from the controller.
//!
//! The model is deliberately naive: plain fields, no framing, no handshake,
//! no storage layout. The real endpoints run behind a link and a
//! block store; model-based tests drive both with the same [`Operation`]
//! sequence and require identical [`Observation`]s.
//!
//! Values on the wire are derived from small seeds so that generated
//! sequences hit matching PINs and repeated provisioning often.

use std::collections::VecDeque;

use arbitrary::Arbitrary;

/// PIN width on the card.
pub const PIN_LEN: usize = 8;

/// Account UUID width on the card.
pub const ACCOUNT_LEN: usize = 36;

/// Bill width in the vault.
pub const BILL_LEN: usize = 16;

/// UUID every modelled vault is provisioned with.
pub const VAULT_UUID: &[u8] = b"b3a1c0de-7e11-4e00-9a5e-000000000001";

/// UUID presented by a forged withdrawal.
pub const FORGED_VAULT_UUID: &[u8] = b"00000000-0000-0000-0000-000000000000";

/// Most bills a modelled vault is loaded with.
pub const MAX_MODEL_BILLS: u8 = 8;

/// PIN chosen from a small space so guesses sometimes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct ModelPin(pub u8);

impl ModelPin {
    /// Eight ASCII digits.
    pub fn to_bytes(self) -> [u8; PIN_LEN] {
        let mut out = [0u8; PIN_LEN];
        out.copy_from_slice(format!("{:08}", self.0 % 4).as_bytes());
        out
    }
}

/// Account UUID for a seed, 36 ASCII bytes in UUID layout.
pub fn account_uuid(seed: u8) -> [u8; ACCOUNT_LEN] {
    let text = format!("{:08x}-0000-4000-8000-{:012x}", seed, u64::from(seed) * 7919);
    let mut out = [0u8; ACCOUNT_LEN];
    out.copy_from_slice(text.as_bytes());
    out
}

/// Bill with a serial number, 16 ASCII bytes.
pub fn bill(serial: u32) -> [u8; BILL_LEN] {
    let mut out = [0u8; BILL_LEN];
    out.copy_from_slice(format!("BILL-{serial:011}").as_bytes());
    out
}

/// Bills `0..count` in loading order.
pub fn bill_stack(count: u8) -> Vec<[u8; BILL_LEN]> {
    (0..u32::from(count)).map(bill).collect()
}

/// Card selector after a PIN check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum IdentityQuery {
    /// Command `1`
    Balance,
    /// Command `2`
    Withdrawal,
}

/// One controller-level operation.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Provision the card
    ProvisionCard {
        /// Initial PIN
        pin: ModelPin,
        /// Seed for the account UUID
        account: u8,
    },
    /// Check a PIN and read the account UUID
    CardIdentity {
        /// Candidate PIN
        pin: ModelPin,
        /// Command sent after the PIN check
        query: IdentityQuery,
    },
    /// Replace the PIN
    ChangePin {
        /// Current PIN candidate
        old: ModelPin,
        /// Replacement
        new: ModelPin,
    },
    /// Provision the vault with `bills % (MAX_MODEL_BILLS + 1)` bills
    ProvisionVault {
        /// Bill count seed
        bills: u8,
    },
    /// Read the vault UUID and withdraw against it
    Withdraw {
        /// Requested bills
        amount: u8,
    },
    /// Withdraw presenting [`FORGED_VAULT_UUID`]
    ForgedWithdraw {
        /// Requested bills
        amount: u8,
    },
}

impl Operation {
    /// Whether this operation talks to the card (otherwise the vault).
    pub fn targets_card(&self) -> bool {
        matches!(
            self,
            Self::ProvisionCard { .. } | Self::CardIdentity { .. } | Self::ChangePin { .. }
        )
    }

    /// Bring generated fields into the modelled range.
    pub fn normalized(self) -> Self {
        match self {
            Self::ProvisionVault { bills } => {
                Self::ProvisionVault { bills: bills % (MAX_MODEL_BILLS + 1) }
            },
            Self::Withdraw { amount } => Self::Withdraw { amount: amount % (MAX_MODEL_BILLS + 2) },
            Self::ForgedWithdraw { amount } => {
                Self::ForgedWithdraw { amount: amount % (MAX_MODEL_BILLS + 2) }
            },
            other => other,
        }
    }
}

/// What the controller saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Provisioning completed
    Provisioned,
    /// Provisioning refused, the endpoint announced normal mode
    AlreadyProvisioned,
    /// Normal exchange refused, the endpoint announced provisioning
    NotProvisioned,
    /// The card answered `BAD` to the PIN
    PinRejected,
    /// The card returned its account UUID
    Identity(Vec<u8>),
    /// The card acknowledged a new PIN
    PinChanged,
    /// The vault dispensed these bills
    Dispensed(Vec<Vec<u8>>),
    /// The vault refused the UUID
    UnknownVault,
    /// The vault holds fewer bills than requested
    InsufficientBills,
}

#[derive(Debug, Clone)]
struct ModelCard {
    pin: [u8; PIN_LEN],
    account: [u8; ACCOUNT_LEN],
}

#[derive(Debug, Clone)]
struct ModelVault {
    bills: VecDeque<[u8; BILL_LEN]>,
}

/// Reference state of one card and one vault.
#[derive(Debug, Clone, Default)]
pub struct ModelWorld {
    card: Option<ModelCard>,
    vault: Option<ModelVault>,
}

impl ModelWorld {
    /// Both endpoints factory-fresh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bills the vault still holds, `None` before provisioning.
    pub fn bills_left(&self) -> Option<usize> {
        self.vault.as_ref().map(|v| v.bills.len())
    }

    /// Current card PIN, `None` before provisioning.
    pub fn card_pin(&self) -> Option<[u8; PIN_LEN]> {
        self.card.as_ref().map(|c| c.pin)
    }

    /// Apply one operation and return what the controller would see.
    pub fn apply(&mut self, op: &Operation) -> Observation {
        match op.clone().normalized() {
            Operation::ProvisionCard { pin, account } => {
                if self.card.is_some() {
                    return Observation::AlreadyProvisioned;
                }
                self.card = Some(ModelCard { pin: pin.to_bytes(), account: account_uuid(account) });
                Observation::Provisioned
            },
            Operation::CardIdentity { pin, .. } => match &self.card {
                None => Observation::NotProvisioned,
                Some(card) if card.pin != pin.to_bytes() => Observation::PinRejected,
                Some(card) => Observation::Identity(card.account.to_vec()),
            },
            Operation::ChangePin { old, new } => match &mut self.card {
                None => Observation::NotProvisioned,
                Some(card) if card.pin != old.to_bytes() => Observation::PinRejected,
                Some(card) => {
                    card.pin = new.to_bytes();
                    Observation::PinChanged
                },
            },
            Operation::ProvisionVault { bills } => {
                if self.vault.is_some() {
                    return Observation::AlreadyProvisioned;
                }
                self.vault = Some(ModelVault { bills: bill_stack(bills).into() });
                Observation::Provisioned
            },
            Operation::Withdraw { amount } => match &mut self.vault {
                None => Observation::NotProvisioned,
                Some(vault) if vault.bills.len() < amount as usize => {
                    Observation::InsufficientBills
                },
                Some(vault) => Observation::Dispensed(
                    vault.bills.drain(..amount as usize).map(|b| b.to_vec()).collect(),
                ),
            },
            Operation::ForgedWithdraw { .. } => match &self.vault {
                None => Observation::NotProvisioned,
                Some(_) => Observation::UnknownVault,
            },
        }
    }
}
