//! Controller pair that executes model [`Operation`]s against real
//! endpoints.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{
    controller::{CardOp, Controller, ControllerError, Withdrawal},
    model::{self, IdentityQuery, Observation, Operation},
};

/// Failure to execute an operation.
#[derive(Debug, Error)]
pub enum AtmError {
    /// The operation needs an endpoint that is not attached.
    #[error("no {0} attached")]
    MissingEndpoint(&'static str),

    /// The exchange itself failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// One card link and one vault link, either of which may be absent.
#[derive(Debug)]
pub struct Atm<R, W> {
    card: Option<Controller<R, W>>,
    vault: Option<Controller<R, W>>,
}

impl<R, W> Atm<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Attach whichever controllers exist.
    pub fn new(card: Option<Controller<R, W>>, vault: Option<Controller<R, W>>) -> Self {
        Self { card, vault }
    }

    /// Card link.
    pub fn card(&mut self) -> Result<&mut Controller<R, W>, AtmError> {
        self.card.as_mut().ok_or(AtmError::MissingEndpoint("card"))
    }

    /// Vault link.
    pub fn vault(&mut self) -> Result<&mut Controller<R, W>, AtmError> {
        self.vault.as_mut().ok_or(AtmError::MissingEndpoint("vault"))
    }

    /// Run one operation to completion.
    ///
    /// Refusals announced during synchronisation are reported as
    /// observations; only link and protocol failures are errors.
    pub async fn perform(&mut self, op: &Operation) -> Result<Observation, AtmError> {
        let op = op.clone().normalized();
        debug!(?op, "performing");

        let result = match op {
            Operation::ProvisionCard { pin, account } => self
                .card()?
                .provision_card(&pin.to_bytes(), &model::account_uuid(account))
                .await
                .map(|()| Observation::Provisioned),
            Operation::CardIdentity { pin, query } => {
                let command = match query {
                    IdentityQuery::Balance => CardOp::CheckBalance,
                    IdentityQuery::Withdrawal => CardOp::Withdraw,
                };
                self.card()?.card_identity(&pin.to_bytes(), command).await.map(|uuid| match uuid {
                    Some(uuid) => Observation::Identity(uuid.to_vec()),
                    None => Observation::PinRejected,
                })
            },
            Operation::ChangePin { old, new } => {
                self.card()?.change_pin(&old.to_bytes(), &new.to_bytes()).await.map(|changed| {
                    if changed { Observation::PinChanged } else { Observation::PinRejected }
                })
            },
            Operation::ProvisionVault { bills } => {
                let stack = model::bill_stack(bills);
                let refs: Vec<&[u8]> = stack.iter().map(|b| &b[..]).collect();
                self.vault()?
                    .provision_vault(model::VAULT_UUID, &refs)
                    .await
                    .map(|()| Observation::Provisioned)
            },
            Operation::Withdraw { amount } => {
                self.vault()?.withdraw_from_vault(amount).await.map(observe_withdrawal)
            },
            Operation::ForgedWithdraw { amount } => {
                let vault = self.vault()?;
                match vault.vault_uuid().await {
                    Ok(_) => vault
                        .withdraw(model::FORGED_VAULT_UUID, amount)
                        .await
                        .map(observe_withdrawal),
                    Err(err) => Err(err),
                }
            },
        };

        match result {
            Ok(observation) => Ok(observation),
            Err(ControllerError::AlreadyProvisioned { .. }) => Ok(Observation::AlreadyProvisioned),
            Err(ControllerError::NotProvisioned { .. }) => Ok(Observation::NotProvisioned),
            Err(err) => Err(err.into()),
        }
    }
}

fn observe_withdrawal(withdrawal: Withdrawal) -> Observation {
    match withdrawal {
        Withdrawal::Dispensed(bills) => {
            Observation::Dispensed(bills.into_iter().map(|b| b.to_vec()).collect())
        },
        Withdrawal::UnknownVault => Observation::UnknownVault,
        Withdrawal::InsufficientBills => Observation::InsufficientBills,
    }
}
