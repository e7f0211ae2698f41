//! Account discovery and balance views.
//!
//! Nothing on-chain says which deposits belong to a key. Ownership is found
//! by deriving precommitments for deposit index 0, 1, 2, ... and stopping at
//! the first one the store has never seen; each lineage is then followed by
//! deriving the nullifier hash of its current note until no withdrawal spends
//! it. Views are recomputed only when the store version moves.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::{Address, U256};
use ppool_contracts::{DepositEvent, RagequitEvent, WithdrawalEvent};
use ppool_core::{commitment_of, DerivationError, Field, Note, NoteError, Secret, SecretDeriver};
use thiserror::Error;

use crate::store::ChainState;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Note(#[from] NoteError),

    #[error("No single note of {asset} holds {requested} (largest spendable: {largest})")]
    InsufficientNote {
        asset: Address,
        requested: U256,
        largest: U256,
    },
}

/// A deposit whose precommitment this account derived.
#[derive(Clone, Debug)]
pub struct OwnedDeposit {
    pub deposit_index: u32,
    pub secret: Secret,
    pub event: DepositEvent,
}

/// One deposit and everything that happened to it since.
#[derive(Clone, Debug)]
pub struct Lineage {
    pub deposit: OwnedDeposit,
    pub withdrawals: Vec<WithdrawalEvent>,
    pub ragequit: Option<RagequitEvent>,
    /// Asset of the deposit's pool, when the pool is known
    pub asset: Option<Address>,
    /// Secret of the current head note
    pub secret: Secret,
    /// Current head note; `value` is the spendable balance
    pub note: Note,
}

impl Lineage {
    pub fn pool(&self) -> Address {
        self.deposit.event.pool
    }

    pub fn label(&self) -> Field {
        self.deposit.event.label
    }

    pub fn balance(&self) -> U256 {
        self.note.value
    }

    pub fn is_ragequitted(&self) -> bool {
        self.ragequit.is_some()
    }

    pub fn is_spendable(&self) -> bool {
        !self.is_ragequitted() && self.note.value > U256::ZERO
    }

    /// Change note left after withdrawing `amount`, with its secret.
    pub fn next_note(
        &self,
        deriver: &SecretDeriver,
        amount: U256,
    ) -> Result<(Secret, Note), ViewError> {
        let secret = deriver.derive_note(self.note.deposit_index, self.note.withdraw_index + 1)?;
        let note = self.note.spend(amount, &secret)?;
        Ok((secret, note))
    }
}

/// `0` after a ragequit, otherwise the deposit minus every withdrawal.
pub fn lineage_balance(
    deposit_value: U256,
    withdrawals: &[WithdrawalEvent],
    ragequitted: bool,
) -> U256 {
    if ragequitted {
        return U256::ZERO;
    }
    withdrawals
        .iter()
        .fold(deposit_value, |left, withdrawal| left.saturating_sub(withdrawal.value))
}

/// Deposit indices 0, 1, 2, ... up to the first precommitment not in the store.
pub fn discover_deposits(
    state: &ChainState,
    deriver: &SecretDeriver,
) -> Result<Vec<OwnedDeposit>, ViewError> {
    let mut found = Vec::new();
    for deposit_index in 0..=u32::MAX {
        let secret = deriver.derive(deposit_index, None)?;
        let Some(event) = state.deposit(&secret.precommitment) else {
            break;
        };
        found.push(OwnedDeposit {
            deposit_index,
            secret,
            event: event.clone(),
        });
    }
    Ok(found)
}

/// Follows a deposit through its withdrawals.
pub fn trace_lineage(
    state: &ChainState,
    deriver: &SecretDeriver,
    deposit: OwnedDeposit,
) -> Result<Lineage, ViewError> {
    let label = deposit.event.label;
    let mut secret = deposit.secret;
    let mut remaining = deposit.event.value;
    let mut withdrawals: Vec<WithdrawalEvent> = Vec::new();

    while let Some(withdrawal) = state.withdrawal(&secret.nullifier_hash()) {
        let spent = withdrawals.len() as u32 + 1;
        let next = deriver.derive_note(deposit.deposit_index, spent)?;

        remaining = match remaining.checked_sub(withdrawal.value) {
            Some(left) => left,
            None => {
                tracing::warn!(
                    deposit_index = deposit.deposit_index,
                    "Withdrawals exceed deposited value"
                );
                U256::ZERO
            }
        };

        let matches = commitment_of(remaining, label, next.precommitment)
            .map(|expected| expected == withdrawal.new_commitment)
            .unwrap_or(false);
        if !matches {
            tracing::warn!(
                deposit_index = deposit.deposit_index,
                withdraw_index = spent,
                new_commitment = %withdrawal.new_commitment,
                "Withdrawal commitment does not match the derived change note"
            );
        }

        withdrawals.push(withdrawal.clone());
        secret = next;
    }

    let ragequit = state.ragequit(&label).cloned();
    let value = lineage_balance(deposit.event.value, &withdrawals, ragequit.is_some());
    let asset = state.pool(&deposit.event.pool).map(|pool| pool.asset);

    let note = Note {
        precommitment: secret.precommitment,
        label,
        value,
        deposit_index: deposit.deposit_index,
        withdraw_index: withdrawals.len() as u32,
    };

    Ok(Lineage {
        deposit,
        withdrawals,
        ragequit,
        asset,
        secret,
        note,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetBalance {
    pub asset: Address,
    pub balance: U256,
    /// Notes with a non-zero spendable balance
    pub notes: usize,
}

/// Everything this account owns on one chain, as of one store version.
#[derive(Clone, Debug)]
pub struct AccountView {
    version: u64,
    lineages: Vec<Lineage>,
}

impl AccountView {
    pub fn compute(state: &ChainState, deriver: &SecretDeriver) -> Result<Self, ViewError> {
        let lineages = discover_deposits(state, deriver)?
            .into_iter()
            .map(|deposit| trace_lineage(state, deriver, deposit))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            version = state.version(),
            deposits = lineages.len(),
            "Account view computed"
        );
        Ok(Self {
            version: state.version(),
            lineages,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn deposits(&self) -> impl Iterator<Item = &OwnedDeposit> {
        self.lineages.iter().map(|lineage| &lineage.deposit)
    }

    /// Withdrawals grouped by the precommitment of the deposit they spend from.
    pub fn withdrawals(&self) -> HashMap<Field, Vec<WithdrawalEvent>> {
        self.lineages
            .iter()
            .filter(|lineage| !lineage.withdrawals.is_empty())
            .map(|lineage| (lineage.deposit.event.precommitment, lineage.withdrawals.clone()))
            .collect()
    }

    pub fn balance(&self, asset: Address) -> U256 {
        self.lineages
            .iter()
            .filter(|lineage| lineage.asset == Some(asset))
            .fold(U256::ZERO, |sum, lineage| sum.saturating_add(lineage.balance()))
    }

    pub fn balances(&self) -> Vec<AssetBalance> {
        let mut by_asset: BTreeMap<Address, AssetBalance> = BTreeMap::new();
        for lineage in &self.lineages {
            let Some(asset) = lineage.asset else {
                continue;
            };
            let entry = by_asset.entry(asset).or_insert(AssetBalance {
                asset,
                balance: U256::ZERO,
                notes: 0,
            });
            if lineage.is_spendable() {
                entry.balance = entry.balance.saturating_add(lineage.balance());
                entry.notes += 1;
            }
        }
        by_asset.into_values().collect()
    }

    /// Smallest single note of `asset` holding at least `min_amount`.
    pub fn select_note(&self, asset: Address, min_amount: U256) -> Result<&Lineage, ViewError> {
        let spendable = || {
            self.lineages
                .iter()
                .filter(move |lineage| lineage.asset == Some(asset) && lineage.is_spendable())
        };

        spendable()
            .filter(|lineage| lineage.balance() >= min_amount)
            .min_by_key(|lineage| lineage.balance())
            .ok_or_else(|| ViewError::InsufficientNote {
                asset,
                requested: min_amount,
                largest: spendable()
                    .map(|lineage| lineage.balance())
                    .max()
                    .unwrap_or(U256::ZERO),
            })
    }
}

/// Memoized [`AccountView`], valid for one store version.
#[derive(Debug, Default)]
pub struct ViewCache {
    memo: Mutex<Option<Arc<AccountView>>>,
}

impl ViewCache {
    pub fn get_or_compute(
        &self,
        state: &ChainState,
        deriver: &SecretDeriver,
    ) -> Result<Arc<AccountView>, ViewError> {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(view) = memo.as_ref() {
            if view.version() == state.version() {
                return Ok(view.clone());
            }
        }

        let view = Arc::new(AccountView::compute(state, deriver)?);
        *memo = Some(view.clone());
        Ok(view)
    }

    /// Drop the memo; needed when the store is replaced rather than advanced.
    pub fn invalidate(&self) {
        *self.memo.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
