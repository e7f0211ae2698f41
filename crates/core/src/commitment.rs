use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poseidon::{poseidon2, poseidon3};
use crate::secrets::Secret;
use crate::utils::{serde_field, u256_to_field, FieldError};
use crate::Field;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NoteError {
    #[error("Cannot withdraw {requested} from a note holding {available}")]
    Overspend { requested: U256, available: U256 },

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// A spendable note. The label is fixed for the whole lineage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(with = "serde_field")]
    pub precommitment: Field,
    #[serde(with = "serde_field")]
    pub label: Field,
    pub value: U256,
    pub deposit_index: u32,
    /// Number of withdrawals already made from this lineage.
    pub withdraw_index: u32,
}

impl Note {
    pub fn commitment(&self) -> Result<Field, FieldError> {
        commitment_of(self.value, self.label, self.precommitment)
    }

    /// Residual note after withdrawing `amount`, owned by `next_secret`.
    pub fn spend(&self, amount: U256, next_secret: &Secret) -> Result<Note, NoteError> {
        let value = self
            .value
            .checked_sub(amount)
            .ok_or(NoteError::Overspend {
                requested: amount,
                available: self.value,
            })?;
        Ok(Note {
            precommitment: next_secret.precommitment,
            label: self.label,
            value,
            deposit_index: self.deposit_index,
            withdraw_index: self.withdraw_index + 1,
        })
    }
}

pub fn precommitment_of(nullifier: Field, salt: Field) -> Field {
    poseidon2(nullifier, salt)
}

/// `H(value, label, precommitment)`. Fails only if `value` is not a field element.
pub fn commitment_of(value: U256, label: Field, precommitment: Field) -> Result<Field, FieldError> {
    Ok(poseidon3(u256_to_field(value)?, label, precommitment))
}

pub fn nullifier_hash_of(secret: &Secret) -> Field {
    secret.nullifier_hash()
}
