//! Hash-to-field for commitments, nullifiers and tree nodes.
//!
//! Circom-compatible Poseidon over the BN254 scalar field, backed by
//! `light-poseidon` (x^5 S-box, 8 full rounds, circomlibjs round constants).
//! Width is `inputs + 1`; 1 to 12 inputs are supported.

use light_poseidon::{Poseidon, PoseidonHasher};
use thiserror::Error;

use crate::Field;

pub const MAX_INPUTS: usize = 12;

#[derive(Debug, Error)]
pub enum PoseidonError {
    #[error("Invalid input count: {0} (expected 1..=12)")]
    InvalidInputCount(usize),

    #[error("Poseidon permutation failed: {0}")]
    Hasher(String),
}

pub fn poseidon_hash(inputs: &[Field]) -> Result<Field, PoseidonError> {
    if inputs.is_empty() || inputs.len() > MAX_INPUTS {
        return Err(PoseidonError::InvalidInputCount(inputs.len()));
    }

    let mut poseidon = Poseidon::<Field>::new_circom(inputs.len())
        .map_err(|_| PoseidonError::InvalidInputCount(inputs.len()))?;

    poseidon
        .hash(inputs)
        .map_err(|e| PoseidonError::Hasher(e.to_string()))
}

pub fn poseidon1(a: Field) -> Field {
    poseidon_hash(&[a]).expect("t=2 always valid")
}

/// Two-to-one compression used for Merkle nodes and precommitments.
pub fn poseidon2(left: Field, right: Field) -> Field {
    poseidon_hash(&[left, right]).expect("t=3 always valid")
}

pub fn poseidon3(a: Field, b: Field, c: Field) -> Field {
    poseidon_hash(&[a, b, c]).expect("t=4 always valid")
}

pub fn poseidon4(a: Field, b: Field, c: Field, d: Field) -> Field {
    poseidon_hash(&[a, b, c, d]).expect("t=5 always valid")
}
