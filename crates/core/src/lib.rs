//! Cryptographic core of a privacy-pool account.
//!
//! Everything in this crate is pure: secrets are derived from a [`Keystore`],
//! commitments and nullifier hashes are Poseidon hashes over BN254, and
//! Merkle proofs are computed from leaf lists held by the caller.

pub mod commitment;
pub mod keystore;
pub mod merkle;
pub mod poseidon;
pub mod secrets;
pub mod utils;

pub use commitment::{commitment_of, nullifier_hash_of, precommitment_of, Note, NoteError};
pub use keystore::{HdKeystore, Keystore, KeystoreError};
pub use merkle::{LeanImt, MerkleError, MerkleProof, MerkleProofGenerator, MAX_TREE_DEPTH};
pub use secrets::{DerivationError, DerivationIndex, Secret, SecretDeriver, SecretKind};
pub use utils::{address_to_field, field_to_u256, u256_to_field, FieldError};

pub type Field = ark_bn254::Fr;
