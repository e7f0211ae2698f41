//! Deterministic note secrets.
//!
//! Each note owns a nullifier and a salt. Both come from keystore material at
//! `m/28784'/{account}'/{kind}'/{deposit}'[/{withdraw}']`, folded with the
//! chain id and entrypoint so one key yields unrelated secrets per deployment.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use thiserror::Error;

use crate::keystore::{Keystore, KeystoreError};
use crate::poseidon::{poseidon1, poseidon2, poseidon4};
use crate::utils::address_to_field;
use crate::Field;

pub const DERIVATION_PURPOSE: u32 = 28784;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Keystore rejected path {path}: {source}")]
    Keystore {
        path: String,
        #[source]
        source: KeystoreError,
    },

    #[error("Key material at {path} is {len} bytes, expected 32")]
    KeyLength { path: String, len: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecretKind {
    Salt,
    Nullifier,
}

impl SecretKind {
    fn path_index(self) -> u32 {
        match self {
            SecretKind::Salt => 0,
            SecretKind::Nullifier => 1,
        }
    }
}

/// Position of one secret in the derivation tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DerivationIndex {
    pub account_index: u32,
    pub kind: SecretKind,
    pub deposit_index: u32,
    pub withdraw_index: Option<u32>,
}

impl DerivationIndex {
    pub fn path(&self) -> String {
        let mut path = format!(
            "m/{}'/{}'/{}'/{}'",
            DERIVATION_PURPOSE,
            self.account_index,
            self.kind.path_index(),
            self.deposit_index
        );
        if let Some(withdraw) = self.withdraw_index {
            path.push_str(&format!("/{withdraw}'"));
        }
        path
    }
}

/// Path withdraw component for the note left after `withdrawals` spends.
///
/// The deposit note itself sits at the path without a withdraw component.
pub fn withdraw_path_index(withdrawals: u32) -> Option<u32> {
    (withdrawals > 0).then_some(withdrawals)
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret {
    pub nullifier: Field,
    pub salt: Field,
    pub precommitment: Field,
}

impl Secret {
    pub fn from_parts(nullifier: Field, salt: Field) -> Self {
        Self {
            nullifier,
            salt,
            precommitment: poseidon2(nullifier, salt),
        }
    }

    /// Value revealed on-chain when this note is spent.
    pub fn nullifier_hash(&self) -> Field {
        poseidon1(self.nullifier)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("precommitment", &self.precommitment)
            .finish_non_exhaustive()
    }
}

/// Derives secrets for one account on one `(chain, entrypoint)`.
#[derive(Clone)]
pub struct SecretDeriver {
    keystore: Arc<dyn Keystore>,
    account_index: u32,
    chain_id: u64,
    entrypoint: Address,
}

impl SecretDeriver {
    pub fn new(
        keystore: Arc<dyn Keystore>,
        account_index: u32,
        chain_id: u64,
        entrypoint: Address,
    ) -> Self {
        Self {
            keystore,
            account_index,
            chain_id,
            entrypoint,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn entrypoint(&self) -> Address {
        self.entrypoint
    }

    pub fn derive(
        &self,
        deposit_index: u32,
        withdraw_index: Option<u32>,
    ) -> Result<Secret, DerivationError> {
        let nullifier = self.derive_field(DerivationIndex {
            account_index: self.account_index,
            kind: SecretKind::Nullifier,
            deposit_index,
            withdraw_index,
        })?;
        let salt = self.derive_field(DerivationIndex {
            account_index: self.account_index,
            kind: SecretKind::Salt,
            deposit_index,
            withdraw_index,
        })?;
        Ok(Secret::from_parts(nullifier, salt))
    }

    /// Secret of the note left after `withdrawals` spends of a deposit.
    pub fn derive_note(&self, deposit_index: u32, withdrawals: u32) -> Result<Secret, DerivationError> {
        self.derive(deposit_index, withdraw_path_index(withdrawals))
    }

    fn derive_field(&self, index: DerivationIndex) -> Result<Field, DerivationError> {
        let path = index.path();
        let key = self
            .keystore
            .derive_at_path(&path)
            .map_err(|source| DerivationError::Keystore {
                path: path.clone(),
                source,
            })?;
        if key.len() != 32 {
            return Err(DerivationError::KeyLength {
                path,
                len: key.len(),
            });
        }

        // Two 128-bit halves enter the hash unreduced.
        let mut hi = [0u8; 16];
        let mut lo = [0u8; 16];
        hi.copy_from_slice(&key[..16]);
        lo.copy_from_slice(&key[16..]);

        Ok(poseidon4(
            Field::from(self.chain_id),
            address_to_field(self.entrypoint),
            Field::from(u128::from_be_bytes(hi)),
            Field::from(u128::from_be_bytes(lo)),
        ))
    }
}

impl fmt::Debug for SecretDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretDeriver")
            .field("account_index", &self.account_index)
            .field("chain_id", &self.chain_id)
            .field("entrypoint", &self.entrypoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::HdKeystore;
    use alloy_primitives::address;

    const ENTRYPOINT: Address = address!("6818809eefce719e480a7526d76bd3e561526b46");

    fn deriver(chain_id: u64, entrypoint: Address) -> SecretDeriver {
        let store = HdKeystore::from_seed(&[7u8; 32]).unwrap();
        SecretDeriver::new(Arc::new(store), 0, chain_id, entrypoint)
    }

    struct RejectingKeystore;

    impl Keystore for RejectingKeystore {
        fn derive_at_path(&self, path: &str) -> Result<Vec<u8>, KeystoreError> {
            Err(KeystoreError::InvalidPath {
                path: path.to_string(),
                reason: "locked".into(),
            })
        }
    }

    struct ShortKeystore;

    impl Keystore for ShortKeystore {
        fn derive_at_path(&self, _path: &str) -> Result<Vec<u8>, KeystoreError> {
            Ok(vec![1u8; 20])
        }
    }

    #[test]
    fn test_derivation_path_format() {
        let index = DerivationIndex {
            account_index: 2,
            kind: SecretKind::Nullifier,
            deposit_index: 5,
            withdraw_index: None,
        };
        assert_eq!(index.path(), "m/28784'/2'/1'/5'");

        let index = DerivationIndex {
            kind: SecretKind::Salt,
            withdraw_index: Some(3),
            ..index
        };
        assert_eq!(index.path(), "m/28784'/2'/0'/5'/3'");
    }

    #[test]
    fn test_derivation_is_pure() {
        let d = deriver(1, ENTRYPOINT);
        let a = d.derive(3, Some(2)).unwrap();
        let b = deriver(1, ENTRYPOINT).derive(3, Some(2)).unwrap();
        assert!(a == b);
        assert_eq!(a.precommitment, poseidon2(a.nullifier, a.salt));
    }

    #[test]
    fn test_derivation_is_scoped_per_deployment() {
        let base = deriver(1, ENTRYPOINT).derive(0, None).unwrap();
        let other_chain = deriver(10, ENTRYPOINT).derive(0, None).unwrap();
        let other_entry = deriver(1, Address::ZERO).derive(0, None).unwrap();

        assert_ne!(base.precommitment, other_chain.precommitment);
        assert_ne!(base.precommitment, other_entry.precommitment);
    }

    #[test]
    fn test_indices_yield_distinct_secrets() {
        let d = deriver(1, ENTRYPOINT);
        let deposit = d.derive(0, None).unwrap();
        let change = d.derive(0, Some(1)).unwrap();
        let next_deposit = d.derive(1, None).unwrap();

        assert_ne!(deposit.nullifier, deposit.salt);
        assert_ne!(deposit.precommitment, change.precommitment);
        assert_ne!(deposit.precommitment, next_deposit.precommitment);
        assert_ne!(deposit.nullifier_hash(), change.nullifier_hash());
    }

    #[test]
    fn test_note_secret_uses_withdraw_component_after_first_spend() {
        let d = deriver(1, ENTRYPOINT);
        assert!(d.derive_note(4, 0).unwrap() == d.derive(4, None).unwrap());
        assert!(d.derive_note(4, 2).unwrap() == d.derive(4, Some(2)).unwrap());
    }

    #[test]
    fn test_keystore_rejection_propagates() {
        let d = SecretDeriver::new(Arc::new(RejectingKeystore), 0, 1, ENTRYPOINT);
        match d.derive(0, None) {
            Err(DerivationError::Keystore { path, .. }) => assert_eq!(path, "m/28784'/0'/1'/0'"),
            other => panic!("expected keystore error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_key_material_rejected() {
        let d = SecretDeriver::new(Arc::new(ShortKeystore), 0, 1, ENTRYPOINT);
        assert!(matches!(
            d.derive(0, None),
            Err(DerivationError::KeyLength { len: 20, .. })
        ));
    }
}
