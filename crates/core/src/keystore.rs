//! Raw key material at hierarchical paths.
//!
//! The account core never holds a master key. It asks a [`Keystore`] for the
//! 32 bytes at a path such as `m/28784'/0'/1'/3'` and hashes them into field
//! elements itself. [`HdKeystore`] is the default: a hardened-only
//! HMAC-SHA512 tree seeded from a BIP39 mnemonic or raw seed.

use std::fmt;

use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;

/// HMAC key for the master node.
const MASTER_SEED_KEY: &[u8] = b"privacy pools seed";

const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("Invalid seed length: {0} bytes (need 16..=64)")]
    InvalidSeedLength(usize),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Malformed derivation path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Non-hardened segment {segment} in path {path}")]
    NonHardened { path: String, segment: String },

    #[error("Key derivation failed")]
    DerivationFailed,
}

/// Source of deterministic key material.
pub trait Keystore: Send + Sync {
    /// Same path, same bytes. Errors when the path is rejected.
    fn derive_at_path(&self, path: &str) -> Result<Vec<u8>, KeystoreError>;
}

#[derive(Clone)]
struct ExtendedKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

impl ExtendedKey {
    fn master_from_seed(seed: &[u8]) -> Result<Self, KeystoreError> {
        if !(16..=64).contains(&seed.len()) {
            return Err(KeystoreError::InvalidSeedLength(seed.len()));
        }

        let mut hmac = Hmac::<Sha512>::new_from_slice(MASTER_SEED_KEY)
            .map_err(|_| KeystoreError::DerivationFailed)?;
        hmac.update(seed);
        Ok(Self::split(&hmac.finalize().into_bytes()))
    }

    fn derive_hardened(&self, index: u32) -> Result<Self, KeystoreError> {
        let mut hmac = Hmac::<Sha512>::new_from_slice(&self.chain_code)
            .map_err(|_| KeystoreError::DerivationFailed)?;

        // 0x00 || key || index
        hmac.update(&[0x00]);
        hmac.update(&self.key);
        hmac.update(&(index | HARDENED_OFFSET).to_be_bytes());

        Ok(Self::split(&hmac.finalize().into_bytes()))
    }

    fn split(output: &[u8]) -> Self {
        let mut key = [0u8; 32];
        let mut chain_code = [0u8; 32];
        key.copy_from_slice(&output[..32]);
        chain_code.copy_from_slice(&output[32..64]);
        Self { key, chain_code }
    }
}

/// Parses `m/a'/b'/...` into child indices without the hardened bit.
///
/// Every segment must be hardened (`'` or `h` suffix) and below 2^31.
pub fn parse_path(path: &str) -> Result<Vec<u32>, KeystoreError> {
    let invalid = |reason: &str| KeystoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = path.split('/');
    if segments.next() != Some("m") {
        return Err(invalid("must start with m"));
    }

    let mut indices = Vec::new();
    for segment in segments {
        let digits = segment
            .strip_suffix('\'')
            .or_else(|| segment.strip_suffix('h'))
            .ok_or_else(|| KeystoreError::NonHardened {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;
        let index: u32 = digits
            .parse()
            .map_err(|_| invalid(&format!("bad segment {segment}")))?;
        if index >= HARDENED_OFFSET {
            return Err(invalid(&format!("segment {segment} out of range")));
        }
        indices.push(index);
    }

    if indices.is_empty() {
        return Err(invalid("no segments"));
    }
    Ok(indices)
}

/// Hardened-only HD tree held in memory.
#[derive(Clone)]
pub struct HdKeystore {
    master: ExtendedKey,
}

impl HdKeystore {
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeystoreError> {
        Ok(Self {
            master: ExtendedKey::master_from_seed(seed)?,
        })
    }

    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, KeystoreError> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| KeystoreError::InvalidMnemonic(e.to_string()))?;
        Self::from_seed(&mnemonic.to_seed(passphrase))
    }
}

impl Keystore for HdKeystore {
    fn derive_at_path(&self, path: &str) -> Result<Vec<u8>, KeystoreError> {
        let mut node = self.master.clone();
        for index in parse_path(path)? {
            node = node.derive_hardened(index)?;
        }
        Ok(node.key.to_vec())
    }
}

impl fmt::Debug for HdKeystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeystore").finish_non_exhaustive()
    }
}
