//! Error types for the account coordinator

use ppool_core::{DerivationError, FieldError, KeystoreError};
use thiserror::Error;

use crate::asp::AspError;
use crate::relayer::RelayerError;
use crate::rpc::RpcError;
use crate::store::{ChainKey, StoreError};
use crate::sync::SyncError;
use crate::views::ViewError;
use crate::withdraw::WithdrawalError;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Chain {0} is not registered")]
    UnknownChain(ChainKey),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Asp(#[from] AspError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error("Withdrawal failed: {0}")]
    Withdrawal(#[from] WithdrawalError),

    #[error("Relayer error: {0}")]
    Relayer(#[from] RelayerError),
}

pub type AccountResult<T> = Result<T, AccountError>;
