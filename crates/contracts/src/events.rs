//! Typed entrypoint and pool events.
//!
//! Logs are decoded once, here, into closed enums. Every uint256 that the
//! protocol treats as a field element is range-checked on the way in.

use alloy_primitives::{Address, LogData, B256, U256};
use alloy_sol_types::SolEvent;
use ppool_core::utils::{serde_field, u256_to_field};
use ppool_core::Field;
use serde::{Deserialize, Serialize};

use crate::abi::AbiError;
use crate::bindings::{IEntrypoint, IPrivacyPool};

/// Where a log sits in the chain. Orders by block, then log index.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointDeposit {
    pub depositor: Address,
    pub pool: Address,
    #[serde(with = "serde_field")]
    pub commitment: Field,
    pub amount: U256,
    pub position: LogPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootUpdate {
    #[serde(with = "serde_field")]
    pub root: Field,
    pub ipfs_cid: String,
    pub timestamp: u64,
    pub position: LogPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRegistration {
    pub pool: Address,
    pub asset: Address,
    #[serde(with = "serde_field")]
    pub scope: Field,
    pub position: LogPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolWindDown {
    pub pool: Address,
    pub position: LogPosition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntrypointEvent {
    Deposited(EntrypointDeposit),
    RootUpdated(RootUpdate),
    PoolRegistered(PoolRegistration),
    PoolWindDown(PoolWindDown),
}

impl EntrypointEvent {
    pub fn position(&self) -> LogPosition {
        match self {
            EntrypointEvent::Deposited(e) => e.position,
            EntrypointEvent::RootUpdated(e) => e.position,
            EntrypointEvent::PoolRegistered(e) => e.position,
            EntrypointEvent::PoolWindDown(e) => e.position,
        }
    }
}

/// A deposit as seen by its pool. Keyed by `precommitment` in the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub pool: Address,
    pub depositor: Address,
    #[serde(with = "serde_field")]
    pub commitment: Field,
    #[serde(with = "serde_field")]
    pub label: Field,
    pub value: U256,
    #[serde(with = "serde_field")]
    pub precommitment: Field,
    pub position: LogPosition,
}

/// Keyed by `spent_nullifier` (the nullifier hash revealed by the spend).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEvent {
    pub pool: Address,
    pub processooor: Address,
    pub value: U256,
    #[serde(with = "serde_field")]
    pub spent_nullifier: Field,
    #[serde(with = "serde_field")]
    pub new_commitment: Field,
    pub position: LogPosition,
}

/// Keyed by `label`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagequitEvent {
    pub pool: Address,
    pub ragequitter: Address,
    #[serde(with = "serde_field")]
    pub commitment: Field,
    #[serde(with = "serde_field")]
    pub label: Field,
    pub value: U256,
    pub position: LogPosition,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    Deposited(DepositEvent),
    Withdrawn(WithdrawalEvent),
    Ragequit(RagequitEvent),
}

impl PoolEvent {
    pub fn position(&self) -> LogPosition {
        match self {
            PoolEvent::Deposited(e) => e.position,
            PoolEvent::Withdrawn(e) => e.position,
            PoolEvent::Ragequit(e) => e.position,
        }
    }
}

pub fn entrypoint_topics() -> Vec<B256> {
    vec![
        IEntrypoint::Deposited::SIGNATURE_HASH,
        IEntrypoint::RootUpdated::SIGNATURE_HASH,
        IEntrypoint::PoolRegistered::SIGNATURE_HASH,
        IEntrypoint::PoolWindDown::SIGNATURE_HASH,
    ]
}

pub fn pool_topics() -> Vec<B256> {
    vec![
        IPrivacyPool::Deposited::SIGNATURE_HASH,
        IPrivacyPool::Withdrawn::SIGNATURE_HASH,
        IPrivacyPool::Ragequit::SIGNATURE_HASH,
    ]
}

/// Decodes an entrypoint log. Unknown topics yield `Ok(None)`.
pub fn decode_entrypoint_log(
    data: &LogData,
    position: LogPosition,
) -> Result<Option<EntrypointEvent>, AbiError> {
    let Some(topic) = data.topics().first().copied() else {
        return Ok(None);
    };

    let event = if topic == IEntrypoint::Deposited::SIGNATURE_HASH {
        let log = IEntrypoint::Deposited::decode_log_data(data)?;
        EntrypointEvent::Deposited(EntrypointDeposit {
            depositor: log.depositor,
            pool: log.pool,
            commitment: u256_to_field(log.commitment)?,
            amount: log.amount,
            position,
        })
    } else if topic == IEntrypoint::RootUpdated::SIGNATURE_HASH {
        let log = IEntrypoint::RootUpdated::decode_log_data(data)?;
        EntrypointEvent::RootUpdated(RootUpdate {
            root: u256_to_field(log.root)?,
            ipfs_cid: log.ipfsCID,
            timestamp: u64::try_from(log.timestamp)
                .map_err(|_| AbiError::Overflow(format!("timestamp {}", log.timestamp)))?,
            position,
        })
    } else if topic == IEntrypoint::PoolRegistered::SIGNATURE_HASH {
        let log = IEntrypoint::PoolRegistered::decode_log_data(data)?;
        EntrypointEvent::PoolRegistered(PoolRegistration {
            pool: log.pool,
            asset: log.asset,
            scope: u256_to_field(log.scope)?,
            position,
        })
    } else if topic == IEntrypoint::PoolWindDown::SIGNATURE_HASH {
        let log = IEntrypoint::PoolWindDown::decode_log_data(data)?;
        EntrypointEvent::PoolWindDown(PoolWindDown {
            pool: log.pool,
            position,
        })
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

/// Decodes a log emitted by the pool at `pool`. Unknown topics yield `Ok(None)`.
pub fn decode_pool_log(
    pool: Address,
    data: &LogData,
    position: LogPosition,
) -> Result<Option<PoolEvent>, AbiError> {
    let Some(topic) = data.topics().first().copied() else {
        return Ok(None);
    };

    let event = if topic == IPrivacyPool::Deposited::SIGNATURE_HASH {
        let log = IPrivacyPool::Deposited::decode_log_data(data)?;
        PoolEvent::Deposited(DepositEvent {
            pool,
            depositor: log.depositor,
            commitment: u256_to_field(log.commitment)?,
            label: u256_to_field(log.label)?,
            value: log.value,
            precommitment: u256_to_field(log.precommitmentHash)?,
            position,
        })
    } else if topic == IPrivacyPool::Withdrawn::SIGNATURE_HASH {
        let log = IPrivacyPool::Withdrawn::decode_log_data(data)?;
        PoolEvent::Withdrawn(WithdrawalEvent {
            pool,
            processooor: log.processooor,
            value: log.value,
            spent_nullifier: u256_to_field(log.spentNullifier)?,
            new_commitment: u256_to_field(log.newCommitment)?,
            position,
        })
    } else if topic == IPrivacyPool::Ragequit::SIGNATURE_HASH {
        let log = IPrivacyPool::Ragequit::decode_log_data(data)?;
        PoolEvent::Ragequit(RagequitEvent {
            pool,
            ragequitter: log.ragequitter,
            commitment: u256_to_field(log.commitment)?,
            label: u256_to_field(log.label)?,
            value: log.value,
            position,
        })
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}
