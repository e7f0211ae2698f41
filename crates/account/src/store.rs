//! Per-chain state store.
//!
//! Holds the raw facts synced for one `(chain, entrypoint)`: deposits by
//! precommitment, withdrawals by spent nullifier hash, ragequits by label,
//! pool and asset metadata, the ASP tree and the sync cursors. Facts are
//! never deleted or overwritten. Writes only happen through [`SyncBatch`],
//! applied in one step, and every applied batch bumps [`ChainState::version`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use alloy_primitives::Address;
use ppool_contracts::{DepositEvent, LogPosition, RagequitEvent, RootUpdate, WithdrawalEvent};
use ppool_core::utils::{serde_field, serde_field_vec};
use ppool_core::Field;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Snapshot belongs to {found}, not {expected}")]
    KeyMismatch { expected: ChainKey, found: ChainKey },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainKey {
    pub chain_id: u64,
    pub entrypoint: Address,
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.entrypoint)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub address: Address,
    pub asset: Address,
    #[serde(with = "serde_field")]
    pub scope: Field,
    pub registered_block: u64,
    pub wound_down: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Allow-list of approved labels, validated against an on-chain root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspTree {
    #[serde(with = "serde_field")]
    pub root: Field,
    pub ipfs_cid: String,
    #[serde(with = "serde_field_vec")]
    pub leaves: Vec<Field>,
}

/// Everything one sync call learned, applied atomically.
#[derive(Debug, Default)]
pub(crate) struct SyncBatch {
    pub pools: Vec<PoolInfo>,
    pub wound_down: Vec<Address>,
    pub deposits: Vec<DepositEvent>,
    pub withdrawals: Vec<WithdrawalEvent>,
    pub ragequits: Vec<RagequitEvent>,
    pub assets: Vec<AssetInfo>,
    pub latest_root: Option<RootUpdate>,
    pub asp_tree: Option<AspTree>,
    pub entrypoint_cursor: Option<u64>,
    pub pool_cursors: Vec<(Address, u64)>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
            && self.wound_down.is_empty()
            && self.deposits.is_empty()
            && self.withdrawals.is_empty()
            && self.ragequits.is_empty()
            && self.assets.is_empty()
            && self.latest_root.is_none()
            && self.asp_tree.is_none()
            && self.entrypoint_cursor.is_none()
            && self.pool_cursors.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ChainState {
    key: ChainKey,
    start_block: u64,
    version: u64,
    last_synced_block: u64,
    /// Last entrypoint block confirmed; `None` until the first scan lands.
    entrypoint_cursor: Option<u64>,
    pools: HashMap<Address, PoolInfo>,
    pool_cursors: HashMap<Address, u64>,
    assets: HashMap<Address, AssetInfo>,
    deposits: HashMap<Field, DepositEvent>,
    withdrawals: HashMap<Field, WithdrawalEvent>,
    ragequits: HashMap<Field, RagequitEvent>,
    /// State-tree leaves per pool in insertion order
    leaves: HashMap<Address, BTreeMap<LogPosition, Field>>,
    latest_root: Option<RootUpdate>,
    asp_tree: Option<AspTree>,
}

impl ChainState {
    /// Empty store that will scan from `start_block`.
    pub fn new(key: ChainKey, start_block: u64) -> Self {
        let cursor = start_block.saturating_sub(1);
        Self {
            key,
            start_block,
            version: 0,
            last_synced_block: cursor,
            entrypoint_cursor: None,
            pools: HashMap::new(),
            pool_cursors: HashMap::new(),
            assets: HashMap::new(),
            deposits: HashMap::new(),
            withdrawals: HashMap::new(),
            ragequits: HashMap::new(),
            leaves: HashMap::new(),
            latest_root: None,
            asp_tree: None,
        }
    }

    /// Chain and entrypoint this store belongs to.
    pub fn key(&self) -> ChainKey {
        self.key
    }

    /// First block ever scanned, usually the entrypoint deployment block.
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Bumped on every applied batch and on restore.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Lowest block every source is confirmed through.
    pub fn last_synced_block(&self) -> u64 {
        self.last_synced_block
    }

    /// Last entrypoint block confirmed, if any.
    pub fn entrypoint_cursor(&self) -> Option<u64> {
        self.entrypoint_cursor
    }

    /// First entrypoint block the next sync has to fetch.
    pub fn next_entrypoint_block(&self) -> u64 {
        self.entrypoint_cursor
            .map_or(self.start_block, |cursor| cursor + 1)
    }

    /// Last block confirmed for `pool`, if it has ever been fetched.
    pub fn pool_cursor(&self, pool: &Address) -> Option<u64> {
        self.pool_cursors.get(pool).copied()
    }

    /// First block the next sync has to fetch for a known `pool`.
    pub fn next_pool_block(&self, pool: &Address) -> Option<u64> {
        let info = self.pools.get(pool)?;
        Some(
            self.pool_cursor(pool)
                .map_or(info.registered_block, |cursor| {
                    (cursor + 1).max(info.registered_block)
                }),
        )
    }

    /// Deposit keyed by its precommitment.
    pub fn deposit(&self, precommitment: &Field) -> Option<&DepositEvent> {
        self.deposits.get(precommitment)
    }

    /// Withdrawal keyed by the nullifier hash it spent.
    pub fn withdrawal(&self, spent_nullifier: &Field) -> Option<&WithdrawalEvent> {
        self.withdrawals.get(spent_nullifier)
    }

    /// Ragequit keyed by label.
    pub fn ragequit(&self, label: &Field) -> Option<&RagequitEvent> {
        self.ragequits.get(label)
    }

    pub fn pool(&self, address: &Address) -> Option<&PoolInfo> {
        self.pools.get(address)
    }

    pub fn pools(&self) -> impl Iterator<Item = &PoolInfo> {
        self.pools.values()
    }

    pub fn asset(&self, address: &Address) -> Option<&AssetInfo> {
        self.assets.get(address)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetInfo> {
        self.assets.values()
    }

    /// Number of deposits across all pools.
    pub fn deposit_count(&self) -> usize {
        self.deposits.len()
    }

    /// Number of withdrawals across all pools.
    pub fn withdrawal_count(&self) -> usize {
        self.withdrawals.len()
    }

    /// Newest ASP root seen on the entrypoint.
    pub fn latest_root(&self) -> Option<&RootUpdate> {
        self.latest_root.as_ref()
    }

    /// Leaves fetched for the latest root, once validated.
    pub fn asp_tree(&self) -> Option<&AspTree> {
        self.asp_tree.as_ref()
    }

    /// Commitments inserted into `pool`'s state tree, in chain order.
    pub fn state_leaves(&self, pool: &Address) -> Vec<Field> {
        self.leaves
            .get(pool)
            .map(|leaves| leaves.values().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn register_pools(&mut self, pools: impl IntoIterator<Item = PoolInfo>) {
        for pool in pools {
            self.pools.entry(pool.address).or_insert(pool);
        }
    }

    pub(crate) fn mark_wound_down(&mut self, pools: impl IntoIterator<Item = Address>) {
        for address in pools {
            if let Some(pool) = self.pools.get_mut(&address) {
                pool.wound_down = true;
            }
        }
    }

    pub(crate) fn register_assets(&mut self, assets: impl IntoIterator<Item = AssetInfo>) {
        for asset in assets {
            self.assets.entry(asset.address).or_insert(asset);
        }
    }

    pub(crate) fn register_deposits(&mut self, deposits: impl IntoIterator<Item = DepositEvent>) {
        for deposit in deposits {
            if self.deposits.contains_key(&deposit.precommitment) {
                tracing::debug!(
                    precommitment = %deposit.precommitment,
                    "Deposit already registered"
                );
                continue;
            }
            self.insert_leaf(deposit.pool, deposit.position, deposit.commitment);
            self.deposits.insert(deposit.precommitment, deposit);
        }
    }

    pub(crate) fn register_withdrawals(
        &mut self,
        withdrawals: impl IntoIterator<Item = WithdrawalEvent>,
    ) {
        for withdrawal in withdrawals {
            if let Some(existing) = self.withdrawals.get(&withdrawal.spent_nullifier) {
                if existing.position != withdrawal.position {
                    tracing::warn!(
                        spent_nullifier = %withdrawal.spent_nullifier,
                        first_block = existing.position.block_number,
                        block = withdrawal.position.block_number,
                        "Nullifier spent twice, keeping first withdrawal"
                    );
                }
                continue;
            }
            self.insert_leaf(withdrawal.pool, withdrawal.position, withdrawal.new_commitment);
            self.withdrawals.insert(withdrawal.spent_nullifier, withdrawal);
        }
    }

    pub(crate) fn register_ragequits(&mut self, ragequits: impl IntoIterator<Item = RagequitEvent>) {
        for ragequit in ragequits {
            self.ragequits.entry(ragequit.label).or_insert(ragequit);
        }
    }

    pub(crate) fn register_asp_tree(&mut self, tree: AspTree) {
        self.asp_tree = Some(tree);
    }

    pub(crate) fn set_last_synced_block(&mut self, block: u64) {
        self.last_synced_block = self.last_synced_block.max(block);
    }

    fn insert_leaf(&mut self, pool: Address, position: LogPosition, leaf: Field) {
        self.leaves.entry(pool).or_default().insert(position, leaf);
    }

    fn set_latest_root(&mut self, update: RootUpdate) {
        let newer = self
            .latest_root
            .as_ref()
            .map_or(true, |current| update.position > current.position);
        if newer {
            self.latest_root = Some(update);
        }
    }

    /// Cursor summary: the lowest block every source is confirmed through.
    fn confirmed_block(&self) -> u64 {
        self.pools
            .keys()
            .filter_map(|pool| self.next_pool_block(pool))
            .fold(self.next_entrypoint_block(), u64::min)
            .saturating_sub(1)
    }

    pub(crate) fn apply(&mut self, batch: SyncBatch) {
        self.register_pools(batch.pools);
        self.mark_wound_down(batch.wound_down);
        self.register_assets(batch.assets);
        self.register_deposits(batch.deposits);
        self.register_withdrawals(batch.withdrawals);
        self.register_ragequits(batch.ragequits);

        if let Some(update) = batch.latest_root {
            self.set_latest_root(update);
        }
        if let Some(tree) = batch.asp_tree {
            self.register_asp_tree(tree);
        }

        if let Some(cursor) = batch.entrypoint_cursor {
            self.entrypoint_cursor = Some(self.entrypoint_cursor.map_or(cursor, |c| c.max(cursor)));
        }
        for (pool, cursor) in batch.pool_cursors {
            let entry = self.pool_cursors.entry(pool).or_insert(cursor);
            *entry = (*entry).max(cursor);
        }

        let confirmed = self.confirmed_block();
        self.set_last_synced_block(confirmed);
        self.version += 1;
    }

    /// Serializable copy of everything held.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            key: self.key,
            version: self.version,
            start_block: self.start_block,
            last_synced_block: self.last_synced_block,
            entrypoint_cursor: self.entrypoint_cursor,
            pools: self.pools.values().cloned().collect(),
            pool_cursors: self.pool_cursors.iter().map(|(k, v)| (*k, *v)).collect(),
            assets: self.assets.values().cloned().collect(),
            deposits: self.deposits.values().cloned().collect(),
            withdrawals: self.withdrawals.values().cloned().collect(),
            ragequits: self.ragequits.values().cloned().collect(),
            latest_root: self.latest_root.clone(),
            asp_tree: self.asp_tree.clone(),
        }
    }

    /// Rebuild a store from a snapshot; the version lands past the snapshot's.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = Self::new(snapshot.key, snapshot.start_block);
        state.register_pools(snapshot.pools);
        state.register_assets(snapshot.assets);
        state.register_deposits(snapshot.deposits);
        state.register_withdrawals(snapshot.withdrawals);
        state.register_ragequits(snapshot.ragequits);
        state.latest_root = snapshot.latest_root;
        state.asp_tree = snapshot.asp_tree;
        state.pool_cursors = snapshot.pool_cursors.into_iter().collect();
        state.entrypoint_cursor = snapshot.entrypoint_cursor;
        state.last_synced_block = snapshot.last_synced_block;
        state.version = snapshot.version + 1;
        state
    }

    /// Raise `version` above `floor`.
    pub(crate) fn advance_version_past(&mut self, floor: u64) {
        self.version = self.version.max(floor + 1);
    }
}

/// Serializable image of a [`ChainState`] for external persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub key: ChainKey,
    #[serde(default)]
    pub version: u64,
    pub start_block: u64,
    pub last_synced_block: u64,
    pub entrypoint_cursor: Option<u64>,
    pub pools: Vec<PoolInfo>,
    pub pool_cursors: Vec<(Address, u64)>,
    pub assets: Vec<AssetInfo>,
    pub deposits: Vec<DepositEvent>,
    pub withdrawals: Vec<WithdrawalEvent>,
    pub ragequits: Vec<RagequitEvent>,
    pub latest_root: Option<RootUpdate>,
    pub asp_tree: Option<AspTree>,
}
