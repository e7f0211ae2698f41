//! Incremental event sync for one `(chain, entrypoint)`.
//!
//! A run walks `SyncingPools → SyncingEvents → SyncingAssets → SyncingAsp`
//! against a head snapshot taken at the start, collects everything into a
//! [`SyncBatch`] and applies it under a single write lock at the end. Any
//! stage error drops the batch, so the store only ever moves from one
//! confirmed state to the next. Individual pool fetch failures are tolerated:
//! that pool keeps its cursor and is retried on the next run.

use std::collections::{HashMap, HashSet};

use alloy_primitives::Address;
use futures::future::join_all;
use ppool_contracts::{EntrypointEvent, PoolEvent, RootUpdate};
use ppool_core::{Field, MerkleError, MerkleProofGenerator};
use thiserror::Error;
use tokio::sync::{watch, RwLock};

use crate::asp::{AspError, AspSource};
use crate::rpc::{ChainReader, RpcError};
use crate::store::{AspTree, ChainState, PoolInfo, SyncBatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    SyncingPools,
    SyncingEvents,
    SyncingAssets,
    SyncingAsp,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to read chain head: {0}")]
    Head(#[source] RpcError),

    #[error("Failed to fetch entrypoint events: {0}")]
    Entrypoint(#[source] RpcError),

    #[error("Failed to resolve pool {pool}: {source}")]
    PoolMetadata {
        pool: Address,
        #[source]
        source: RpcError,
    },

    #[error("Failed to resolve asset {asset}: {source}")]
    AssetMetadata {
        asset: Address,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Asp(#[from] AspError),

    #[error("ASP root mismatch: on-chain {expected}, fetched tree {computed}")]
    AspRootMismatch { expected: Field, computed: Field },

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// Outcome of one successful sync call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub head: u64,
    pub new_pools: usize,
    pub deposits: usize,
    pub withdrawals: usize,
    pub ragequits: usize,
    /// Pools whose events could not be fetched; their cursors did not move.
    pub failed_pools: Vec<Address>,
    pub asp_refreshed: bool,
    pub last_synced_block: u64,
    pub version: u64,
}

/// Inclusive `[from, to]` ranges of at most `size` blocks.
pub(crate) fn block_windows(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut windows = Vec::new();
    let mut current = from;
    while current <= to {
        let end = current.saturating_add(size - 1).min(to);
        windows.push((current, end));
        if end == u64::MAX {
            break;
        }
        current = end + 1;
    }
    windows
}

struct IdleOnDrop<'a>(&'a watch::Sender<SyncPhase>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(SyncPhase::Idle);
    }
}

/// Read-only facts captured before any fetching starts.
struct StartState {
    entrypoint: Address,
    start_block: u64,
    /// First entrypoint block not yet confirmed.
    entrypoint_from: u64,
    pools: HashMap<Address, PoolInfo>,
    /// First unconfirmed block per known pool.
    pool_from: HashMap<Address, u64>,
    assets: HashSet<Address>,
    latest_root: Option<RootUpdate>,
    asp_root: Option<Field>,
}

impl StartState {
    fn capture(state: &ChainState) -> Self {
        let pools: HashMap<Address, PoolInfo> = state
            .pools()
            .map(|pool| (pool.address, pool.clone()))
            .collect();
        let pool_from = pools
            .keys()
            .filter_map(|pool| state.next_pool_block(pool).map(|from| (*pool, from)))
            .collect();

        Self {
            entrypoint: state.key().entrypoint,
            start_block: state.start_block(),
            entrypoint_from: state.next_entrypoint_block(),
            pools,
            pool_from,
            assets: state.assets().map(|asset| asset.address).collect(),
            latest_root: state.latest_root().cloned(),
            asp_root: state.asp_tree().map(|tree| tree.root),
        }
    }
}

pub(crate) struct SyncPipeline<'a> {
    pub reader: &'a dyn ChainReader,
    pub asp: &'a dyn AspSource,
    pub merkle: &'a dyn MerkleProofGenerator,
    pub batch_size: u64,
    pub phase: &'a watch::Sender<SyncPhase>,
}

impl SyncPipeline<'_> {
    pub async fn run(&self, state: &RwLock<ChainState>) -> Result<SyncReport, SyncError> {
        let _idle = IdleOnDrop(self.phase);

        let head = self.reader.block_number().await.map_err(SyncError::Head)?;
        let start = StartState::capture(&*state.read().await);

        let mut batch = SyncBatch::default();
        let mut report = SyncReport {
            head,
            ..Default::default()
        };

        self.enter(SyncPhase::SyncingPools);
        let mut pools = start.pools.clone();
        if start.entrypoint_from <= head {
            self.sync_entrypoint(&start, head, &mut pools, &mut batch)
                .await?;
            batch.entrypoint_cursor = Some(head);
        }
        report.new_pools = batch.pools.len();

        self.enter(SyncPhase::SyncingEvents);
        report.failed_pools = self.sync_pools(&start, &pools, head, &mut batch).await;

        self.enter(SyncPhase::SyncingAssets);
        self.sync_assets(&start, &pools, &mut batch).await?;

        self.enter(SyncPhase::SyncingAsp);
        report.asp_refreshed = self.sync_asp(&start, &mut batch).await?;

        report.deposits = batch.deposits.len();
        report.withdrawals = batch.withdrawals.len();
        report.ragequits = batch.ragequits.len();

        let mut state = state.write().await;
        if !batch.is_empty() {
            state.apply(batch);
        }
        report.last_synced_block = state.last_synced_block();
        report.version = state.version();

        tracing::info!(
            head,
            last_synced_block = report.last_synced_block,
            deposits = report.deposits,
            withdrawals = report.withdrawals,
            failed_pools = report.failed_pools.len(),
            "Sync complete"
        );
        Ok(report)
    }

    fn enter(&self, phase: SyncPhase) {
        tracing::debug!(?phase, "Sync stage");
        self.phase.send_replace(phase);
    }

    async fn sync_entrypoint(
        &self,
        start: &StartState,
        head: u64,
        pools: &mut HashMap<Address, PoolInfo>,
        batch: &mut SyncBatch,
    ) -> Result<(), SyncError> {
        let mut referenced = Vec::new();

        for (from, to) in block_windows(start.entrypoint_from, head, self.batch_size) {
            tracing::info!("Syncing entrypoint blocks {} to {}", from, to);
            let events = self
                .reader
                .entrypoint_events(start.entrypoint, from, to)
                .await
                .map_err(SyncError::Entrypoint)?;

            for event in events {
                match event {
                    EntrypointEvent::PoolRegistered(registration) => {
                        if pools.contains_key(&registration.pool) {
                            continue;
                        }
                        let info = PoolInfo {
                            address: registration.pool,
                            asset: registration.asset,
                            scope: registration.scope,
                            registered_block: registration.position.block_number,
                            wound_down: false,
                        };
                        tracing::info!(pool = %info.address, asset = %info.asset, "Pool registered");
                        pools.insert(info.address, info.clone());
                        batch.pools.push(info);
                    }
                    EntrypointEvent::PoolWindDown(wind_down) => {
                        tracing::info!(pool = %wind_down.pool, "Pool wound down");
                        batch.wound_down.push(wind_down.pool);
                    }
                    EntrypointEvent::RootUpdated(update) => {
                        let newer = batch
                            .latest_root
                            .as_ref()
                            .map_or(true, |current| update.position > current.position);
                        if newer {
                            batch.latest_root = Some(update);
                        }
                    }
                    EntrypointEvent::Deposited(deposit) => referenced.push(deposit.pool),
                }
            }
        }

        // Pools registered before the scan window only show up through deposits.
        referenced.sort();
        referenced.dedup();
        for pool in referenced {
            if pools.contains_key(&pool) {
                continue;
            }
            let (asset, scope) = self
                .reader
                .pool_metadata(pool)
                .await
                .map_err(|source| SyncError::PoolMetadata { pool, source })?;
            let info = PoolInfo {
                address: pool,
                asset,
                scope,
                registered_block: start.start_block,
                wound_down: false,
            };
            tracing::info!(%pool, %asset, "Resolved unregistered pool");
            pools.insert(pool, info.clone());
            batch.pools.push(info);
        }

        Ok(())
    }

    async fn fetch_pool(&self, pool: Address, from: u64, head: u64) -> Result<Vec<PoolEvent>, RpcError> {
        let mut events = Vec::new();
        for (from, to) in block_windows(from, head, self.batch_size) {
            tracing::debug!(%pool, "Syncing pool blocks {} to {}", from, to);
            events.extend(self.reader.pool_events(pool, from, to).await?);
        }
        Ok(events)
    }

    async fn sync_pools(
        &self,
        start: &StartState,
        pools: &HashMap<Address, PoolInfo>,
        head: u64,
        batch: &mut SyncBatch,
    ) -> Vec<Address> {
        let mut jobs: Vec<(Address, u64)> = pools
            .values()
            .filter_map(|pool| {
                let from = start
                    .pool_from
                    .get(&pool.address)
                    .copied()
                    .unwrap_or(pool.registered_block);
                (from <= head).then_some((pool.address, from))
            })
            .collect();
        jobs.sort();

        let results = join_all(
            jobs.iter()
                .map(|&(pool, from)| async move { (pool, self.fetch_pool(pool, from, head).await) }),
        )
        .await;

        let mut failed = Vec::new();
        for (pool, result) in results {
            match result {
                Ok(events) => {
                    for event in events {
                        match event {
                            PoolEvent::Deposited(deposit) => batch.deposits.push(deposit),
                            PoolEvent::Withdrawn(withdrawal) => batch.withdrawals.push(withdrawal),
                            PoolEvent::Ragequit(ragequit) => batch.ragequits.push(ragequit),
                        }
                    }
                    batch.pool_cursors.push((pool, head));
                }
                Err(e) => {
                    tracing::warn!(%pool, error = %e, "Pool sync failed, cursor kept");
                    failed.push(pool);
                }
            }
        }
        failed
    }

    async fn sync_assets(
        &self,
        start: &StartState,
        pools: &HashMap<Address, PoolInfo>,
        batch: &mut SyncBatch,
    ) -> Result<(), SyncError> {
        let mut missing: Vec<Address> = pools
            .values()
            .map(|pool| pool.asset)
            .filter(|asset| !start.assets.contains(asset))
            .collect();
        missing.sort();
        missing.dedup();

        for asset in missing {
            let info = self
                .reader
                .asset_metadata(asset)
                .await
                .map_err(|source| SyncError::AssetMetadata { asset, source })?;
            tracing::debug!(%asset, symbol = %info.symbol, "Resolved asset");
            batch.assets.push(info);
        }
        Ok(())
    }

    async fn sync_asp(&self, start: &StartState, batch: &mut SyncBatch) -> Result<bool, SyncError> {
        let latest = match (&batch.latest_root, &start.latest_root) {
            (Some(new), Some(old)) if old.position > new.position => Some(old),
            (Some(new), _) => Some(new),
            (None, old) => old.as_ref(),
        };
        let Some(update) = latest.cloned() else {
            return Ok(false);
        };
        if start.asp_root == Some(update.root) {
            return Ok(false);
        }

        let leaves = self.asp.fetch_leaves(update.root, &update.ipfs_cid).await?;
        let computed = self.merkle.root(&leaves)?;
        if computed != update.root {
            tracing::error!(expected = %update.root, %computed, "ASP tree does not match on-chain root");
            return Err(SyncError::AspRootMismatch {
                expected: update.root,
                computed,
            });
        }

        tracing::info!(root = %update.root, leaves = leaves.len(), "ASP tree refreshed");
        batch.asp_tree = Some(AspTree {
            root: update.root,
            ipfs_cid: update.ipfs_cid,
            leaves,
        });
        Ok(true)
    }
}
