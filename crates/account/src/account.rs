//! Account coordinator
//!
//! A [`PrivacyPoolsAccount`] owns one [`ChainContext`] per `(chain,
//! entrypoint)`. Contexts are created on first access from the chains
//! registered with the account and live for the account's lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use dashmap::DashMap;
use ppool_contracts::WithdrawalEvent;
use ppool_core::{Field, Keystore, LeanImt, MerkleProofGenerator, SecretDeriver};
use tokio::sync::{watch, Mutex, RwLock};

use crate::asp::{AspSource, HttpAspSource};
use crate::auction::Relayer;
use crate::config::{AccountConfig, ChainConfig};
use crate::error::{AccountError, AccountResult};
use crate::prover::Prover;
use crate::relayer::{RelayResponse, RelayerClient, RelayerError};
use crate::rpc::{ChainReader, JsonRpcChainReader};
use crate::store::{ChainKey, ChainState, StoreError, StoreSnapshot};
use crate::sync::{SyncPhase, SyncPipeline, SyncReport};
use crate::views::{AccountView, AssetBalance, Lineage, OwnedDeposit, ViewCache};
use crate::withdraw::{WithdrawalBundle, WithdrawalPreparer, WithdrawalRequest};

/// External services one chain talks to.
#[derive(Clone)]
pub struct ChainBackends {
    pub reader: Arc<dyn ChainReader>,
    pub asp: Arc<dyn AspSource>,
    pub merkle: Arc<dyn MerkleProofGenerator>,
    /// In tie-break order
    pub relayers: Vec<Arc<dyn Relayer>>,
}

impl ChainBackends {
    /// HTTP backends built from a chain's configuration.
    pub fn from_config(config: &ChainConfig) -> AccountResult<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let reader = JsonRpcChainReader::new(config.rpc_url.clone(), timeout)?;
        let asp = HttpAspSource::new(config.asp_url.clone(), timeout)?;
        let relayers = config
            .relayers
            .iter()
            .map(|url| {
                RelayerClient::new(url.clone(), timeout).map(|client| Arc::new(client) as Arc<dyn Relayer>)
            })
            .collect::<Result<Vec<_>, RelayerError>>()?;

        Ok(Self {
            reader: Arc::new(reader),
            asp: Arc::new(asp),
            merkle: Arc::new(LeanImt),
            relayers,
        })
    }
}

pub struct ChainContext {
    config: ChainConfig,
    state: RwLock<ChainState>,
    sync_lock: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
    deriver: SecretDeriver,
    views: ViewCache,
    backends: ChainBackends,
    prover: Arc<dyn Prover>,
}

impl ChainContext {
    pub fn new(
        config: ChainConfig,
        backends: ChainBackends,
        keystore: Arc<dyn Keystore>,
        account_index: u32,
        prover: Arc<dyn Prover>,
    ) -> Self {
        let key = config.key();
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            state: RwLock::new(ChainState::new(key, config.deployment_block)),
            sync_lock: Mutex::new(()),
            phase,
            deriver: SecretDeriver::new(keystore, account_index, key.chain_id, key.entrypoint),
            views: ViewCache::default(),
            backends,
            prover,
            config,
        }
    }

    pub fn key(&self) -> ChainKey {
        self.config.key()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub async fn last_synced_block(&self) -> u64 {
        self.state.read().await.last_synced_block()
    }

    /// Bring the store up to the current chain head. Concurrent calls queue.
    pub async fn sync(&self) -> AccountResult<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let pipeline = SyncPipeline {
            reader: self.backends.reader.as_ref(),
            asp: self.backends.asp.as_ref(),
            merkle: self.backends.merkle.as_ref(),
            batch_size: self.config.log_batch_size,
            phase: &self.phase,
        };
        Ok(pipeline.run(&self.state).await?)
    }

    pub async fn view(&self) -> AccountResult<Arc<AccountView>> {
        let state = self.state.read().await;
        Ok(self.views.get_or_compute(&state, &self.deriver)?)
    }

    pub async fn my_deposits(&self) -> AccountResult<Vec<OwnedDeposit>> {
        Ok(self.view().await?.deposits().cloned().collect())
    }

    pub async fn my_withdrawals(&self) -> AccountResult<HashMap<Field, Vec<WithdrawalEvent>>> {
        Ok(self.view().await?.withdrawals())
    }

    pub async fn balances(&self) -> AccountResult<Vec<AssetBalance>> {
        Ok(self.view().await?.balances())
    }

    pub async fn balance(&self, asset: Address) -> AccountResult<U256> {
        Ok(self.view().await?.balance(asset))
    }

    pub async fn select_note(&self, asset: Address, min_amount: U256) -> AccountResult<Lineage> {
        Ok(self.view().await?.select_note(asset, min_amount)?.clone())
    }

    pub async fn prepare_withdrawal(
        &self,
        request: &WithdrawalRequest,
    ) -> AccountResult<WithdrawalBundle> {
        let preparer = WithdrawalPreparer {
            key: self.key(),
            state: &self.state,
            views: &self.views,
            deriver: &self.deriver,
            merkle: self.backends.merkle.as_ref(),
            prover: self.prover.as_ref(),
            relayers: &self.backends.relayers,
            max_fee_bps: U256::from(self.config.max_relay_fee_bps),
        };
        Ok(preparer.prepare(request).await?)
    }

    /// Hand a prepared bundle to the relayer that won its auction.
    pub async fn submit(&self, bundle: &WithdrawalBundle) -> AccountResult<RelayResponse> {
        let relayer = self
            .backends
            .relayers
            .iter()
            .find(|relayer| relayer.id() == bundle.quote.relayer)
            .ok_or_else(|| RelayerError::UnknownRelayer(bundle.quote.relayer.clone()))?;

        let response = relayer.submit(&bundle.relay_request()).await?;
        tracing::info!(
            relayer = relayer.id(),
            tx_hash = ?response.tx_hash,
            request_id = ?response.request_id,
            "Withdrawal relayed"
        );
        Ok(response)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.snapshot()
    }

    /// Replace the store with a persisted snapshot of the same chain.
    pub async fn restore(&self, snapshot: StoreSnapshot) -> AccountResult<()> {
        let expected = self.key();
        if snapshot.key != expected {
            return Err(StoreError::KeyMismatch {
                expected,
                found: snapshot.key,
            }
            .into());
        }

        let _guard = self.sync_lock.lock().await;
        let mut state = self.state.write().await;
        let previous = state.version();
        *state = ChainState::from_snapshot(snapshot);
        state.advance_version_past(previous);
        self.views.invalidate();
        tracing::info!(
            chain = %expected,
            last_synced_block = state.last_synced_block(),
            "Store restored from snapshot"
        );
        Ok(())
    }
}

struct RegisteredChain {
    config: ChainConfig,
    backends: ChainBackends,
}

/// One master key across every registered chain.
pub struct PrivacyPoolsAccount {
    keystore: Arc<dyn Keystore>,
    account_index: u32,
    prover: Arc<dyn Prover>,
    registered: DashMap<ChainKey, RegisteredChain>,
    contexts: DashMap<ChainKey, Arc<ChainContext>>,
}

impl PrivacyPoolsAccount {
    pub fn new(keystore: Arc<dyn Keystore>, account_index: u32, prover: Arc<dyn Prover>) -> Self {
        Self {
            keystore,
            account_index,
            prover,
            registered: DashMap::new(),
            contexts: DashMap::new(),
        }
    }

    /// Account with HTTP backends for every configured chain.
    pub fn from_config(
        keystore: Arc<dyn Keystore>,
        config: &AccountConfig,
        prover: Arc<dyn Prover>,
    ) -> AccountResult<Self> {
        let account = Self::new(keystore, config.account_index, prover);
        for chain in &config.chains {
            if chain.entrypoint == Address::ZERO {
                return Err(AccountError::Config(format!(
                    "chain {} has no entrypoint address",
                    chain.chain_id
                )));
            }
            let backends = ChainBackends::from_config(chain)?;
            account.register_chain(chain.clone(), backends);
        }
        Ok(account)
    }

    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Make a chain available. Re-registering a chain that already has a
    /// context does not affect that context.
    pub fn register_chain(&self, config: ChainConfig, backends: ChainBackends) {
        let key = config.key();
        tracing::debug!(chain = %key, relayers = backends.relayers.len(), "Chain registered");
        self.registered.insert(key, RegisteredChain { config, backends });
    }

    pub fn chains(&self) -> Vec<ChainKey> {
        self.registered.iter().map(|entry| *entry.key()).collect()
    }

    /// The chain's context, created on first use.
    pub fn chain(&self, key: &ChainKey) -> AccountResult<Arc<ChainContext>> {
        if let Some(ctx) = self.contexts.get(key) {
            return Ok(ctx.clone());
        }

        let registered = self
            .registered
            .get(key)
            .ok_or(AccountError::UnknownChain(*key))?;
        let ctx = self
            .contexts
            .entry(*key)
            .or_insert_with(|| {
                tracing::info!(chain = %key, "Creating chain context");
                Arc::new(ChainContext::new(
                    registered.config.clone(),
                    registered.backends.clone(),
                    self.keystore.clone(),
                    self.account_index,
                    self.prover.clone(),
                ))
            })
            .clone();
        Ok(ctx)
    }

    pub async fn sync(&self, key: &ChainKey) -> AccountResult<SyncReport> {
        self.chain(key)?.sync().await
    }

    pub async fn my_deposits(&self, key: &ChainKey) -> AccountResult<Vec<OwnedDeposit>> {
        self.chain(key)?.my_deposits().await
    }

    pub async fn my_withdrawals(
        &self,
        key: &ChainKey,
    ) -> AccountResult<HashMap<Field, Vec<WithdrawalEvent>>> {
        self.chain(key)?.my_withdrawals().await
    }

    pub async fn balances(&self, key: &ChainKey) -> AccountResult<Vec<AssetBalance>> {
        self.chain(key)?.balances().await
    }

    pub async fn balance(&self, key: &ChainKey, asset: Address) -> AccountResult<U256> {
        self.chain(key)?.balance(asset).await
    }

    pub async fn select_note(
        &self,
        key: &ChainKey,
        asset: Address,
        min_amount: U256,
    ) -> AccountResult<Lineage> {
        self.chain(key)?.select_note(asset, min_amount).await
    }

    pub async fn prepare_withdrawal(
        &self,
        key: &ChainKey,
        request: &WithdrawalRequest,
    ) -> AccountResult<WithdrawalBundle> {
        self.chain(key)?.prepare_withdrawal(request).await
    }

    pub async fn submit(&self, bundle: &WithdrawalBundle) -> AccountResult<RelayResponse> {
        self.chain(&bundle.chain)?.submit(bundle).await
    }

    pub async fn snapshot(&self, key: &ChainKey) -> AccountResult<StoreSnapshot> {
        Ok(self.chain(key)?.snapshot().await)
    }

    pub async fn restore(&self, snapshot: StoreSnapshot) -> AccountResult<()> {
        self.chain(&snapshot.key)?.restore(snapshot).await
    }
}
