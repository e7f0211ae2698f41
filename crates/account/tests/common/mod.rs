//! Shared test utilities for ppool-account tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use ppool_account::relayer::{FeeCommitment, QuoteResponse, RelayerDetails};
use ppool_account::rpc::native_asset_info;
use ppool_account::{
    AspError, AspSource, AssetInfo, ChainBackends, ChainConfig, ChainContext, ChainKey,
    ChainReader, PrivacyPoolsAccount, Prover, ProverError, QuoteCriteria, RawQuote, RelayRequest,
    RelayResponse, Relayer, RelayerError, RpcError, SyncReport, WithdrawalCircuitInputs,
    WithdrawalProof,
};
use ppool_contracts::{
    encode_relay_data, DepositEvent, EntrypointDeposit, EntrypointEvent, LogPosition, PoolEvent,
    PoolRegistration, RagequitEvent, RelayData, RootUpdate, WithdrawalEvent, NATIVE_ASSET,
};
use ppool_core::{
    commitment_of, field_to_u256, nullifier_hash_of, precommitment_of, Field, HdKeystore, Keystore,
    LeanImt, MerkleProof, Secret, SecretDeriver,
};

pub const CHAIN_ID: u64 = 1;
pub const ENTRYPOINT: Address = address!("6818809eefce719e480a7526d76bd3e561526b46");
pub const POOL: Address = address!("f241d57c6debae225c0f2e6ea1529373c9a9c9fb");
pub const TOKEN_POOL: Address = address!("1111111111111111111111111111111111111111");
pub const TOKEN: Address = address!("2222222222222222222222222222222222222222");
pub const DEPOSITOR: Address = address!("3333333333333333333333333333333333333333");
pub const RECIPIENT: Address = address!("4444444444444444444444444444444444444444");
pub const FEE_RECEIVER: Address = address!("5555555555555555555555555555555555555555");

pub const SEED: [u8; 32] = [7u8; 32];

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn key() -> ChainKey {
    ChainKey {
        chain_id: CHAIN_ID,
        entrypoint: ENTRYPOINT,
    }
}

pub fn keystore() -> Arc<dyn Keystore> {
    Arc::new(HdKeystore::from_seed(&SEED).unwrap())
}

pub fn deriver() -> SecretDeriver {
    SecretDeriver::new(keystore(), 0, CHAIN_ID, ENTRYPOINT)
}

pub fn scope(pool: Address) -> Field {
    ppool_core::address_to_field(pool)
}

pub fn label(n: u64) -> Field {
    Field::from(1_000 + n)
}

pub fn position(block: u64, log_index: u64) -> LogPosition {
    LogPosition {
        block_number: block,
        log_index,
        tx_hash: B256::with_last_byte((block * 16 + log_index) as u8),
    }
}

pub fn pool_registered(pool: Address, asset: Address, block: u64) -> EntrypointEvent {
    EntrypointEvent::PoolRegistered(PoolRegistration {
        pool,
        asset,
        scope: scope(pool),
        position: position(block, 0),
    })
}

pub fn entrypoint_deposit(pool: Address, commitment: Field, amount: u64, block: u64) -> EntrypointEvent {
    EntrypointEvent::Deposited(EntrypointDeposit {
        depositor: DEPOSITOR,
        pool,
        commitment,
        amount: U256::from(amount),
        position: position(block, 1),
    })
}

pub fn root_updated(root: Field, block: u64) -> EntrypointEvent {
    EntrypointEvent::RootUpdated(RootUpdate {
        root,
        ipfs_cid: format!("bafy-root-{block}"),
        timestamp: 1_700_000_000 + block,
        position: position(block, 2),
    })
}

/// Deposit owned by the test key at `deposit_index`.
pub fn owned_deposit(pool: Address, deposit_index: u32, value: u64, label: Field, block: u64) -> DepositEvent {
    let secret = deriver().derive_note(deposit_index, 0).unwrap();
    deposit_from(pool, &secret, value, label, block)
}

/// Deposit nobody in the test owns.
pub fn foreign_deposit(pool: Address, value: u64, label: Field, block: u64) -> DepositEvent {
    let secret = Secret::from_parts(Field::from(block * 31 + 5), Field::from(block * 17 + 3));
    deposit_from(pool, &secret, value, label, block)
}

fn deposit_from(pool: Address, secret: &Secret, value: u64, label: Field, block: u64) -> DepositEvent {
    let value = U256::from(value);
    DepositEvent {
        pool,
        depositor: DEPOSITOR,
        commitment: commitment_of(value, label, secret.precommitment).unwrap(),
        label,
        value,
        precommitment: secret.precommitment,
        position: position(block, 3),
    }
}

/// Withdrawal of `amount` spending the note after `withdrawals` prior spends,
/// leaving `remaining` in the change note.
pub fn owned_withdrawal(
    pool: Address,
    deposit_index: u32,
    withdrawals: u32,
    amount: u64,
    remaining: u64,
    label: Field,
    block: u64,
) -> WithdrawalEvent {
    let deriver = deriver();
    let spent = deriver.derive_note(deposit_index, withdrawals).unwrap();
    let next = deriver.derive_note(deposit_index, withdrawals + 1).unwrap();
    WithdrawalEvent {
        pool,
        processooor: ENTRYPOINT,
        value: U256::from(amount),
        spent_nullifier: spent.nullifier_hash(),
        new_commitment: commitment_of(U256::from(remaining), label, next.precommitment).unwrap(),
        position: position(block, 4),
    }
}

pub fn ragequit(pool: Address, commitment: Field, label: Field, value: u64, block: u64) -> RagequitEvent {
    RagequitEvent {
        pool,
        ragequitter: DEPOSITOR,
        commitment,
        label,
        value: U256::from(value),
        position: position(block, 5),
    }
}

pub fn asp_root(leaves: &[Field]) -> Field {
    use ppool_core::MerkleProofGenerator;
    LeanImt.root(leaves).unwrap()
}

#[derive(Default)]
struct ChainData {
    head: u64,
    entrypoint: Vec<EntrypointEvent>,
    pools: HashMap<Address, Vec<PoolEvent>>,
    metadata: HashMap<Address, (Address, Field)>,
    failing: HashSet<Address>,
    pool_calls: usize,
    metadata_calls: usize,
}

/// In-memory chain serving events by block range.
#[derive(Default)]
pub struct FakeChain {
    data: Mutex<ChainData>,
}

impl FakeChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.data.lock().unwrap().head = head;
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.data.lock().unwrap().head = head;
    }

    pub fn push_entrypoint(&self, event: EntrypointEvent) {
        self.data.lock().unwrap().entrypoint.push(event);
    }

    pub fn push_deposit(&self, deposit: DepositEvent) {
        let mut data = self.data.lock().unwrap();
        data.pools.entry(deposit.pool).or_default().push(PoolEvent::Deposited(deposit));
    }

    pub fn push_withdrawal(&self, withdrawal: WithdrawalEvent) {
        let mut data = self.data.lock().unwrap();
        data.pools
            .entry(withdrawal.pool)
            .or_default()
            .push(PoolEvent::Withdrawn(withdrawal));
    }

    pub fn push_ragequit(&self, ragequit: RagequitEvent) {
        let mut data = self.data.lock().unwrap();
        data.pools.entry(ragequit.pool).or_default().push(PoolEvent::Ragequit(ragequit));
    }

    /// Answer `ASSET()`/`SCOPE()` for a pool that never shows a registration.
    pub fn set_pool_metadata(&self, pool: Address, asset: Address) {
        self.data.lock().unwrap().metadata.insert(pool, (asset, scope(pool)));
    }

    pub fn set_failing(&self, pool: Address, failing: bool) {
        let mut data = self.data.lock().unwrap();
        if failing {
            data.failing.insert(pool);
        } else {
            data.failing.remove(&pool);
        }
    }

    pub fn pool_calls(&self) -> usize {
        self.data.lock().unwrap().pool_calls
    }

    pub fn metadata_calls(&self) -> usize {
        self.data.lock().unwrap().metadata_calls
    }
}

fn in_range(position: &LogPosition, from: u64, to: u64) -> bool {
    (from..=to).contains(&position.block_number)
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.data.lock().unwrap().head)
    }

    async fn entrypoint_events(
        &self,
        _entrypoint: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EntrypointEvent>, RpcError> {
        let data = self.data.lock().unwrap();
        let mut events: Vec<_> = data
            .entrypoint
            .iter()
            .filter(|event| in_range(&event.position(), from_block, to_block))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.position());
        Ok(events)
    }

    async fn pool_events(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, RpcError> {
        let mut data = self.data.lock().unwrap();
        data.pool_calls += 1;
        if data.failing.contains(&pool) {
            return Err(RpcError::Transport(format!("pool {pool} unavailable")));
        }
        let mut events: Vec<_> = data
            .pools
            .get(&pool)
            .into_iter()
            .flatten()
            .filter(|event| in_range(&event.position(), from_block, to_block))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.position());
        Ok(events)
    }

    async fn pool_metadata(&self, pool: Address) -> Result<(Address, Field), RpcError> {
        let mut data = self.data.lock().unwrap();
        data.metadata_calls += 1;
        data.metadata.get(&pool).copied().ok_or(RpcError::CallFailed {
            contract: pool,
            reason: "execution reverted".into(),
        })
    }

    async fn asset_metadata(&self, asset: Address) -> Result<AssetInfo, RpcError> {
        self.data.lock().unwrap().metadata_calls += 1;
        if asset == NATIVE_ASSET {
            return Ok(native_asset_info());
        }
        Ok(AssetInfo {
            address: asset,
            symbol: "TKN".into(),
            decimals: 6,
        })
    }
}

/// ASP service returning a fixed leaf set.
#[derive(Default)]
pub struct FakeAsp {
    leaves: Mutex<Vec<Field>>,
    fetches: Mutex<usize>,
}

impl FakeAsp {
    pub fn new(leaves: Vec<Field>) -> Arc<Self> {
        Arc::new(Self {
            leaves: Mutex::new(leaves),
            fetches: Mutex::new(0),
        })
    }

    pub fn set_leaves(&self, leaves: Vec<Field>) {
        *self.leaves.lock().unwrap() = leaves;
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl AspSource for FakeAsp {
    async fn fetch_leaves(&self, _root: Field, _ipfs_cid: &str) -> Result<Vec<Field>, AspError> {
        *self.fetches.lock().unwrap() += 1;
        Ok(self.leaves.lock().unwrap().clone())
    }
}

/// Prover that checks the witness the way the circuit would and emits the
/// matching public signals with a dummy proof.
#[derive(Default)]
pub struct FakeProver {
    pub last_inputs: Mutex<Option<WithdrawalCircuitInputs>>,
    pub corrupt_signals: bool,
    /// Chain to sync while proving; set after the account exists.
    pub sync_while_proving: Mutex<Option<Arc<ChainContext>>>,
    pub sync_during_prove: Mutex<Option<SyncReport>>,
}

impl FakeProver {
    pub fn sync_on_prove(&self, ctx: Arc<ChainContext>) {
        *self.sync_while_proving.lock().unwrap() = Some(ctx);
    }
}

fn trimmed_proof(root: Field, leaf: Field, index: u64, siblings: &[Field], depth: usize) -> MerkleProof {
    MerkleProof {
        root,
        leaf,
        index,
        siblings: siblings[..depth].to_vec(),
    }
}

#[async_trait]
impl Prover for FakeProver {
    async fn prove(
        &self,
        circuit: &str,
        inputs: &WithdrawalCircuitInputs,
    ) -> Result<WithdrawalProof, ProverError> {
        assert_eq!(circuit, "withdraw");
        *self.last_inputs.lock().unwrap() = Some(inputs.clone());

        let ctx = self.sync_while_proving.lock().unwrap().clone();
        if let Some(ctx) = ctx {
            let report = tokio::time::timeout(Duration::from_secs(2), ctx.sync())
                .await
                .map_err(|_| ProverError::Failed("store stayed locked while proving".into()))?
                .map_err(|e| ProverError::Failed(e.to_string()))?;
            *self.sync_during_prove.lock().unwrap() = Some(report);
        }

        let existing = Secret::from_parts(inputs.existing_nullifier, inputs.existing_secret);
        let existing_commitment =
            commitment_of(inputs.existing_value, inputs.label, existing.precommitment)
                .map_err(|e| ProverError::Failed(e.to_string()))?;

        let state = trimmed_proof(
            inputs.state_root,
            existing_commitment,
            inputs.state_index,
            &inputs.state_siblings,
            inputs.state_tree_depth,
        );
        let asp = trimmed_proof(
            inputs.asp_root,
            inputs.label,
            inputs.asp_index,
            &inputs.asp_siblings,
            inputs.asp_tree_depth,
        );
        if !state.verify() || !asp.verify() {
            return Err(ProverError::Failed("merkle witness does not verify".into()));
        }
        if inputs.withdrawn_value > inputs.existing_value {
            return Err(ProverError::Failed("withdrawn value exceeds note".into()));
        }

        let remaining = inputs.existing_value - inputs.withdrawn_value;
        let new_commitment = commitment_of(
            remaining,
            inputs.label,
            precommitment_of(inputs.new_nullifier, inputs.new_secret),
        )
        .map_err(|e| ProverError::Failed(e.to_string()))?;

        let mut public_signals = vec![
            field_to_u256(new_commitment),
            field_to_u256(nullifier_hash_of(&existing)),
            inputs.withdrawn_value,
            field_to_u256(inputs.state_root),
            U256::from(inputs.state_tree_depth),
            field_to_u256(inputs.asp_root),
            U256::from(inputs.asp_tree_depth),
            field_to_u256(inputs.context),
        ];
        if self.corrupt_signals {
            public_signals[0] += U256::from(1u64);
        }

        Ok(WithdrawalProof {
            a: [U256::from(1u64), U256::from(2u64)],
            b: [[U256::from(3u64), U256::from(4u64)], [U256::from(5u64), U256::from(6u64)]],
            c: [U256::from(7u64), U256::from(8u64)],
            public_signals,
        })
    }
}

/// Relayer answering from fixed data and recording submissions.
pub struct StaticRelayer {
    id: String,
    answer: Option<RawQuote>,
    pub submitted: Mutex<Vec<RelayRequest>>,
}

impl StaticRelayer {
    fn details() -> RelayerDetails {
        RelayerDetails {
            chain_id: CHAIN_ID,
            fee_bps: U256::from(10u64),
            min_withdraw_amount: U256::from(1u64),
            fee_receiver_address: FEE_RECEIVER,
            asset_address: NATIVE_ASSET,
        }
    }

    pub fn quoting(id: &str, fee_bps: u64) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            answer: Some(RawQuote {
                details: Self::details(),
                quote: QuoteResponse {
                    base_fee_bps: U256::from(fee_bps),
                    fee_bps: U256::from(fee_bps),
                    fee_commitment: None,
                },
            }),
            submitted: Mutex::new(Vec::new()),
        })
    }

    /// Quote carrying a signed commitment to `recipient`.
    pub fn committing(id: &str, fee_bps: u64, recipient: Address) -> Arc<Self> {
        let withdrawal_data = encode_relay_data(&RelayData {
            recipient,
            feeRecipient: FEE_RECEIVER,
            relayFeeBPS: U256::from(fee_bps),
        });
        Arc::new(Self {
            id: id.to_string(),
            answer: Some(RawQuote {
                details: Self::details(),
                quote: QuoteResponse {
                    base_fee_bps: U256::from(fee_bps),
                    fee_bps: U256::from(fee_bps),
                    fee_commitment: Some(FeeCommitment {
                        expiration: u64::MAX / 2,
                        withdrawal_data,
                        signed_relayer_commitment: Bytes::from(vec![0x1b; 65]),
                    }),
                },
            }),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn offline(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            answer: None,
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl Relayer for StaticRelayer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_quote(&self, _criteria: &QuoteCriteria) -> Result<RawQuote, RelayerError> {
        self.answer
            .clone()
            .ok_or_else(|| RelayerError::Rejected(format!("{} is offline", self.id)))
    }

    async fn submit(&self, request: &RelayRequest) -> Result<RelayResponse, RelayerError> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(RelayResponse {
            success: true,
            tx_hash: Some(B256::repeat_byte(0xab)),
            timestamp: Some(1_700_000_000_000),
            request_id: Some(format!("{}-1", self.id)),
            error: None,
        })
    }
}

pub struct Harness {
    pub chain: Arc<FakeChain>,
    pub asp: Arc<FakeAsp>,
    pub prover: Arc<FakeProver>,
    pub account: PrivacyPoolsAccount,
}

pub fn chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: CHAIN_ID,
        entrypoint: ENTRYPOINT,
        deployment_block: 1,
        log_batch_size: 4,
        max_relay_fee_bps: 500,
        ..Default::default()
    }
}

/// Account over a fake chain with the given relayers.
pub fn harness(head: u64, asp_leaves: Vec<Field>, relayers: Vec<Arc<dyn Relayer>>) -> Harness {
    harness_with_prover(head, asp_leaves, relayers, FakeProver::default())
}

pub fn harness_with_prover(
    head: u64,
    asp_leaves: Vec<Field>,
    relayers: Vec<Arc<dyn Relayer>>,
    prover: FakeProver,
) -> Harness {
    init_tracing();
    let chain = FakeChain::new(head);
    let asp = FakeAsp::new(asp_leaves);
    let prover = Arc::new(prover);

    let account = PrivacyPoolsAccount::new(keystore(), 0, prover.clone());
    account.register_chain(
        chain_config(),
        ChainBackends {
            reader: chain.clone(),
            asp: asp.clone(),
            merkle: Arc::new(LeanImt),
            relayers,
        },
    );

    Harness {
        chain,
        asp,
        prover,
        account,
    }
}
