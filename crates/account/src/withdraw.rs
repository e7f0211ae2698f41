//! Withdrawal preparation.
//!
//! Picks a note, derives the change note, proves membership in the pool's
//! state tree and the ASP allow-list, runs the relayer auction, binds the
//! winning relay data into the context hash and hands everything to the
//! prover. The store lock is released before any network or proving work.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, Bytes, U256};
use ppool_contracts::{context_hash, relay_calldata, AbiError, Withdrawal};
use ppool_core::{
    field_to_u256, DerivationError, Field, FieldError, MerkleError, MerkleProofGenerator, Note,
    SecretDeriver, MAX_TREE_DEPTH,
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::auction::{get_best_quote, Quote, QuoteCriteria, Relayer};
use crate::prover::{Prover, ProverError, WithdrawalCircuitInputs, WithdrawalProof, WITHDRAW_CIRCUIT};
use crate::relayer::{ProofPayload, RelayRequest, RelayerError, WithdrawalPayload};
use crate::store::{ChainKey, ChainState};
use crate::views::{ViewCache, ViewError};

#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("Withdrawal amount must be positive")]
    ZeroAmount,

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Pool {0} is not known to the store")]
    UnknownPool(Address),

    #[error("ASP tree has not been synced")]
    AspNotSynced,

    #[error("Label {0} is not approved by the ASP")]
    LabelNotApproved(Field),

    #[error("Merkle proof failed: {0}")]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Relayer(#[from] RelayerError),

    #[error(transparent)]
    Prover(#[from] ProverError),

    #[error(transparent)]
    Abi(#[from] AbiError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub asset: Address,
    pub amount: U256,
    pub recipient: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Everything needed to submit one withdrawal.
#[derive(Clone, Debug)]
pub struct WithdrawalBundle {
    pub chain: ChainKey,
    pub pool: Address,
    pub scope: Field,
    pub spent_note: Note,
    pub change_note: Note,
    pub nullifier_hash: Field,
    pub context: Field,
    pub withdrawal: Withdrawal,
    pub proof: WithdrawalProof,
    pub quote: Quote,
    /// `Entrypoint.relay(withdrawal, proof, scope)`
    pub transaction: UnsignedTransaction,
}

impl WithdrawalBundle {
    pub fn relay_request(&self) -> RelayRequest {
        RelayRequest {
            withdrawal: WithdrawalPayload {
                processooor: self.withdrawal.processooor,
                data: self.withdrawal.data.clone(),
            },
            public_signals: self.proof.public_signals.clone(),
            proof: ProofPayload {
                pi_a: self.proof.a,
                pi_b: self.proof.b,
                pi_c: self.proof.c,
                protocol: "groth16",
                curve: "bn128",
            },
            scope: field_to_u256(self.scope),
            chain_id: self.chain.chain_id,
            fee_commitment: self.quote.fee_commitment.clone(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) struct WithdrawalPreparer<'a> {
    pub key: ChainKey,
    pub state: &'a RwLock<ChainState>,
    pub views: &'a ViewCache,
    pub deriver: &'a SecretDeriver,
    pub merkle: &'a dyn MerkleProofGenerator,
    pub prover: &'a dyn Prover,
    pub relayers: &'a [Arc<dyn Relayer>],
    pub max_fee_bps: U256,
}

impl WithdrawalPreparer<'_> {
    pub async fn prepare(&self, request: &WithdrawalRequest) -> Result<WithdrawalBundle, WithdrawalError> {
        if request.amount == U256::ZERO {
            return Err(WithdrawalError::ZeroAmount);
        }

        let (lineage, pool, state_leaves, asp) = {
            let state = self.state.read().await;
            let view = self.views.get_or_compute(&state, self.deriver)?;
            let lineage = view.select_note(request.asset, request.amount)?.clone();
            let pool = state
                .pool(&lineage.pool())
                .cloned()
                .ok_or(WithdrawalError::UnknownPool(lineage.pool()))?;
            let leaves = state.state_leaves(&pool.address);
            let asp = state.asp_tree().cloned().ok_or(WithdrawalError::AspNotSynced)?;
            (lineage, pool, leaves, asp)
        };

        let label = lineage.label();
        let (change_secret, change_note) = lineage.next_note(self.deriver, request.amount)?;

        let commitment = lineage.note.commitment()?;
        let state_proof = self.merkle.generate_proof(&state_leaves, commitment)?;
        let asp_proof = match self.merkle.generate_proof(&asp.leaves, label) {
            Ok(proof) => proof,
            Err(MerkleError::LeafNotFound(_) | MerkleError::EmptyTree) => {
                return Err(WithdrawalError::LabelNotApproved(label))
            }
            Err(e) => return Err(e.into()),
        };

        // The context commits to relay data, so the auction has to run first.
        let criteria = QuoteCriteria {
            chain_id: self.key.chain_id,
            asset: request.asset,
            amount: request.amount,
            recipient: request.recipient,
            max_fee_bps: self.max_fee_bps,
            now_ms: now_ms(),
        };
        let quote = get_best_quote(&criteria, self.relayers).await?;

        let withdrawal = Withdrawal {
            processooor: self.key.entrypoint,
            data: quote.withdrawal_data(),
        };
        let context = context_hash(&withdrawal, pool.scope)?;

        let inputs = WithdrawalCircuitInputs {
            withdrawn_value: request.amount,
            state_root: state_proof.root,
            state_tree_depth: state_proof.depth(),
            asp_root: asp_proof.root,
            asp_tree_depth: asp_proof.depth(),
            context,
            label,
            existing_value: lineage.note.value,
            existing_nullifier: lineage.secret.nullifier,
            existing_secret: lineage.secret.salt,
            new_nullifier: change_secret.nullifier,
            new_secret: change_secret.salt,
            state_siblings: state_proof.padded_siblings(MAX_TREE_DEPTH),
            state_index: state_proof.index,
            asp_siblings: asp_proof.padded_siblings(MAX_TREE_DEPTH),
            asp_index: asp_proof.index,
        };

        tracing::info!(
            pool = %pool.address,
            deposit_index = lineage.note.deposit_index,
            withdraw_index = lineage.note.withdraw_index,
            relayer = %quote.relayer,
            "Generating withdrawal proof"
        );
        let proof = self.prover.prove(WITHDRAW_CIRCUIT, &inputs).await?;
        let sol_proof = proof.to_sol()?;

        let nullifier_hash = lineage.secret.nullifier_hash();
        let expected = [
            ("newCommitmentHash", 0, field_to_u256(change_note.commitment()?)),
            ("existingNullifierHash", 1, field_to_u256(nullifier_hash)),
            ("context", 7, field_to_u256(context)),
        ];
        for (name, index, value) in expected {
            if sol_proof.pubSignals[index] != value {
                return Err(ProverError::PublicSignalMismatch { name }.into());
            }
        }

        let transaction = UnsignedTransaction {
            chain_id: self.key.chain_id,
            to: self.key.entrypoint,
            data: relay_calldata(&withdrawal, &sol_proof, pool.scope),
            value: U256::ZERO,
        };

        Ok(WithdrawalBundle {
            chain: self.key,
            pool: pool.address,
            scope: pool.scope,
            spent_note: lineage.note,
            change_note,
            nullifier_hash,
            context,
            withdrawal,
            proof,
            quote,
            transaction,
        })
    }
}
