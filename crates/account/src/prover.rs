//! Withdrawal circuit interface.
//!
//! Proving itself is external; this module fixes the circuit inputs and the
//! proof shape the rest of the crate relies on.

use alloy_primitives::U256;
use async_trait::async_trait;
use ppool_contracts::WithdrawProof;
use ppool_core::{field_to_u256, Field};
use serde_json::{json, Value};
use thiserror::Error;

pub const WITHDRAW_CIRCUIT: &str = "withdraw";

/// Public signals of the withdrawal circuit.
pub const PUBLIC_SIGNALS: usize = 8;

#[derive(Debug, Error)]
pub enum ProverError {
    #[error("Proof generation failed: {0}")]
    Failed(String),

    #[error("Expected {PUBLIC_SIGNALS} public signals, got {0}")]
    PublicSignalCount(usize),

    #[error("Public signal {name} does not match the prepared input")]
    PublicSignalMismatch { name: &'static str },
}

/// Private and public inputs of one withdrawal proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalCircuitInputs {
    pub withdrawn_value: U256,
    pub state_root: Field,
    pub state_tree_depth: usize,
    pub asp_root: Field,
    pub asp_tree_depth: usize,
    pub context: Field,
    pub label: Field,
    pub existing_value: U256,
    pub existing_nullifier: Field,
    pub existing_secret: Field,
    pub new_nullifier: Field,
    pub new_secret: Field,
    /// Padded to the circuit depth
    pub state_siblings: Vec<Field>,
    pub state_index: u64,
    /// Padded to the circuit depth
    pub asp_siblings: Vec<Field>,
    pub asp_index: u64,
}

fn decimal(value: Field) -> String {
    field_to_u256(value).to_string()
}

impl WithdrawalCircuitInputs {
    /// Signal map keyed by circuit input name, decimal strings throughout.
    pub fn to_signals(&self) -> Value {
        let siblings = |values: &[Field]| values.iter().map(|v| decimal(*v)).collect::<Vec<_>>();
        json!({
            "withdrawnValue": self.withdrawn_value.to_string(),
            "stateRoot": decimal(self.state_root),
            "stateTreeDepth": self.state_tree_depth.to_string(),
            "ASPRoot": decimal(self.asp_root),
            "ASPTreeDepth": self.asp_tree_depth.to_string(),
            "context": decimal(self.context),
            "label": decimal(self.label),
            "existingValue": self.existing_value.to_string(),
            "existingNullifier": decimal(self.existing_nullifier),
            "existingSecret": decimal(self.existing_secret),
            "newNullifier": decimal(self.new_nullifier),
            "newSecret": decimal(self.new_secret),
            "stateSiblings": siblings(&self.state_siblings),
            "stateIndex": self.state_index.to_string(),
            "ASPSiblings": siblings(&self.asp_siblings),
            "ASPIndex": self.asp_index.to_string(),
        })
    }
}

/// Groth16 proof with coordinates already in verifier-contract order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawalProof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
    /// `[newCommitmentHash, existingNullifierHash, withdrawnValue, stateRoot,
    /// stateTreeDepth, ASPRoot, ASPTreeDepth, context]`
    pub public_signals: Vec<U256>,
}

impl WithdrawalProof {
    pub fn to_sol(&self) -> Result<WithdrawProof, ProverError> {
        let signals: [U256; PUBLIC_SIGNALS] = self
            .public_signals
            .as_slice()
            .try_into()
            .map_err(|_| ProverError::PublicSignalCount(self.public_signals.len()))?;
        Ok(WithdrawProof {
            pA: self.a,
            pB: self.b,
            pC: self.c,
            pubSignals: signals,
        })
    }

    pub fn new_commitment(&self) -> Option<U256> {
        self.public_signals.first().copied()
    }

    pub fn nullifier_hash(&self) -> Option<U256> {
        self.public_signals.get(1).copied()
    }
}

#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(
        &self,
        circuit: &str,
        inputs: &WithdrawalCircuitInputs,
    ) -> Result<WithdrawalProof, ProverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> WithdrawalCircuitInputs {
        WithdrawalCircuitInputs {
            withdrawn_value: U256::from(5u64),
            state_root: Field::from(1u64),
            state_tree_depth: 2,
            asp_root: Field::from(2u64),
            asp_tree_depth: 0,
            context: Field::from(3u64),
            label: Field::from(4u64),
            existing_value: U256::from(10u64),
            existing_nullifier: Field::from(6u64),
            existing_secret: Field::from(7u64),
            new_nullifier: Field::from(8u64),
            new_secret: Field::from(9u64),
            state_siblings: vec![Field::from(11u64); 32],
            state_index: 3,
            asp_siblings: vec![Field::from(0u64); 32],
            asp_index: 0,
        }
    }

    #[test]
    fn test_signals_use_circuit_names() {
        let signals = inputs().to_signals();
        assert_eq!(signals["withdrawnValue"], "5");
        assert_eq!(signals["ASPRoot"], "2");
        assert_eq!(signals["existingSecret"], "7");
        assert_eq!(signals["stateSiblings"].as_array().unwrap().len(), 32);
        assert_eq!(signals["stateIndex"], "3");
    }

    #[test]
    fn test_to_sol_requires_eight_signals() {
        let mut proof = WithdrawalProof {
            a: [U256::from(1u64); 2],
            b: [[U256::from(2u64); 2]; 2],
            c: [U256::from(3u64); 2],
            public_signals: vec![U256::from(9u64); 7],
        };
        assert!(matches!(proof.to_sol(), Err(ProverError::PublicSignalCount(7))));

        proof.public_signals.push(U256::from(9u64));
        let sol = proof.to_sol().unwrap();
        assert_eq!(sol.pubSignals.len(), 8);
        assert_eq!(proof.new_commitment(), Some(U256::from(9u64)));
    }
}
