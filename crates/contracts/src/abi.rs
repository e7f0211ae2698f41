use alloy_primitives::{address, keccak256, Address, Bytes, U256};
use alloy_sol_types::{sol_data, SolCall, SolType, SolValue};
use ppool_core::utils::{field_modulus, field_to_u256, u256_to_field, FieldError};
use ppool_core::Field;
use thiserror::Error;

use crate::bindings::{IERC20Metadata, IEntrypoint, IPrivacyPool, RelayData, WithdrawProof, Withdrawal};

/// Placeholder the pools use for the chain's native asset.
pub const NATIVE_ASSET: Address = address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("ABI decoding failed: {0}")]
    Decode(#[from] alloy_sol_types::Error),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Value does not fit: {0}")]
    Overflow(String),
}

/// ABI-encoded `RelayData`, the `Withdrawal.data` of a relayed withdrawal.
pub fn encode_relay_data(data: &RelayData) -> Bytes {
    Bytes::from(data.abi_encode())
}

/// Inverse of [`encode_relay_data`].
pub fn decode_relay_data(data: &[u8]) -> Result<RelayData, AbiError> {
    Ok(<RelayData as SolType>::abi_decode(data)?)
}

/// `keccak256(abi.encode(withdrawal, scope)) mod p`: the public input binding
/// a proof to its relay data and pool.
pub fn context_hash(withdrawal: &Withdrawal, scope: Field) -> Result<Field, AbiError> {
    let encoded = (withdrawal.clone(), field_to_u256(scope)).abi_encode_params();
    let digest = U256::from_be_bytes(keccak256(encoded).0);
    Ok(u256_to_field(digest % field_modulus())?)
}

/// Calldata for `Entrypoint.relay(withdrawal, proof, scope)`.
pub fn relay_calldata(withdrawal: &Withdrawal, proof: &WithdrawProof, scope: Field) -> Bytes {
    IEntrypoint::relayCall {
        withdrawal: withdrawal.clone(),
        proof: proof.clone(),
        scope: field_to_u256(scope),
    }
    .abi_encode()
    .into()
}

/// Calldata for `pool.ASSET()`.
pub fn asset_calldata() -> Bytes {
    IPrivacyPool::ASSETCall {}.abi_encode().into()
}

/// Calldata for `pool.SCOPE()`.
pub fn scope_calldata() -> Bytes {
    IPrivacyPool::SCOPECall {}.abi_encode().into()
}

/// Calldata for ERC-20 `symbol()`.
pub fn symbol_calldata() -> Bytes {
    IERC20Metadata::symbolCall {}.abi_encode().into()
}

/// Calldata for ERC-20 `decimals()`.
pub fn decimals_calldata() -> Bytes {
    IERC20Metadata::decimalsCall {}.abi_encode().into()
}

/// Decode an `eth_call` result holding one address.
pub fn decode_address_word(data: &[u8]) -> Result<Address, AbiError> {
    Ok(<sol_data::Address as SolType>::abi_decode(data)?)
}

/// Decode an `eth_call` result holding one `uint256`.
pub fn decode_uint_word(data: &[u8]) -> Result<U256, AbiError> {
    Ok(<sol_data::Uint<256> as SolType>::abi_decode(data)?)
}

/// Decode an `eth_call` result holding one dynamic string.
pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    Ok(<sol_data::String as SolType>::abi_decode(data)?)
}
