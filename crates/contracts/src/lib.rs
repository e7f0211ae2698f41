//! Contract surface of a privacy-pool deployment.
//!
//! `bindings` holds the `sol!` interfaces, `events` turns raw logs into typed
//! events with field-element payloads, and `abi` builds relay data, the
//! withdrawal context hash and `relay` calldata.

pub mod abi;
pub mod bindings;
pub mod events;

pub use abi::{
    context_hash, decode_relay_data, encode_relay_data, relay_calldata, AbiError, NATIVE_ASSET,
};
pub use bindings::{RelayData, WithdrawProof, Withdrawal};
pub use events::{
    decode_entrypoint_log, decode_pool_log, DepositEvent, EntrypointDeposit, EntrypointEvent,
    LogPosition, PoolEvent, PoolRegistration, PoolWindDown, RagequitEvent, RootUpdate,
    WithdrawalEvent,
};
