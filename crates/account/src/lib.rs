//! Privacy-pool account core
//!
//! Everything a wallet needs around one master key: incremental event sync
//! into a per-chain store, discovery of the deposits and withdrawals the key
//! owns, balance views, and preparation of relayed withdrawals.
//!
//! # Architecture
//!
//! ```text
//! PrivacyPoolsAccount
//!    |
//!    | one ChainContext per (chain_id, entrypoint)
//!    v
//! +--------------------+      +-------------------+
//! | SyncPipeline       | <--- | ChainReader (RPC) |
//! |   -> ChainState    | <--- | AspSource (HTTP)  |
//! +--------------------+      +-------------------+
//!    |
//!    v
//! AccountView (memoized per store version)
//!    |
//!    v
//! WithdrawalPreparer --> relayer auction --> Prover --> WithdrawalBundle
//! ```

pub mod account;
pub mod asp;
pub mod auction;
pub mod config;
pub mod error;
pub mod prover;
pub mod relayer;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod views;
pub mod withdraw;

pub use account::{ChainBackends, ChainContext, PrivacyPoolsAccount};
pub use asp::{AspError, AspSource, HttpAspSource};
pub use auction::{get_best_quote, validate_quote, Quote, QuoteCriteria, RawQuote, Relayer};
pub use config::{AccountConfig, ChainConfig};
pub use error::{AccountError, AccountResult};
pub use prover::{Prover, ProverError, WithdrawalCircuitInputs, WithdrawalProof, WITHDRAW_CIRCUIT};
pub use relayer::{RelayRequest, RelayResponse, RelayerClient, RelayerError};
pub use rpc::{ChainReader, JsonRpcChainReader, RpcError};
pub use store::{AspTree, AssetInfo, ChainKey, ChainState, PoolInfo, StoreError, StoreSnapshot};
pub use sync::{SyncError, SyncPhase, SyncReport};
pub use views::{AccountView, AssetBalance, Lineage, OwnedDeposit, ViewCache, ViewError};
pub use withdraw::{UnsignedTransaction, WithdrawalBundle, WithdrawalError, WithdrawalRequest};
