//! Chain access for the sync pipeline.
//!
//! [`ChainReader`] is what the pipeline consumes; [`JsonRpcChainReader`] is the
//! HTTP JSON-RPC implementation (`eth_blockNumber`, `eth_getLogs`,
//! `eth_call`).

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use alloy_rpc_types::Log;
use async_trait::async_trait;
use ppool_contracts::abi::{
    asset_calldata, decimals_calldata, decode_address_word, decode_string, decode_uint_word,
    scope_calldata, symbol_calldata,
};
use ppool_contracts::events::{entrypoint_topics, pool_topics};
use ppool_contracts::{
    decode_entrypoint_log, decode_pool_log, EntrypointEvent, LogPosition, PoolEvent, NATIVE_ASSET,
};
use ppool_core::utils::u256_to_field;
use ppool_core::Field;
use thiserror::Error;

use crate::store::AssetInfo;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Node returned error: {0}")]
    Node(String),

    #[error("Event parsing failed: {0}")]
    ParseFailed(String),

    #[error("Call to {contract} failed: {reason}")]
    CallFailed { contract: Address, reason: String },
}

/// Read-only view of one chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Entrypoint events in `[from_block, to_block]`, in chain order.
    async fn entrypoint_events(
        &self,
        entrypoint: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EntrypointEvent>, RpcError>;

    /// Pool events in `[from_block, to_block]`, in chain order.
    async fn pool_events(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, RpcError>;

    /// `(asset, scope)` of a pool.
    async fn pool_metadata(&self, pool: Address) -> Result<(Address, Field), RpcError>;

    /// Symbol and decimals of an asset; the native asset needs no call.
    async fn asset_metadata(&self, asset: Address) -> Result<AssetInfo, RpcError>;
}

/// Metadata for the native asset placeholder.
pub fn native_asset_info() -> AssetInfo {
    AssetInfo {
        address: NATIVE_ASSET,
        symbol: "ETH".to_string(),
        decimals: 18,
    }
}

pub struct JsonRpcChainReader {
    rpc_url: String,
    client: reqwest::Client,
}

impl JsonRpcChainReader {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            rpc_url: rpc_url.into(),
            client,
        })
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let mut json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = json.get("error") {
            return Err(RpcError::Node(error.to_string()));
        }

        json.get_mut("result")
            .map(serde_json::Value::take)
            .ok_or_else(|| RpcError::Transport("No result in response".into()))
    }

    async fn fetch_logs(
        &self,
        contract: Address,
        topics: Vec<B256>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let filter = serde_json::json!({
            "address": format!("{:?}", contract),
            "topics": [topics.iter().map(|t| format!("{:?}", t)).collect::<Vec<_>>()],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        let result = self.request("eth_getLogs", serde_json::json!([filter])).await?;
        let mut logs: Vec<Log> =
            serde_json::from_value(result).map_err(|e| RpcError::ParseFailed(e.to_string()))?;

        logs.retain(|log| !log.removed);
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn eth_call(&self, contract: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let call = serde_json::json!({
            "to": format!("{:?}", contract),
            "data": data.to_string(),
        });
        let result = self
            .request("eth_call", serde_json::json!([call, "latest"]))
            .await?;
        serde_json::from_value(result).map_err(|e| RpcError::ParseFailed(e.to_string()))
    }
}

fn log_position(log: &Log) -> Result<LogPosition, RpcError> {
    Ok(LogPosition {
        block_number: log
            .block_number
            .ok_or_else(|| RpcError::ParseFailed("log without block number".into()))?,
        log_index: log
            .log_index
            .ok_or_else(|| RpcError::ParseFailed("log without log index".into()))?,
        tx_hash: log.transaction_hash.unwrap_or_default(),
    })
}

fn call_failed(contract: Address) -> impl Fn(ppool_contracts::AbiError) -> RpcError {
    move |e| RpcError::CallFailed {
        contract,
        reason: e.to_string(),
    }
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_blockNumber", serde_json::json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::ParseFailed("block number is not a string".into()))?;

        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::ParseFailed(format!("Invalid block number: {}", e)))
    }

    async fn entrypoint_events(
        &self,
        entrypoint: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EntrypointEvent>, RpcError> {
        let logs = self
            .fetch_logs(entrypoint, entrypoint_topics(), from_block, to_block)
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let decoded = decode_entrypoint_log(log.data(), log_position(log)?)
                .map_err(|e| RpcError::ParseFailed(e.to_string()))?;
            events.extend(decoded);
        }
        Ok(events)
    }

    async fn pool_events(
        &self,
        pool: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, RpcError> {
        let logs = self
            .fetch_logs(pool, pool_topics(), from_block, to_block)
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let decoded = decode_pool_log(log.address(), log.data(), log_position(log)?)
                .map_err(|e| RpcError::ParseFailed(e.to_string()))?;
            events.extend(decoded);
        }
        Ok(events)
    }

    async fn pool_metadata(&self, pool: Address) -> Result<(Address, Field), RpcError> {
        let (asset, scope) = tokio::try_join!(
            self.eth_call(pool, asset_calldata()),
            self.eth_call(pool, scope_calldata()),
        )?;

        let asset = decode_address_word(&asset).map_err(call_failed(pool))?;
        let scope = decode_uint_word(&scope).map_err(call_failed(pool))?;
        let scope = u256_to_field(scope).map_err(|e| RpcError::CallFailed {
            contract: pool,
            reason: e.to_string(),
        })?;
        Ok((asset, scope))
    }

    async fn asset_metadata(&self, asset: Address) -> Result<AssetInfo, RpcError> {
        if asset == NATIVE_ASSET {
            return Ok(native_asset_info());
        }

        let (symbol, decimals) = tokio::try_join!(
            self.eth_call(asset, symbol_calldata()),
            self.eth_call(asset, decimals_calldata()),
        )?;

        let decimals = decode_uint_word(&decimals).map_err(call_failed(asset))?;
        let decimals = u8::try_from(decimals).map_err(|_| RpcError::CallFailed {
            contract: asset,
            reason: format!("decimals {decimals} out of range"),
        })?;

        // Some tokens return bytes32 symbols; keep the address as a label then.
        let symbol = decode_string(&symbol).unwrap_or_else(|_| format!("{asset:?}"));

        Ok(AssetInfo {
            address: asset,
            symbol,
            decimals,
        })
    }
}
