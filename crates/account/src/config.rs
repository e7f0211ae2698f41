use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::store::ChainKey;

/// One `(chain, entrypoint)` deployment and the services around it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,

    /// Entrypoint contract address
    pub entrypoint: Address,

    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// First block worth scanning (entrypoint deployment)
    pub deployment_block: u64,

    /// Maximum block span per eth_getLogs request
    pub log_batch_size: u64,

    /// Relayer base URLs, in tie-break order
    pub relayers: Vec<String>,

    /// Highest relay fee accepted from any quote, in basis points
    pub max_relay_fee_bps: u64,

    /// ASP service serving approved-label leaves
    pub asp_url: String,

    /// Timeout applied to every outbound HTTP request
    pub http_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            entrypoint: Address::ZERO,
            rpc_url: "http://localhost:8545".to_string(),
            deployment_block: 0,
            log_batch_size: 10_000,
            relayers: Vec::new(),
            max_relay_fee_bps: 1_000,
            asp_url: "http://localhost:3000/asp".to_string(),
            http_timeout_secs: 30,
        }
    }
}

impl ChainConfig {
    pub fn key(&self) -> ChainKey {
        ChainKey {
            chain_id: self.chain_id,
            entrypoint: self.entrypoint,
        }
    }

    /// Load configuration from `PPOOL_*` environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = var("PPOOL_CHAIN_ID") {
            if let Ok(id) = val.parse() {
                config.chain_id = id;
            }
        }

        if let Some(val) = var("PPOOL_ENTRYPOINT") {
            if let Ok(addr) = val.parse() {
                config.entrypoint = addr;
            }
        }

        if let Some(val) = var("PPOOL_RPC_URL") {
            config.rpc_url = val;
        }

        if let Some(val) = var("PPOOL_DEPLOYMENT_BLOCK") {
            if let Ok(block) = val.parse() {
                config.deployment_block = block;
            }
        }

        if let Some(val) = var("PPOOL_LOG_BATCH_SIZE") {
            if let Ok(size) = val.parse::<u64>() {
                config.log_batch_size = size.max(1);
            }
        }

        if let Some(val) = var("PPOOL_RELAYERS") {
            config.relayers = val
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(val) = var("PPOOL_MAX_RELAY_FEE_BPS") {
            if let Ok(bps) = val.parse() {
                config.max_relay_fee_bps = bps;
            }
        }

        if let Some(val) = var("PPOOL_ASP_URL") {
            config.asp_url = val;
        }

        if let Some(val) = var("PPOOL_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.http_timeout_secs = secs;
            }
        }

        config
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account slot in the derivation tree
    pub account_index: u32,
    pub chains: Vec<ChainConfig>,
}

impl AccountConfig {
    /// Single-chain configuration from `PPOOL_*` environment variables
    pub fn from_env() -> Self {
        let account_index = std::env::var("PPOOL_ACCOUNT_INDEX")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(0);
        Self {
            account_index,
            chains: vec![ChainConfig::from_env()],
        }
    }
}
