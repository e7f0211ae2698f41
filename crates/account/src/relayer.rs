//! Relayer HTTP client.
//!
//! Wire format follows the relayer service: camelCase JSON, big integers as
//! `0x` hex on the way out and hex, decimal or plain numbers on the way in.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("Relayer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relayer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Relayer rejected request: {0}")]
    Rejected(String),

    #[error("Invalid quote from {relayer}: {reason}")]
    InvalidQuote { relayer: String, reason: String },

    #[error("No relayers configured")]
    NoRelayersAvailable,

    #[error("All {} relayers failed", .failures.len())]
    AllRelayersFailed { failures: Vec<(String, String)> },

    #[error("Relayer {0} is not configured for this chain")]
    UnknownRelayer(String),
}

pub(crate) mod flex_u256 {
    use alloy_primitives::U256;
    use serde::{de::Error as _, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(text) => {
                let parsed = match text.strip_prefix("0x") {
                    Some(digits) => U256::from_str_radix(digits, 16),
                    None => U256::from_str_radix(&text, 10),
                };
                parsed.map_err(|e| D::Error::custom(format!("bad integer {text}: {e}")))
            }
            serde_json::Value::Number(number) => number
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| D::Error::custom(format!("bad integer {number}"))),
            other => Err(D::Error::custom(format!("expected integer, got {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerDetails {
    pub chain_id: u64,
    #[serde(rename = "feeBPS", deserialize_with = "flex_u256::deserialize")]
    pub fee_bps: U256,
    #[serde(deserialize_with = "flex_u256::deserialize")]
    pub min_withdraw_amount: U256,
    pub fee_receiver_address: Address,
    pub asset_address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub amount: U256,
    pub asset: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    pub extra_gas: bool,
}

/// Signed promise to relay at a fixed fee, echoed back with the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeCommitment {
    /// Unix time in milliseconds
    pub expiration: u64,
    /// ABI-encoded `RelayData` the relayer will accept
    pub withdrawal_data: Bytes,
    pub signed_relayer_commitment: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    #[serde(rename = "baseFeeBPS", deserialize_with = "flex_u256::deserialize")]
    pub base_fee_bps: U256,
    #[serde(rename = "feeBPS", deserialize_with = "flex_u256::deserialize")]
    pub fee_bps: U256,
    #[serde(default)]
    pub fee_commitment: Option<FeeCommitment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPayload {
    pub processooor: Address,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProofPayload {
    pub pi_a: [U256; 2],
    pub pi_b: [[U256; 2]; 2],
    pub pi_c: [U256; 2],
    pub protocol: &'static str,
    pub curve: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub withdrawal: WithdrawalPayload,
    pub public_signals: Vec<U256>,
    pub proof: ProofPayload,
    pub scope: U256,
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_commitment: Option<FeeCommitment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default)]
    pub tx_hash: Option<B256>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for one relayer service.
pub struct RelayerClient {
    base_url: String,
    client: reqwest::Client,
}

impl RelayerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RelayerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL without a trailing slash, doubling as the relayer id.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// `GET /relayer/details` for one chain and asset.
    pub async fn details(&self, chain_id: u64, asset: Address) -> Result<RelayerDetails, RelayerError> {
        let response = self
            .client
            .get(format!("{}/relayer/details", self.base_url))
            .query(&[
                ("chainId", chain_id.to_string()),
                ("assetAddress", format!("{asset:?}")),
            ])
            .send()
            .await?;
        read_json(response).await
    }

    /// `POST /relayer/quote`.
    pub async fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, RelayerError> {
        let response = self
            .client
            .post(format!("{}/relayer/quote", self.base_url))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    /// `POST /relayer/request`; a response with `success: false` is an error.
    pub async fn request(&self, request: &RelayRequest) -> Result<RelayResponse, RelayerError> {
        let response = self
            .client
            .post(format!("{}/relayer/request", self.base_url))
            .json(request)
            .send()
            .await?;
        let relayed: RelayResponse = read_json(response).await?;

        if !relayed.success {
            return Err(RelayerError::Rejected(
                relayed.error.unwrap_or_else(|| "unspecified".into()),
            ));
        }
        Ok(relayed)
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RelayerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RelayerError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_response_accepts_mixed_integers() {
        let quote: QuoteResponse = serde_json::from_str(
            r#"{"baseFeeBPS": 10, "feeBPS": "0x32", "gasPrice": "1000"}"#,
        )
        .unwrap();
        assert_eq!(quote.base_fee_bps, U256::from(10u64));
        assert_eq!(quote.fee_bps, U256::from(50u64));
        assert!(quote.fee_commitment.is_none());

        let quote: QuoteResponse =
            serde_json::from_str(r#"{"baseFeeBPS": "7", "feeBPS": "25"}"#).unwrap();
        assert_eq!(quote.fee_bps, U256::from(25u64));

        assert!(serde_json::from_str::<QuoteResponse>(r#"{"baseFeeBPS": true, "feeBPS": 1}"#).is_err());
    }

    #[test]
    fn test_quote_request_wire_format() {
        let request = QuoteRequest {
            chain_id: 1,
            amount: U256::from(255u64),
            asset: Address::ZERO,
            recipient: None,
            extra_gas: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chainId"], 1);
        assert_eq!(json["amount"], "0xff");
        assert_eq!(json["extraGas"], false);
        assert!(json.get("recipient").is_none());
    }

    #[test]
    fn test_relay_response_defaults() {
        let response: RelayResponse = serde_json::from_str(r#"{"success": false, "error": "nope"}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("nope"));
        assert!(response.tx_hash.is_none());
    }
}
