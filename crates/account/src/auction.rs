//! Relayer fee auction.
//!
//! Every relayer is asked for a quote at once. Each answer is checked against
//! the requested recipient, the fee ceiling and its own fee commitment; the
//! cheapest valid quote wins, earlier relayers winning ties.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::future::join_all;
use ppool_contracts::{decode_relay_data, encode_relay_data, RelayData};

use crate::relayer::{
    FeeCommitment, QuoteRequest, QuoteResponse, RelayRequest, RelayResponse, RelayerClient,
    RelayerDetails, RelayerError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteCriteria {
    pub chain_id: u64,
    pub asset: Address,
    pub amount: U256,
    pub recipient: Address,
    pub max_fee_bps: U256,
    /// Unix time in milliseconds, compared against commitment expirations
    pub now_ms: u64,
}

/// Unvalidated relayer answer.
#[derive(Clone, Debug)]
pub struct RawQuote {
    pub details: RelayerDetails,
    pub quote: QuoteResponse,
}

#[async_trait]
pub trait Relayer: Send + Sync {
    /// Stable identifier, the base URL for HTTP relayers.
    fn id(&self) -> &str;

    async fn fetch_quote(&self, criteria: &QuoteCriteria) -> Result<RawQuote, RelayerError>;

    async fn submit(&self, request: &RelayRequest) -> Result<RelayResponse, RelayerError>;
}

#[async_trait]
impl Relayer for RelayerClient {
    fn id(&self) -> &str {
        self.url()
    }

    async fn fetch_quote(&self, criteria: &QuoteCriteria) -> Result<RawQuote, RelayerError> {
        let request = QuoteRequest {
            chain_id: criteria.chain_id,
            amount: criteria.amount,
            asset: criteria.asset,
            recipient: Some(criteria.recipient),
            extra_gas: false,
        };
        let (details, quote) = tokio::try_join!(
            self.details(criteria.chain_id, criteria.asset),
            self.quote(&request),
        )?;
        Ok(RawQuote { details, quote })
    }

    async fn submit(&self, request: &RelayRequest) -> Result<RelayResponse, RelayerError> {
        self.request(request).await
    }
}

/// A validated quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    pub relayer: String,
    pub fee_bps: U256,
    pub relay_data: RelayData,
    pub fee_commitment: Option<FeeCommitment>,
}

impl Quote {
    /// Bytes for `Withdrawal.data`: the committed encoding when the relayer signed one.
    pub fn withdrawal_data(&self) -> Bytes {
        match &self.fee_commitment {
            Some(commitment) => commitment.withdrawal_data.clone(),
            None => encode_relay_data(&self.relay_data),
        }
    }
}

/// Check one relayer answer against the request and turn it into a [`Quote`].
pub fn validate_quote(
    relayer: &str,
    raw: RawQuote,
    criteria: &QuoteCriteria,
) -> Result<Quote, RelayerError> {
    let invalid = |reason: String| RelayerError::InvalidQuote {
        relayer: relayer.to_string(),
        reason,
    };

    let fee_bps = raw.quote.fee_bps;
    if fee_bps > criteria.max_fee_bps {
        return Err(invalid(format!(
            "fee {fee_bps} bps exceeds ceiling {}",
            criteria.max_fee_bps
        )));
    }
    if raw.details.chain_id != criteria.chain_id {
        return Err(invalid(format!("serves chain {}", raw.details.chain_id)));
    }
    if raw.details.asset_address != criteria.asset {
        return Err(invalid(format!("serves asset {}", raw.details.asset_address)));
    }
    if criteria.amount < raw.details.min_withdraw_amount {
        return Err(invalid(format!(
            "amount below minimum {}",
            raw.details.min_withdraw_amount
        )));
    }

    let relay_data = match &raw.quote.fee_commitment {
        Some(commitment) => {
            if commitment.expiration <= criteria.now_ms {
                return Err(invalid(format!(
                    "fee commitment expired at {}",
                    commitment.expiration
                )));
            }
            let data = decode_relay_data(&commitment.withdrawal_data)
                .map_err(|e| invalid(format!("undecodable relay data: {e}")))?;
            if data.recipient != criteria.recipient {
                return Err(invalid(format!("commits to recipient {}", data.recipient)));
            }
            if data.relayFeeBPS != fee_bps {
                return Err(invalid(format!(
                    "commits to {} bps but quoted {fee_bps}",
                    data.relayFeeBPS
                )));
            }
            data
        }
        None => RelayData {
            recipient: criteria.recipient,
            feeRecipient: raw.details.fee_receiver_address,
            relayFeeBPS: fee_bps,
        },
    };

    Ok(Quote {
        relayer: relayer.to_string(),
        fee_bps,
        relay_data,
        fee_commitment: raw.quote.fee_commitment,
    })
}

/// Ask every relayer at once and keep the cheapest valid quote.
pub async fn get_best_quote(
    criteria: &QuoteCriteria,
    relayers: &[Arc<dyn Relayer>],
) -> Result<Quote, RelayerError> {
    if relayers.is_empty() {
        return Err(RelayerError::NoRelayersAvailable);
    }

    let answers = join_all(relayers.iter().map(|relayer| async move {
        let answer = relayer.fetch_quote(criteria).await;
        (relayer.id(), answer)
    }))
    .await;

    let mut best: Option<Quote> = None;
    let mut failures = Vec::new();

    for (relayer, answer) in answers {
        match answer.and_then(|raw| validate_quote(relayer, raw, criteria)) {
            Ok(quote) => {
                tracing::debug!(relayer, fee_bps = %quote.fee_bps, "Relayer quoted");
                if best.as_ref().map_or(true, |current| quote.fee_bps < current.fee_bps) {
                    best = Some(quote);
                }
            }
            Err(e) => {
                tracing::warn!(relayer, error = %e, "Relayer excluded from auction");
                failures.push((relayer.to_string(), e.to_string()));
            }
        }
    }

    match best {
        Some(quote) => {
            tracing::info!(relayer = %quote.relayer, fee_bps = %quote.fee_bps, "Relayer auction won");
            Ok(quote)
        }
        None => Err(RelayerError::AllRelayersFailed { failures }),
    }
}
