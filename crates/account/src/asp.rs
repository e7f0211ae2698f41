use std::time::Duration;

use async_trait::async_trait;
use ppool_core::utils::{field_to_hex, serde_field_vec};
use ppool_core::Field;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AspError {
    #[error("ASP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ASP service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("ASP payload invalid: {0}")]
    InvalidPayload(String),
}

/// Source of the approved-label leaves behind an ASP root.
#[async_trait]
pub trait AspSource: Send + Sync {
    async fn fetch_leaves(&self, root: Field, ipfs_cid: &str) -> Result<Vec<Field>, AspError>;
}

#[derive(Deserialize)]
struct LeavesResponse {
    #[serde(with = "serde_field_vec")]
    leaves: Vec<Field>,
}

/// Fetches `GET {base_url}/{ipfs_cid}?root={root}` returning `{"leaves": [...]}`.
pub struct HttpAspSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAspSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AspError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl AspSource for HttpAspSource {
    async fn fetch_leaves(&self, root: Field, ipfs_cid: &str) -> Result<Vec<Field>, AspError> {
        let url = format!("{}/{}", self.base_url, ipfs_cid);
        let response = self
            .client
            .get(&url)
            .query(&[("root", field_to_hex(root))])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AspError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let payload: LeavesResponse = serde_json::from_slice(&body)
            .map_err(|e| AspError::InvalidPayload(e.to_string()))?;

        tracing::debug!(count = payload.leaves.len(), ipfs_cid, "Fetched ASP leaves");
        Ok(payload.leaves)
    }
}
