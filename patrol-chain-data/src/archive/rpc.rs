use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ArchiveClient, ArchiveError};
use crate::models::{AccountSnapshot, ChainRecord, Subject};

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub url: String,
    pub request_timeout: Duration,
    /// Larger ranges are split into several `patrol_getBlocks` calls.
    pub max_blocks_per_request: u64,
}

impl ArchiveConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
            max_blocks_per_request: 100,
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
    height: u64,
    #[serde(default)]
    records: Vec<ChainRecord>,
}

/// JSON-RPC 2.0 client for an archive node.
pub struct RpcArchiveClient {
    client: reqwest::Client,
    config: ArchiveConfig,
    next_id: AtomicU64,
}

fn transport_error(err: reqwest::Error) -> ArchiveError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        ArchiveError::UpstreamUnavailable(err.to_string())
    } else if err.is_decode() {
        ArchiveError::Malformed(err.to_string())
    } else {
        ArchiveError::UpstreamUnavailable(err.to_string())
    }
}

impl RpcArchiveClient {
    pub fn new(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ArchiveError::Malformed(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ArchiveError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ArchiveError::UpstreamUnavailable(format!("{} answered {}", method, status)));
        }
        if !status.is_success() {
            return Err(ArchiveError::Malformed(format!("{} answered {}", method, status)));
        }

        let body: RpcResponse<T> = response.json().await.map_err(transport_error)?;
        if let Some(err) = body.error {
            return Err(ArchiveError::Malformed(format!(
                "{} failed with rpc error {}: {}",
                method, err.code, err.message
            )));
        }
        body.result
            .ok_or_else(|| ArchiveError::Malformed(format!("{} returned no result", method)))
    }

    async fn fetch_chunk(&self, from: u64, to: u64) -> Result<(Vec<ChainRecord>, BTreeSet<u64>), ArchiveError> {
        let blocks: Vec<RpcBlock> = self.call("patrol_getBlocks", json!([from, to])).await?;
        let mut records = Vec::new();
        let mut heights = BTreeSet::new();
        for block in blocks {
            if block.height < from || block.height > to {
                return Err(ArchiveError::Malformed(format!(
                    "block {} outside requested range [{}, {}]",
                    block.height, from, to
                )));
            }
            for record in &block.records {
                if record.block_height != block.height {
                    return Err(ArchiveError::Malformed(format!(
                        "record {} listed under block {}",
                        record.key(),
                        block.height
                    )));
                }
            }
            heights.insert(block.height);
            records.extend(block.records);
        }
        Ok((records, heights))
    }
}

#[async_trait]
impl ArchiveClient for RpcArchiveClient {
    async fn fetch_range(&self, from_height: u64, to_height: u64) -> Result<Vec<ChainRecord>, ArchiveError> {
        if from_height > to_height {
            return Err(ArchiveError::InvalidRange { from: from_height, to: to_height });
        }
        let step = self.config.max_blocks_per_request.max(1);
        let mut records = Vec::new();
        let mut fetched = BTreeSet::new();
        let mut last_error = None;

        let mut start = from_height;
        loop {
            let end = start.saturating_add(step - 1).min(to_height);
            match self.fetch_chunk(start, end).await {
                Ok((chunk, heights)) => {
                    records.extend(chunk);
                    fetched.extend(heights);
                }
                Err(err @ ArchiveError::UpstreamUnavailable(_)) => {
                    log::warn!("archive chunk [{}, {}] failed: {}", start, end, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
            if end == to_height {
                break;
            }
            start = end + 1;
        }

        let missing: Vec<u64> = (from_height..=to_height).filter(|h| !fetched.contains(h)).collect();
        if missing.is_empty() {
            records.sort_by_key(ChainRecord::key);
            return Ok(records);
        }
        if fetched.is_empty() {
            if let Some(err) = last_error {
                return Err(err);
            }
        }
        records.sort_by_key(ChainRecord::key);
        Err(ArchiveError::PartialRange {
            from: from_height,
            to: to_height,
            records,
            missing,
        })
    }

    async fn fetch_account_state(&self, subject: &Subject) -> Result<AccountSnapshot, ArchiveError> {
        let snapshot: AccountSnapshot = self
            .call("patrol_getAccountState", json!([subject.as_str()]))
            .await?;
        if snapshot.subject != *subject {
            return Err(ArchiveError::Malformed(format!(
                "asked for {} but received state for {}",
                subject, snapshot.subject
            )));
        }
        Ok(snapshot)
    }

    async fn latest_finalized_block(&self) -> Result<u64, ArchiveError> {
        self.call("patrol_getFinalizedHeight", json!([])).await
    }
}
