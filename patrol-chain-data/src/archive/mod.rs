mod memory;
mod rpc;

pub use memory::MemoryArchive;
pub use rpc::{ArchiveConfig, RpcArchiveClient};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AccountSnapshot, ChainRecord, Subject};

#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error("archive node unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Only part of the requested range came back. `records` holds what did,
    /// every height in the range not listed in `missing` was fetched in full.
    #[error("archive returned a partial range [{from}, {to}], {} blocks missing", .missing.len())]
    PartialRange {
        from: u64,
        to: u64,
        records: Vec<ChainRecord>,
        missing: Vec<u64>,
    },

    #[error("malformed archive response: {0}")]
    Malformed(String),

    #[error("invalid block range [{from}, {to}]")]
    InvalidRange { from: u64, to: u64 },
}

impl ArchiveError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::UpstreamUnavailable(_) | ArchiveError::PartialRange { .. }
        )
    }
}

/// Read-only access to historical chain data.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Every record in blocks `from_height..=to_height`, ordered by key.
    async fn fetch_range(&self, from_height: u64, to_height: u64) -> Result<Vec<ChainRecord>, ArchiveError>;

    async fn fetch_account_state(&self, subject: &Subject) -> Result<AccountSnapshot, ArchiveError>;

    async fn latest_finalized_block(&self) -> Result<u64, ArchiveError>;
}
