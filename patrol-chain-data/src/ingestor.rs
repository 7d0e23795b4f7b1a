use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use patrol_utils::retry::RetryPolicy;

use crate::archive::{ArchiveClient, ArchiveError};
use crate::models::{BlockWindow, MissedBlockReason};
use crate::ChainDataStore;

pub const DEFAULT_BATCH_SIZE: u64 = 100;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] crate::Error),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Archive(e) => e.is_retryable(),
            IngestError::Store(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub blocks: usize,
    pub records_inserted: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.blocks += other.blocks;
        self.records_inserted += other.records_inserted;
    }
}

/// Moves blocks from the archive into the store.
pub struct Ingestor {
    archive: Arc<dyn ArchiveClient>,
    store: Arc<ChainDataStore>,
    retry: RetryPolicy,
    batch_size: u64,
}

impl Ingestor {
    pub fn new(archive: Arc<dyn ArchiveClient>, store: Arc<ChainDataStore>) -> Self {
        Self {
            archive,
            store,
            retry: RetryPolicy::new(3),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn archive(&self) -> &Arc<dyn ArchiveClient> {
        &self.archive
    }

    /// Fetches whatever part of `window` the store has not ingested yet.
    pub async fn backfill(&self, window: BlockWindow) -> Result<IngestReport, IngestError> {
        let missing = self.store.missing_heights(window).await?;
        if missing.is_empty() {
            return Ok(IngestReport::default());
        }
        log::info!("backfilling {} of {} blocks in {}", missing.len(), window.len(), window);
        self.fetch_heights(&missing).await
    }

    /// Fetches `heights` in contiguous batches. Heights a response leaves out
    /// are requested again on the next pass; once the retry budget is spent
    /// they go to the missed-block ledger and the last failure is returned.
    pub async fn fetch_heights(&self, heights: &[u64]) -> Result<IngestReport, IngestError> {
        let mut pending: Vec<u64> = heights.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut report = IngestReport::default();
        let attempts = self.retry.attempts();
        let mut attempt = 1;

        loop {
            let mut still_missing = Vec::new();
            let mut last_error = None;

            for (from, to) in batches(&pending, self.batch_size) {
                match self.archive.fetch_range(from, to).await {
                    Ok(records) => {
                        let heights: Vec<u64> = (from..=to).collect();
                        let inserted = self.store.store_blocks(&heights, &records).await?;
                        report.absorb(IngestReport { blocks: heights.len(), records_inserted: inserted });
                    }
                    Err(ArchiveError::PartialRange { records, missing, .. }) => {
                        let gaps: BTreeSet<u64> = missing.iter().copied().collect();
                        let fetched: Vec<u64> = (from..=to).filter(|h| !gaps.contains(h)).collect();
                        let records: Vec<_> = records
                            .into_iter()
                            .filter(|r| !gaps.contains(&r.block_height))
                            .collect();
                        let inserted = self.store.store_blocks(&fetched, &records).await?;
                        report.absorb(IngestReport { blocks: fetched.len(), records_inserted: inserted });
                        last_error = Some((
                            MissedBlockReason::Gap,
                            ArchiveError::PartialRange { from, to, records: Vec::new(), missing: missing.clone() },
                        ));
                        still_missing.extend(missing);
                    }
                    Err(err) if err.is_retryable() => {
                        still_missing.extend(from..=to);
                        last_error = Some((MissedBlockReason::Unavailable, err));
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let Some((reason, err)) = last_error else {
                return Ok(report);
            };
            if still_missing.is_empty() {
                return Ok(report);
            }
            if attempt >= attempts {
                self.store
                    .add_missed_blocks(&still_missing, reason, Some(&err.to_string()))
                    .await?;
                return Err(final_error(err, &still_missing, report).into());
            }

            let delay = self.retry.backoff_for(attempt);
            log::warn!(
                "{} blocks still missing after attempt {}/{}: {}; retrying in {:?}",
                still_missing.len(),
                attempt,
                attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            pending = still_missing;
        }
    }

    /// Ingests finalized blocks past the highest one already stored, starting
    /// `initial_lookback` blocks behind the tip on an empty store.
    pub async fn collect_latest(&self, initial_lookback: u64) -> Result<IngestReport, IngestError> {
        let finalized = self.archive.latest_finalized_block().await?;
        let start = match self.store.highest_ingested_block().await? {
            Some(highest) => highest + 1,
            None => finalized.saturating_sub(initial_lookback.saturating_sub(1)),
        };
        if start > finalized {
            log::debug!("no new finalized blocks (tip {})", finalized);
            return Ok(IngestReport::default());
        }
        let heights: Vec<u64> = (start..=finalized).collect();
        let report = self.fetch_heights(&heights).await?;
        log::info!(
            "collected blocks {}..={}: {} records",
            start,
            finalized,
            report.records_inserted
        );
        Ok(report)
    }

    /// Re-fetches heights from the missed-block ledger, clearing the entries
    /// that now succeed.
    pub async fn retry_missed_blocks(&self) -> Result<IngestReport, IngestError> {
        let heights = self.store.retryable_missed_blocks().await?;
        if heights.is_empty() {
            return Ok(IngestReport::default());
        }
        log::info!("retrying {} missed blocks", heights.len());
        self.store.remove_missed_blocks(&heights).await?;
        self.fetch_heights(&heights).await
    }
}

/// Splits sorted, distinct heights into contiguous ranges of at most `size`.
fn batches(heights: &[u64], size: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut iter = heights.iter().copied();
    let Some(first) = iter.next() else {
        return out;
    };
    let (mut from, mut to) = (first, first);
    for height in iter {
        if height == to + 1 && height - from < size {
            to = height;
        } else {
            out.push((from, to));
            from = height;
            to = height;
        }
    }
    out.push((from, to));
    out
}

fn final_error(err: ArchiveError, missing: &[u64], report: IngestReport) -> ArchiveError {
    match err {
        ArchiveError::UpstreamUnavailable(_) if report.blocks == 0 => err,
        _ => ArchiveError::PartialRange {
            from: missing.first().copied().unwrap_or_default(),
            to: missing.last().copied().unwrap_or_default(),
            records: Vec::new(),
            missing: missing.to_vec(),
        },
    }
}
