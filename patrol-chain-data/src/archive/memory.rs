use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArchiveClient, ArchiveError};
use crate::models::{AccountSnapshot, ChainRecord, RecordKind, StakePosition, Subject};

#[derive(Default)]
struct MemoryState {
    blocks: BTreeMap<u64, Vec<ChainRecord>>,
    finalized: u64,
    offline: bool,
    gaps: BTreeSet<u64>,
    transient_gaps: BTreeMap<u64, u32>,
    snapshots: HashMap<Subject, AccountSnapshot>,
    requests: Vec<(u64, u64)>,
}

/// An archive held in memory. Outages and missing heights can be switched on
/// to exercise the failure paths of callers.
#[derive(Default)]
pub struct MemoryArchive {
    state: Mutex<MemoryState>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ChainRecord>) -> Self {
        let archive = Self::new();
        archive.add_records(records);
        archive
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds records and raises the finalized height to cover them.
    pub fn add_records(&self, records: impl IntoIterator<Item = ChainRecord>) {
        let mut state = self.state();
        for record in records {
            state.finalized = state.finalized.max(record.block_height);
            let block = state.blocks.entry(record.block_height).or_default();
            block.retain(|r| r.extrinsic_index != record.extrinsic_index);
            block.push(record);
            block.sort_by_key(|r| r.extrinsic_index);
        }
    }

    pub fn set_finalized(&self, height: u64) {
        self.state().finalized = height;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Heights left out of every response until cleared.
    pub fn set_gaps(&self, heights: impl IntoIterator<Item = u64>) {
        self.state().gaps = heights.into_iter().collect();
    }

    /// Height left out of the next `responses` responses that cover it.
    pub fn add_transient_gap(&self, height: u64, responses: u32) {
        self.state().transient_gaps.insert(height, responses);
    }

    pub fn set_snapshot(&self, snapshot: AccountSnapshot) {
        self.state().snapshots.insert(snapshot.subject.clone(), snapshot);
    }

    /// Ranges passed to `fetch_range`, in call order.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.state().requests.clone()
    }

    fn derive_snapshot(state: &MemoryState, subject: &Subject) -> AccountSnapshot {
        let mut stakes: BTreeMap<(String, Option<u16>), i128> = BTreeMap::new();
        let mut balance: i128 = 0;
        for record in state.blocks.values().flatten() {
            let amount = i128::from(record.amount);
            match record.kind {
                RecordKind::Transfer => {
                    if record.destination.as_deref() == Some(subject.as_str()) {
                        balance += amount;
                    }
                    if record.source.as_deref() == Some(subject.as_str()) {
                        balance -= amount;
                    }
                }
                kind => {
                    if record.staker() != Some(subject.as_str()) {
                        continue;
                    }
                    if let Some(delegate) = &record.delegate {
                        let entry = stakes.entry((delegate.clone(), record.net_uid)).or_default();
                        if kind == RecordKind::StakeRemoved {
                            *entry -= amount;
                        } else {
                            *entry += amount;
                        }
                    }
                }
            }
        }
        AccountSnapshot {
            subject: subject.clone(),
            block_height: state.finalized,
            free_balance: clamp(balance),
            stakes: stakes
                .into_iter()
                .filter(|(_, amount)| *amount > 0)
                .map(|((delegate, net_uid), amount)| StakePosition {
                    delegate,
                    net_uid,
                    amount: clamp(amount),
                })
                .collect(),
        }
    }
}

fn clamp(value: i128) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(u64::MAX)
}

#[async_trait]
impl ArchiveClient for MemoryArchive {
    async fn fetch_range(&self, from_height: u64, to_height: u64) -> Result<Vec<ChainRecord>, ArchiveError> {
        if from_height > to_height {
            return Err(ArchiveError::InvalidRange { from: from_height, to: to_height });
        }
        let mut state = self.state();
        state.requests.push((from_height, to_height));
        if state.offline {
            return Err(ArchiveError::UpstreamUnavailable("memory archive is offline".into()));
        }

        let mut records = Vec::new();
        let mut missing = Vec::new();
        for height in from_height..=to_height {
            let transient = match state.transient_gaps.get_mut(&height) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            if transient || state.gaps.contains(&height) || height > state.finalized {
                missing.push(height);
                continue;
            }
            if let Some(block) = state.blocks.get(&height) {
                records.extend(block.iter().cloned());
            }
        }

        if missing.is_empty() {
            Ok(records)
        } else {
            Err(ArchiveError::PartialRange {
                from: from_height,
                to: to_height,
                records,
                missing,
            })
        }
    }

    async fn fetch_account_state(&self, subject: &Subject) -> Result<AccountSnapshot, ArchiveError> {
        let state = self.state();
        if state.offline {
            return Err(ArchiveError::UpstreamUnavailable("memory archive is offline".into()));
        }
        Ok(match state.snapshots.get(subject) {
            Some(snapshot) => snapshot.clone(),
            None => Self::derive_snapshot(&state, subject),
        })
    }

    async fn latest_finalized_block(&self) -> Result<u64, ArchiveError> {
        let state = self.state();
        if state.offline {
            return Err(ArchiveError::UpstreamUnavailable("memory archive is offline".into()));
        }
        Ok(state.finalized)
    }
}
