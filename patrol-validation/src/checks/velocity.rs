use std::collections::BTreeMap;

use patrol_chain_data::models::{CheckKind, RecordKey, RecordKind};

use super::{Check, CheckInput, CheckOutcome};
use crate::config::VelocityConfig;

#[derive(Default)]
struct Bucket {
    count: usize,
    volume: u64,
    keys: Vec<RecordKey>,
}

/// Flags bursts of outbound transfers.
pub struct VelocityCheck {
    config: VelocityConfig,
}

impl VelocityCheck {
    pub fn new(config: VelocityConfig) -> Self {
        Self { config }
    }
}

impl Check for VelocityCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Velocity
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> CheckOutcome {
        let bucket_blocks = self.config.bucket_blocks.max(1);
        let mut buckets: BTreeMap<u64, Bucket> = BTreeMap::new();
        for record in input.records {
            if record.kind != RecordKind::Transfer || record.source.as_deref() != Some(input.subject.as_str()) {
                continue;
            }
            let index = record.block_height.saturating_sub(input.window.from()) / bucket_blocks;
            let bucket = buckets.entry(index).or_default();
            bucket.count += 1;
            bucket.volume = bucket.volume.saturating_add(record.amount);
            bucket.keys.push(record.key());
        }

        if buckets.is_empty() {
            return CheckOutcome::clean(self.kind(), "no outbound transfers");
        }

        let anomalous: Vec<&Bucket> = buckets
            .values()
            .filter(|b| b.count > self.config.max_transfers_per_bucket || b.volume > self.config.max_volume_per_bucket)
            .collect();
        let score = anomalous.len() as f64 / buckets.len() as f64;
        CheckOutcome::new(
            self.kind(),
            score,
            anomalous.iter().flat_map(|b| b.keys.iter().copied()),
            format!("{} of {} buckets anomalous", anomalous.len(), buckets.len()),
        )
    }
}
