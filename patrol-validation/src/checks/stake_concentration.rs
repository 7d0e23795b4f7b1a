use std::collections::BTreeMap;

use patrol_chain_data::models::{CheckKind, RecordKind};

use super::{Check, CheckInput, CheckOutcome};
use crate::config::StakeConcentrationConfig;

/// Scores how concentrated the subject's stake is across delegates using the
/// normalised Herfindahl index over the net stake records in the window.
pub struct StakeConcentrationCheck {
    config: StakeConcentrationConfig,
}

impl StakeConcentrationCheck {
    pub fn new(config: StakeConcentrationConfig) -> Self {
        Self { config }
    }

    fn on_subnet(&self, net_uid: Option<u16>) -> bool {
        self.config.net_uid.map_or(true, |uid| net_uid == Some(uid))
    }

    fn positions(&self, input: &CheckInput<'_>) -> BTreeMap<String, u64> {
        let mut net: BTreeMap<String, i128> = BTreeMap::new();
        for record in input.records {
            if record.staker() != Some(input.subject.as_str()) || !self.on_subnet(record.net_uid) {
                continue;
            }
            let Some(delegate) = record.delegate.as_ref() else {
                continue;
            };
            let delta = match record.kind {
                RecordKind::StakeAdded | RecordKind::StakeMoved => record.amount as i128,
                RecordKind::StakeRemoved => -(record.amount as i128),
                RecordKind::Transfer => 0,
            };
            *net.entry(delegate.clone()).or_default() += delta;
        }
        net.into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(delegate, amount)| (delegate, u64::try_from(amount).unwrap_or(u64::MAX)))
            .collect()
    }
}

impl Check for StakeConcentrationCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::StakeConcentration
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> CheckOutcome {
        let positions = self.positions(input);
        let total: u64 = positions.values().fold(0u64, |acc, a| acc.saturating_add(*a));
        if positions.is_empty() || total < self.config.min_total_stake {
            return CheckOutcome::clean(self.kind(), "stake below minimum");
        }

        let n = positions.len();
        let score = if n == 1 {
            1.0
        } else {
            let hhi: f64 = positions
                .values()
                .map(|a| {
                    let share = *a as f64 / total as f64;
                    share * share
                })
                .sum();
            let floor = 1.0 / n as f64;
            (hhi - floor) / (1.0 - floor)
        };

        // largest position, ties broken by the smaller delegate address
        let mut dominant: Option<(&String, u64)> = None;
        for (delegate, amount) in &positions {
            if dominant.map_or(true, |(_, best)| *amount > best) {
                dominant = Some((delegate, *amount));
            }
        }
        let Some((dominant, amount)) = dominant else {
            return CheckOutcome::clean(self.kind(), "no stake positions");
        };

        let triggered = if score >= 0.5 {
            input
                .records
                .iter()
                .filter(|r| r.kind.is_stake() && self.on_subnet(r.net_uid) && r.delegate.as_ref() == Some(dominant))
                .map(|r| r.key())
                .collect()
        } else {
            Vec::new()
        };
        CheckOutcome::new(
            self.kind(),
            score,
            triggered,
            format!(
                "{} delegates, {:.0}% with {}",
                n,
                amount as f64 * 100.0 / total as f64,
                dominant
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrol_chain_data::models::{BlockWindow, ChainRecord, RecordKey, Subject};
    use std::collections::BTreeSet;

    fn run(records: &[ChainRecord]) -> CheckOutcome {
        run_on(None, records)
    }

    fn run_on(net_uid: Option<u16>, records: &[ChainRecord]) -> CheckOutcome {
        let subject = Subject::new("alice");
        let denylist = BTreeSet::new();
        let config = StakeConcentrationConfig {
            min_total_stake: 100,
            net_uid,
        };
        StakeConcentrationCheck::new(config).evaluate(&CheckInput {
            subject: &subject,
            window: BlockWindow::new(1, 100).unwrap(),
            records,
            neighbourhood: records,
            denylist: &denylist,
        })
    }

    #[test]
    fn test_single_delegate_is_fully_concentrated() {
        let records = vec![
            ChainRecord::stake_added(1, 0, 0, "alice", "val-a", 81, 500),
            ChainRecord::stake_removed(2, 0, 0, "alice", "val-a", 81, 100),
        ];
        let outcome = run(&records);
        assert_eq!(outcome.score, 1.0);
        assert_eq!(outcome.triggered.len(), 2);
    }

    #[test]
    fn test_even_split_scores_zero() {
        let records = vec![
            ChainRecord::stake_added(1, 0, 0, "alice", "val-a", 81, 500),
            ChainRecord::stake_added(2, 0, 0, "alice", "val-b", 81, 500),
        ];
        let outcome = run(&records);
        assert!(outcome.score.abs() < 1e-9);
        assert!(outcome.triggered.is_empty());
    }

    #[test]
    fn test_below_minimum_is_clean() {
        let records = vec![ChainRecord::stake_added(1, 0, 0, "alice", "val-a", 81, 50)];
        assert_eq!(run(&records).score, 0.0);
    }

    #[test]
    fn test_uneven_split_names_dominant_delegate() {
        let records = vec![
            ChainRecord::stake_added(1, 0, 0, "alice", "val-a", 81, 900),
            ChainRecord::stake_added(2, 0, 0, "alice", "val-b", 81, 100),
        ];
        let outcome = run(&records);
        // hhi = 0.82, normalised (0.82 - 0.5) / 0.5
        assert!((outcome.score - 0.64).abs() < 1e-9);
        assert_eq!(outcome.triggered, vec![RecordKey { block_height: 1, extrinsic_index: 0 }]);
        assert_eq!(outcome.detail, "2 delegates, 90% with val-a");
    }

    #[test]
    fn test_other_subnets_are_ignored() {
        let records = vec![
            ChainRecord::stake_added(1, 0, 0, "alice", "val-a", 81, 500),
            ChainRecord::stake_added(2, 0, 0, "alice", "val-b", 3, 500),
        ];
        let outcome = run_on(Some(81), &records);
        assert_eq!(outcome.score, 1.0);
        assert_eq!(outcome.triggered, vec![RecordKey { block_height: 1, extrinsic_index: 0 }]);
        assert!(run_on(Some(81), &records[1..]).triggered.is_empty());
    }
}
