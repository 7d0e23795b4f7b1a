use std::collections::{BTreeMap, BTreeSet, VecDeque};

use patrol_chain_data::models::{ChainRecord, CheckKind, RecordKey};

use super::{Check, CheckInput, CheckOutcome};
use crate::config::ProximityConfig;

/// Scores how close the subject sits to denylisted accounts in the
/// window's transaction graph. A denylisted account `d` hops away
/// contributes `1 / d`; the score is the strongest contribution.
pub struct ProximityCheck {
    config: ProximityConfig,
}

type Graph<'a> = BTreeMap<&'a str, BTreeMap<&'a str, RecordKey>>;

impl ProximityCheck {
    pub fn new(config: ProximityConfig) -> Self {
        Self { config }
    }
}

fn link<'a>(graph: &mut Graph<'a>, a: &'a str, b: &'a str, key: RecordKey) {
    if a == b {
        return;
    }
    for (x, y) in [(a, b), (b, a)] {
        graph
            .entry(x)
            .or_default()
            .entry(y)
            .and_modify(|k| *k = (*k).min(key))
            .or_insert(key);
    }
}

fn build_graph(records: &[ChainRecord]) -> Graph<'_> {
    let mut graph = Graph::new();
    for record in records.iter().filter(|r| r.amount > 0) {
        let key = record.key();
        if let (Some(source), Some(destination)) = (record.source.as_deref(), record.destination.as_deref()) {
            link(&mut graph, source, destination, key);
        }
        if let Some(owner) = record.owner.as_deref() {
            for other in [record.source.as_deref(), record.destination.as_deref()].into_iter().flatten() {
                link(&mut graph, owner, other, key);
            }
        }
    }
    graph
}

impl Check for ProximityCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Proximity
    }

    fn evaluate(&self, input: &CheckInput<'_>) -> CheckOutcome {
        let subject = input.subject.as_str();
        if input.denylist.contains(subject) {
            return CheckOutcome::new(
                self.kind(),
                1.0,
                input.records.iter().map(ChainRecord::key),
                "subject is denylisted".to_string(),
            );
        }
        if input.denylist.is_empty() {
            return CheckOutcome::clean(self.kind(), "denylist is empty");
        }

        let graph = build_graph(input.neighbourhood);
        let mut parents: BTreeMap<&str, (&str, RecordKey)> = BTreeMap::new();
        let mut distance: BTreeMap<&str, usize> = BTreeMap::from([(subject, 0)]);
        let mut queue = VecDeque::from([subject]);
        let mut nearest: Option<(&str, usize)> = None;

        while let Some(node) = queue.pop_front() {
            let d = distance[node];
            if d > 0 && input.denylist.contains(node) {
                nearest = Some((node, d));
                break;
            }
            if d >= self.config.max_hops {
                continue;
            }
            let Some(neighbours) = graph.get(node) else {
                continue;
            };
            for (&next, &key) in neighbours {
                if distance.contains_key(next) {
                    continue;
                }
                distance.insert(next, d + 1);
                parents.insert(next, (node, key));
                queue.push_back(next);
            }
        }

        let Some((hit, hops)) = nearest else {
            return CheckOutcome::clean(
                self.kind(),
                format!("no denylisted account within {} hops", self.config.max_hops),
            );
        };

        let mut path = BTreeSet::new();
        let mut cursor = hit;
        while let Some(&(parent, key)) = parents.get(cursor) {
            path.insert(key);
            cursor = parent;
        }
        CheckOutcome::new(
            self.kind(),
            1.0 / hops as f64,
            path,
            format!("denylisted account {} is {} hops away", hit, hops),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrol_chain_data::models::{BlockWindow, Subject};

    fn run(records: &[ChainRecord], denylist: &[&str], max_hops: usize) -> CheckOutcome {
        let subject = Subject::new("alice");
        let denylist: BTreeSet<String> = denylist.iter().map(|s| s.to_string()).collect();
        let own: Vec<ChainRecord> = records.iter().filter(|r| r.involves("alice")).cloned().collect();
        ProximityCheck::new(ProximityConfig { max_hops }).evaluate(&CheckInput {
            subject: &subject,
            window: BlockWindow::new(1, 100).unwrap(),
            records: &own,
            neighbourhood: records,
            denylist: &denylist,
        })
    }

    fn chain() -> Vec<ChainRecord> {
        vec![
            ChainRecord::transfer(1, 0, 0, "alice", "bob", 10),
            ChainRecord::transfer(2, 0, 0, "bob", "carol", 10),
            ChainRecord::transfer(3, 0, 0, "carol", "mallory", 10),
            ChainRecord::transfer(4, 0, 0, "dave", "erin", 10),
        ]
    }

    #[test]
    fn test_two_hops_scores_half() {
        let outcome = run(&chain(), &["carol"], 3);
        assert_eq!(outcome.score, 0.5);
        assert_eq!(
            outcome.triggered,
            vec![
                RecordKey { block_height: 1, extrinsic_index: 0 },
                RecordKey { block_height: 2, extrinsic_index: 0 },
            ]
        );
    }

    #[test]
    fn test_beyond_max_hops_is_clean() {
        let outcome = run(&chain(), &["mallory"], 2);
        assert_eq!(outcome.score, 0.0);
        let outcome = run(&chain(), &["mallory"], 3);
        assert!((outcome.score - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.triggered.len(), 3);
    }

    #[test]
    fn test_zero_amount_edges_are_ignored() {
        let records = vec![ChainRecord::transfer(1, 0, 0, "alice", "mallory", 0)];
        assert_eq!(run(&records, &["mallory"], 3).score, 0.0);
    }

    #[test]
    fn test_denylisted_subject_scores_one() {
        let outcome = run(&chain(), &["alice"], 3);
        assert_eq!(outcome.score, 1.0);
        assert_eq!(outcome.triggered, vec![RecordKey { block_height: 1, extrinsic_index: 0 }]);
    }
}
