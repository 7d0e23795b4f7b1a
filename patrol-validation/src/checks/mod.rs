pub mod proximity;
pub mod stake_concentration;
pub mod velocity;

use std::collections::BTreeSet;

use patrol_chain_data::models::{BlockWindow, ChainRecord, CheckKind, RecordKey, Subject};

pub use proximity::ProximityCheck;
pub use stake_concentration::StakeConcentrationCheck;
pub use velocity::VelocityCheck;

use crate::config::EngineConfig;

/// Everything a check may look at. Checks never perform I/O.
pub struct CheckInput<'a> {
    pub subject: &'a Subject,
    pub window: BlockWindow,
    /// The subject's records, ordered by key.
    pub records: &'a [ChainRecord],
    /// Every record in the window, ordered by key.
    pub neighbourhood: &'a [ChainRecord],
    pub denylist: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    /// In [0, 1]; higher is riskier.
    pub score: f64,
    /// Sorted, without duplicates.
    pub triggered: Vec<RecordKey>,
    pub detail: String,
}

impl CheckOutcome {
    pub fn new(kind: CheckKind, score: f64, triggered: impl IntoIterator<Item = RecordKey>, detail: String) -> Self {
        let triggered: BTreeSet<RecordKey> = triggered.into_iter().collect();
        Self {
            kind,
            score: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
            triggered: triggered.into_iter().collect(),
            detail,
        }
    }

    pub fn clean(kind: CheckKind, detail: impl Into<String>) -> Self {
        Self::new(kind, 0.0, [], detail.into())
    }
}

pub trait Check: Send + Sync {
    fn kind(&self) -> CheckKind;
    fn evaluate(&self, input: &CheckInput<'_>) -> CheckOutcome;
}

/// The fixed check set, in evaluation order.
pub fn standard_checks(config: &EngineConfig) -> Vec<Box<dyn Check>> {
    vec![
        Box::new(VelocityCheck::new(config.velocity.clone())),
        Box::new(ProximityCheck::new(config.proximity.clone())),
        Box::new(StakeConcentrationCheck::new(config.stake_concentration.clone())),
    ]
}
