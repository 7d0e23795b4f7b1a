use patrol_chain_data::models::{CheckKind, Evidence, ResultStatus};

use crate::checks::CheckOutcome;
use crate::config::CheckWeights;

impl CheckWeights {
    pub fn weight_of(&self, kind: CheckKind) -> f64 {
        match kind {
            CheckKind::Velocity => self.velocity,
            CheckKind::Proximity => self.proximity,
            CheckKind::StakeConcentration => self.stake_concentration,
        }
    }
}

/// Weighted mean of the check scores, clipped to [0, 1].
pub fn aggregate(outcomes: &[CheckOutcome], weights: &CheckWeights) -> f64 {
    let (weighted, total) = outcomes.iter().fold((0.0, 0.0), |(sum, total), outcome| {
        let w = weights.weight_of(outcome.kind).max(0.0);
        (sum + w * outcome.score, total + w)
    });
    if total <= 0.0 {
        return 0.0;
    }
    (weighted / total).clamp(0.0, 1.0)
}

pub fn status_for(score: f64, flag_threshold: f64) -> ResultStatus {
    if score >= flag_threshold {
        ResultStatus::Flagged
    } else {
        ResultStatus::Valid
    }
}

pub fn into_evidence(outcomes: Vec<CheckOutcome>) -> Vec<Evidence> {
    outcomes
        .into_iter()
        .map(|o| Evidence {
            check: o.kind,
            score: o.score,
            records: o.triggered,
            detail: o.detail,
        })
        .collect()
}
