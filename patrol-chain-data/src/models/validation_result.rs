use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use patrol_utils::hash::sha256_json;

use crate::models::{BlockWindow, RecordKey, Subject};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Valid,
    Flagged,
    NoData,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Valid => "valid",
            ResultStatus::Flagged => "flagged",
            ResultStatus::NoData => "no_data",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "valid" => Ok(ResultStatus::Valid),
            "flagged" => Ok(ResultStatus::Flagged),
            "no_data" => Ok(ResultStatus::NoData),
            other => Err(Error::InvalidData(format!("unknown result status {}", other))),
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Velocity,
    Proximity,
    StakeConcentration,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Velocity => "velocity",
            CheckKind::Proximity => "proximity",
            CheckKind::StakeConcentration => "stake_concentration",
        }
    }
}

/// What one check contributed to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub check: CheckKind,
    pub score: f64,
    pub records: Vec<RecordKey>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub subject: Subject,
    pub window: BlockWindow,
    /// Assigned by the store on write; zero until persisted.
    pub version: u64,
    pub evaluated_at: i64,
    pub score: f64,
    pub status: ResultStatus,
    pub evidence: Vec<Evidence>,
    pub evidence_digest: String,
}

#[derive(Serialize)]
struct DigestInput<'a> {
    subject: &'a Subject,
    window: &'a BlockWindow,
    score: f64,
    status: ResultStatus,
    evidence: &'a [Evidence],
}

impl ValidationResult {
    pub fn new(
        subject: Subject,
        window: BlockWindow,
        evaluated_at: i64,
        score: f64,
        status: ResultStatus,
        evidence: Vec<Evidence>,
    ) -> Result<Self> {
        let evidence_digest = Self::compute_digest(&subject, &window, score, status, &evidence)?;
        Ok(Self {
            subject,
            window,
            version: 0,
            evaluated_at,
            score,
            status,
            evidence,
            evidence_digest,
        })
    }

    /// sha256 of the canonical JSON of everything but version and timestamp.
    pub fn compute_digest(
        subject: &Subject,
        window: &BlockWindow,
        score: f64,
        status: ResultStatus,
        evidence: &[Evidence],
    ) -> Result<String> {
        Ok(sha256_json(&DigestInput { subject, window, score, status, evidence })?)
    }

    pub fn verify_digest(&self) -> bool {
        Self::compute_digest(&self.subject, &self.window, self.score, self.status, &self.evidence)
            .map(|digest| digest == self.evidence_digest)
            .unwrap_or(false)
    }

    pub fn evidence_keys(&self) -> BTreeSet<RecordKey> {
        self.evidence
            .iter()
            .flat_map(|e| e.records.iter().copied())
            .collect()
    }

    pub fn evidence_for(&self, check: CheckKind) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.check == check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ValidationResult {
        ValidationResult::new(
            Subject::new("5Subject"),
            BlockWindow::new(1, 10).unwrap(),
            1_700_000_000_000,
            0.42,
            ResultStatus::Valid,
            vec![Evidence {
                check: CheckKind::Velocity,
                score: 0.5,
                records: vec![RecordKey { block_height: 3, extrinsic_index: 1 }],
                detail: "1 of 2 buckets anomalous".into(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_digest_ignores_version_and_time() {
        let a = sample();
        let mut b = sample();
        b.version = 7;
        b.evaluated_at += 60_000;
        assert_eq!(a.evidence_digest, b.evidence_digest);
        assert!(b.verify_digest());
    }

    #[test]
    fn test_tampered_score_fails_digest() {
        let mut result = sample();
        result.score = 0.9;
        assert!(!result.verify_digest());
    }
}
