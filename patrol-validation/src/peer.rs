use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use patrol_chain_data::models::{Subject, ValidationResult};
use patrol_chain_data::ChainDataStore;
use patrol_protocol::{Ack, EvidenceRequest, EvidenceResponse, Heartbeat, PeerHandler, ScoreSubmission};

use crate::ValidationError;

/// Checks that `response` from `peer` is about `subject`, that its result
/// digest holds and that every cited record is supplied and well formed.
pub fn verify_evidence(peer: &str, subject: &Subject, response: &EvidenceResponse) -> crate::Result<()> {
    if &response.subject != subject {
        return Err(ValidationError::InvalidEvidence(format!(
            "{} answered for {} instead of {}",
            peer, response.subject, subject
        )));
    }
    if let Some(result) = &response.result {
        if !result.verify_digest() {
            return Err(ValidationError::InvalidEvidence(format!(
                "digest mismatch in result from {}",
                peer
            )));
        }
        let supplied: BTreeSet<_> = response.records.iter().map(|r| r.key()).collect();
        if let Some(missing) = result.evidence_keys().into_iter().find(|k| !supplied.contains(k)) {
            return Err(ValidationError::InvalidEvidence(format!(
                "{} cited record {} without supplying it",
                peer, missing
            )));
        }
    }
    for record in &response.records {
        record
            .validate()
            .map_err(|e| ValidationError::InvalidEvidence(format!("record from {}: {}", peer, e)))?;
    }
    Ok(())
}

/// Answers other validators: serves our latest results with the records they
/// cite, and keeps the newest score each peer has submitted per subject.
pub struct ValidatorPeer {
    id: String,
    store: Arc<ChainDataStore>,
    received: RwLock<BTreeMap<(Subject, String), ValidationResult>>,
}

impl ValidatorPeer {
    pub fn new(id: impl Into<String>, store: Arc<ChainDataStore>) -> Self {
        Self {
            id: id.into(),
            store,
            received: RwLock::new(BTreeMap::new()),
        }
    }

    /// Latest submission from every peer that scored `subject`, keyed by peer id.
    pub fn peer_scores(&self, subject: &Subject) -> BTreeMap<String, ValidationResult> {
        let received = self.received.read().unwrap_or_else(|e| e.into_inner());
        received
            .iter()
            .filter(|((s, _), _)| s == subject)
            .map(|((_, sender), result)| (sender.clone(), result.clone()))
            .collect()
    }
}

#[async_trait]
impl PeerHandler for ValidatorPeer {
    fn peer_id(&self) -> &str {
        &self.id
    }

    async fn on_evidence_request(&self, request: EvidenceRequest) -> Result<EvidenceResponse> {
        let result = self.store.get_latest_result(&request.subject).await?;
        let records = match &result {
            Some(result) => {
                let cited: BTreeSet<_> = result.evidence_keys();
                self.store
                    .get_window_records(result.window)
                    .await?
                    .into_iter()
                    .filter(|r| cited.contains(&r.key()))
                    .collect()
            }
            None => Vec::new(),
        };
        log::debug!(
            "serving evidence for {} to {} ({} records)",
            request.subject,
            request.sender,
            records.len()
        );
        Ok(EvidenceResponse {
            request_id: request.request_id,
            sender: self.id.clone(),
            subject: request.subject,
            result,
            records,
            extra: Default::default(),
        })
    }

    async fn on_score_submission(&self, submission: ScoreSubmission) -> Result<Ack> {
        let key = (submission.result.subject.clone(), submission.sender.clone());
        let mut received = self.received.write().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = received.get(&key) {
            if held.evaluated_at > submission.result.evaluated_at {
                return Ok(Ack::reject(
                    &submission.submission_id,
                    &self.id,
                    "older than the score already held",
                ));
            }
        }
        log::info!(
            "score {:.3} ({}) for {} from {}",
            submission.result.score,
            submission.result.status,
            submission.result.subject,
            submission.sender
        );
        received.insert(key, submission.result);
        Ok(Ack::accept(&submission.submission_id, &self.id))
    }

    async fn on_heartbeat(&self, heartbeat: Heartbeat) -> Result<()> {
        log::debug!("heartbeat from {} at block {:?}", heartbeat.sender, heartbeat.latest_block);
        Ok(())
    }
}
