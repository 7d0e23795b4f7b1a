use std::collections::BTreeSet;
use std::sync::Arc;

use patrol_chain_data::models::{BlockWindow, ChainRecord, ResultStatus, Subject, ValidationResult};
use patrol_chain_data::{ChainDataStore, IngestReport, Ingestor};

use crate::aggregator::{aggregate, into_evidence, status_for};
use crate::checks::{standard_checks, Check, CheckInput};
use crate::config::{EngineConfig, NEUTRAL_SCORE};
use crate::denylist::DenylistProvider;
use crate::task::ValidationTask;
use crate::{Result, ValidationError};

/// Turns a subject's stored history into a scored, evidenced result.
pub struct ValidationEngine {
    store: Arc<ChainDataStore>,
    ingestor: Arc<Ingestor>,
    denylist: Arc<dyn DenylistProvider>,
    config: EngineConfig,
    checks: Vec<Box<dyn Check>>,
}

impl ValidationEngine {
    pub fn new(
        store: Arc<ChainDataStore>,
        ingestor: Arc<Ingestor>,
        denylist: Arc<dyn DenylistProvider>,
        config: EngineConfig,
    ) -> Self {
        let checks = standard_checks(&config);
        Self {
            store,
            ingestor,
            denylist,
            config,
            checks,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backfills whatever part of the task's window the store is missing.
    pub async fn ingest(&self, task: &ValidationTask) -> Result<IngestReport> {
        let report = self.ingestor.backfill(task.window).await?;
        if report.blocks > 0 {
            log::debug!(
                "task {}: ingested {} blocks ({} records)",
                task.id,
                report.blocks,
                report.records_inserted
            );
        }
        Ok(report)
    }

    /// Scores the subject from stored records. Nothing is persisted.
    pub async fn evaluate(&self, task: &ValidationTask) -> Result<ValidationResult> {
        let records = self.store.get_records(&task.subject, task.window).await?;
        for record in &records {
            record.validate().map_err(|e| ValidationError::MalformedRecord {
                key: record.key(),
                reason: e.to_string(),
            })?;
        }

        let evaluated_at = chrono::Utc::now().timestamp_millis();
        if records.is_empty() {
            return self.score(&task.subject, task.window, &[], &[], &BTreeSet::new(), evaluated_at);
        }

        let denylist = self.denylist.load().await?;
        let neighbourhood = self.store.get_window_records(task.window).await?;
        self.score(&task.subject, task.window, &records, &neighbourhood, &denylist, evaluated_at)
    }

    /// Ingest then evaluate.
    pub async fn validate(&self, task: &ValidationTask) -> Result<ValidationResult> {
        self.ingest(task).await?;
        self.evaluate(task).await
    }

    /// Pure scoring over stored window records: the same inputs always
    /// produce the same result, whatever the archive's current state.
    pub fn score(
        &self,
        subject: &Subject,
        window: BlockWindow,
        records: &[ChainRecord],
        neighbourhood: &[ChainRecord],
        denylist: &BTreeSet<String>,
        evaluated_at: i64,
    ) -> Result<ValidationResult> {
        if records.is_empty() {
            return Ok(ValidationResult::new(
                subject.clone(),
                window,
                evaluated_at,
                NEUTRAL_SCORE,
                ResultStatus::NoData,
                Vec::new(),
            )?);
        }

        let input = CheckInput {
            subject,
            window,
            records,
            neighbourhood,
            denylist,
        };
        let outcomes: Vec<_> = self.checks.iter().map(|check| check.evaluate(&input)).collect();
        let score = aggregate(&outcomes, &self.config.weights);
        let status = status_for(score, self.config.flag_threshold);
        log::debug!("{} over {}: score {:.3} ({})", subject, window, score, status);

        Ok(ValidationResult::new(
            subject.clone(),
            window,
            evaluated_at,
            score,
            status,
            into_evidence(outcomes),
        )?)
    }
}
