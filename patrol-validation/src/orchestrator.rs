use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use patrol_chain_data::models::{BlockWindow, Subject, ValidationResult};
use patrol_chain_data::{ChainDataStore, Ingestor};
use patrol_protocol::messages::new_message_id;
use patrol_protocol::{Ack, Communication, EvidenceRequest, EvidenceResponse, Heartbeat, PeerBook, ScoreSubmission, TransportError};
use patrol_utils::keypair::Keypair;
use patrol_utils::retry::RetryPolicy;

use crate::config::OrchestratorConfig;
use crate::engine::ValidationEngine;
use crate::error::ErrorKind;
use crate::peer::verify_evidence;
use crate::task::{TaskRecord, TaskState, ValidationTask};
use crate::{Result, ValidationError};

pub struct OrchestratorProps {
    pub keypair: Arc<Keypair>,
    pub engine: Arc<ValidationEngine>,
    pub store: Arc<ChainDataStore>,
    pub ingestor: Arc<Ingestor>,
    pub communication: Option<Arc<dyn Communication>>,
    pub peer_book: Arc<PeerBook>,
    pub config: OrchestratorConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub collected_blocks: usize,
    pub subjects: usize,
    pub completed: usize,
    pub failed: usize,
}

struct Scheduled {
    task_id: Uuid,
    window: BlockWindow,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    /// Newest task per subject, queued or running.
    active: HashMap<Subject, Scheduled>,
    queue: VecDeque<(ValidationTask, CancellationToken)>,
    records: HashMap<Uuid, TaskRecord>,
    paused_until: Option<Instant>,
}

/// Schedules validation tasks, runs them on a bounded pool and submits
/// their results to peers.
pub struct ValidatorOrchestrator {
    id: String,
    keypair: Arc<Keypair>,
    engine: Arc<ValidationEngine>,
    store: Arc<ChainDataStore>,
    ingestor: Arc<Ingestor>,
    communication: Option<Arc<dyn Communication>>,
    peer_book: Arc<PeerBook>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
    state: Mutex<State>,
}

impl ValidatorOrchestrator {
    pub fn create(props: OrchestratorProps) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(props.config.max_concurrent_tasks.max(1)));
        Arc::new(Self {
            id: props.keypair.as_public_address(),
            keypair: props.keypair,
            engine: props.engine,
            store: props.store,
            ingestor: props.ingestor,
            communication: props.communication,
            peer_book: props.peer_book,
            config: props.config,
            permits,
            state: Mutex::new(State::default()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a task for `subject` over `window`. A task already queued or
    /// running for the subject is cancelled in its favour.
    pub fn schedule(&self, subject: Subject, window: BlockWindow) -> ValidationTask {
        let task = ValidationTask::new(subject.clone(), window);
        let cancel = CancellationToken::new();
        let mut state = self.state();

        if let Some(previous) = state.active.remove(&subject) {
            log::info!(
                "task {} for {} over {} superseded by {}",
                previous.task_id,
                subject,
                previous.window,
                window
            );
            previous.cancel.cancel();
            if let Some(pos) = state.queue.iter().position(|(t, _)| t.id == previous.task_id) {
                state.queue.remove(pos);
                let reason = ValidationError::Cancelled(format!("superseded by window {}", window));
                if let Some(record) = state.records.get_mut(&previous.task_id) {
                    let _ = record.fail(&reason);
                }
            }
        }

        state.active.insert(
            subject,
            Scheduled {
                task_id: task.id,
                window,
                cancel: cancel.clone(),
            },
        );
        state.records.insert(task.id, TaskRecord::new(task.clone()));
        state.queue.push_back((task.clone(), cancel));
        task
    }

    pub fn task_status(&self, id: &Uuid) -> Option<TaskRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    pub fn paused_until(&self) -> Option<Instant> {
        self.state().paused_until
    }

    /// Runs every queued task, at most `max_concurrent_tasks` at a time, and
    /// returns their final records. Tasks scheduled while this runs are
    /// picked up too.
    pub async fn run_pending(self: &Arc<Self>) -> Vec<TaskRecord> {
        let mut running: JoinSet<TaskRecord> = JoinSet::new();
        let mut finished = Vec::new();

        loop {
            let has_queued = !self.state().queue.is_empty();
            if has_queued {
                tokio::select! {
                    permit = self.permits.clone().acquire_owned() => {
                        let Ok(permit) = permit else {
                            break;
                        };
                        self.wait_while_paused().await;
                        let Some((task, cancel)) = self.state().queue.pop_front() else {
                            continue;
                        };
                        let this = self.clone();
                        running.spawn(async move {
                            let _permit = permit;
                            this.run_task(task, cancel).await
                        });
                    }
                    Some(joined) = running.join_next(), if !running.is_empty() => {
                        collect(joined, &mut finished);
                    }
                }
            } else {
                match running.join_next().await {
                    Some(joined) => collect(joined, &mut finished),
                    None => break,
                }
            }
        }
        finished
    }

    async fn wait_while_paused(&self) {
        loop {
            let until = self.state().paused_until;
            match until {
                Some(until) if until > Instant::now() => {
                    log::debug!("dispatch paused for {:?}", until - Instant::now());
                    tokio::time::sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    fn pause_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.state();
        if state.paused_until.map_or(true, |current| current < until) {
            state.paused_until = Some(until);
        }
    }

    fn with_record<T>(&self, id: &Uuid, f: impl FnOnce(&mut TaskRecord) -> T) -> Option<T> {
        self.state().records.get_mut(id).map(f)
    }

    fn transition(&self, id: &Uuid, next: TaskState) -> Result<()> {
        self.with_record(id, |record| record.transition(next)).unwrap_or(Ok(()))
    }

    async fn run_task(&self, mut task: ValidationTask, cancel: CancellationToken) -> TaskRecord {
        let policy = self.config.retry_policy();
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            task.attempts = attempt;
            self.with_record(&task.id, |record| record.task.attempts = attempt);

            let err = match self.attempt(&task, &cancel).await {
                Ok(version) => {
                    let _ = self.transition(&task.id, TaskState::Completed);
                    log::info!("task {} for {} completed as version {}", task.id, task.subject, version);
                    break;
                }
                Err(err) => err,
            };

            if err.is_retryable() && attempt < attempts && !cancel.is_cancelled() {
                let delay = policy.backoff_for(attempt);
                if err.kind() == ErrorKind::StorageUnavailable {
                    self.pause_for(delay);
                }
                log::warn!(
                    "task {} for {}: attempt {}/{} failed ({}): {}; retrying in {:?}",
                    task.id,
                    task.subject,
                    attempt,
                    attempts,
                    err.kind(),
                    err,
                    delay
                );
                if self.transition(&task.id, TaskState::Pending).is_ok() {
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if !cancelled {
                        attempt += 1;
                        continue;
                    }
                    self.fail(&task, &ValidationError::Cancelled("superseded during backoff".into()));
                    break;
                }
            }

            self.fail(&task, &err);
            break;
        }

        self.release(&task);
        self.task_status(&task.id).unwrap_or_else(|| TaskRecord::new(task))
    }

    fn fail(&self, task: &ValidationTask, err: &ValidationError) {
        match err.kind() {
            ErrorKind::Cancelled => log::info!("task {} for {} cancelled: {}", task.id, task.subject, err),
            kind => log::error!(
                "task {} for {} failed after {} attempt(s) ({}): {}",
                task.id,
                task.subject,
                task.attempts,
                kind.as_str(),
                err
            ),
        }
        self.with_record(&task.id, |record| record.fail(err));
    }

    fn release(&self, task: &ValidationTask) {
        let mut state = self.state();
        if state.active.get(&task.subject).map(|s| s.task_id) == Some(task.id) {
            state.active.remove(&task.subject);
        }
    }

    /// One pass through the task's stages. Cancellation is honoured up to the
    /// point the result is persisted and never after.
    async fn attempt(&self, task: &ValidationTask, cancel: &CancellationToken) -> Result<u64> {
        self.transition(&task.id, TaskState::Ingesting)?;
        until_cancelled(cancel, self.engine.ingest(task)).await?;

        self.transition(&task.id, TaskState::Evaluating)?;
        let mut result = until_cancelled(cancel, self.engine.evaluate(task)).await?;

        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled("superseded before persisting".into()));
        }
        let version = self.store.put_result(&result).await?;
        result.version = version;
        self.with_record(&task.id, |record| record.version = Some(version));

        self.transition(&task.id, TaskState::Submitted)?;
        self.submit(&result).await?;
        Ok(version)
    }

    fn submission_targets(&self, communication: &dyn Communication) -> Vec<String> {
        communication
            .peers()
            .into_iter()
            .filter(|peer| peer != &self.id)
            .filter(|peer| {
                let stale = self.peer_book.is_stale(peer);
                if stale {
                    log::debug!("skipping stale peer {}", peer);
                }
                !stale
            })
            .collect()
    }

    /// Signs `result` and offers it to every peer at once. Succeeds on the
    /// first accepting ack; deliveries still in flight carry on detached.
    pub async fn submit(&self, result: &ValidationResult) -> Result<()> {
        let Some(communication) = self.communication.clone() else {
            return Ok(());
        };
        let targets = self.submission_targets(communication.as_ref());
        if targets.is_empty() {
            log::debug!("no peers to submit {} to", result.subject);
            return Ok(());
        }

        let submission = ScoreSubmission::new(&self.id, result.clone())
            .sign(&self.keypair)
            .map_err(|e| ValidationError::Unacknowledged(format!("could not sign submission: {}", e)))?;

        let (tx, mut rx) = mpsc::channel(targets.len());
        for peer in targets {
            let communication = communication.clone();
            let submission = submission.clone();
            let tx = tx.clone();
            let policy = RetryPolicy::no_delay(self.config.submit_attempts);
            let ack_timeout = self.config.ack_timeout;
            tokio::spawn(async move {
                let outcome = deliver(communication.as_ref(), &peer, &submission, &policy, ack_timeout).await;
                let _ = tx.send((peer, outcome)).await;
            });
        }
        drop(tx);

        let mut failures = Vec::new();
        while let Some((peer, outcome)) = rx.recv().await {
            match outcome {
                Ok(ack) if ack.accepted => {
                    log::debug!("submission {} acknowledged by {}", submission.submission_id, peer);
                    return Ok(());
                }
                Ok(ack) => failures.push(format!("{} rejected: {}", peer, ack.reason.unwrap_or_default())),
                Err(err) => failures.push(err.to_string()),
            }
        }
        Err(ValidationError::Unacknowledged(failures.join("; ")))
    }

    /// Asks `peer` for its latest result on `subject` and checks that the
    /// response is internally consistent.
    pub async fn fetch_peer_evidence(
        &self,
        peer: &str,
        subject: &Subject,
        window: BlockWindow,
    ) -> Result<EvidenceResponse> {
        let communication = self
            .communication
            .as_ref()
            .ok_or_else(|| ValidationError::Transport(TransportError::UnknownPeer(peer.to_string())))?;
        let request = EvidenceRequest {
            request_id: new_message_id(),
            sender: self.id.clone(),
            subject: subject.clone(),
            window,
            extra: Default::default(),
        };
        let response = communication.request_evidence(peer, &request).await?;
        verify_evidence(peer, subject, &response)?;
        Ok(response)
    }

    /// Returns how many peers acknowledged.
    pub async fn broadcast_heartbeat(&self) -> usize {
        let Some(communication) = self.communication.clone() else {
            return 0;
        };
        let latest_block = match self.store.highest_ingested_block().await {
            Ok(latest) => latest,
            Err(err) => {
                log::warn!("could not read latest block for heartbeat: {}", err);
                None
            }
        };
        let heartbeat = Heartbeat::new(&self.id, latest_block);
        let mut sends = JoinSet::new();
        for peer in communication.peers().into_iter().filter(|p| p != &self.id) {
            let communication = communication.clone();
            let heartbeat = heartbeat.clone();
            sends.spawn(async move {
                let outcome = communication.send_heartbeat(&peer, &heartbeat).await;
                (peer, outcome)
            });
        }

        let mut acknowledged = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(ack))) if ack.accepted => acknowledged += 1,
                Ok((peer, Ok(ack))) => log::debug!("heartbeat rejected by {}: {:?}", peer, ack.reason),
                Ok((peer, Err(err))) => log::debug!("heartbeat to {} failed: {}", peer, err),
                Err(err) => log::warn!("heartbeat send panicked: {}", err),
            }
        }
        acknowledged
    }

    async fn select_subjects(&self, window: BlockWindow) -> Result<Vec<Subject>> {
        let mut seen = BTreeSet::new();
        let mut subjects = Vec::new();
        let recent = self
            .store
            .recent_subjects(window, self.config.max_active_subjects)
            .await?;
        for subject in self.config.subjects.iter().cloned().chain(recent) {
            if seen.insert(subject.clone()) {
                subjects.push(subject);
            }
        }
        Ok(subjects)
    }

    /// One round of the control loop: collect new blocks, retry missed ones,
    /// score the selected subjects over the trailing window, then heartbeat.
    pub async fn tick(self: &Arc<Self>) -> Result<TickReport> {
        self.state().records.retain(|_, record| !record.state.is_terminal());

        let mut report = TickReport::default();
        match self.ingestor.collect_latest(self.config.initial_lookback).await {
            Ok(collected) => report.collected_blocks = collected.blocks,
            Err(err) => log::warn!("block collection incomplete: {}", err),
        }
        match self.ingestor.retry_missed_blocks().await {
            Ok(retried) if retried.blocks > 0 => report.collected_blocks += retried.blocks,
            Ok(_) => {}
            Err(err) => log::warn!("missed blocks still unavailable: {}", err),
        }

        let Some(tip) = self.store.highest_ingested_block().await? else {
            log::info!("nothing ingested yet, skipping scoring");
            return Ok(report);
        };
        let window = BlockWindow::trailing(tip, self.config.window_blocks.max(1));
        let subjects = self.select_subjects(window).await?;
        report.subjects = subjects.len();
        for subject in subjects {
            self.schedule(subject, window);
        }

        for record in self.run_pending().await {
            match record.state {
                TaskState::Completed => report.completed += 1,
                TaskState::Failed => report.failed += 1,
                _ => {}
            }
        }

        self.broadcast_heartbeat().await;

        if let Some(retain) = self.config.retain_blocks {
            let cutoff = tip.saturating_sub(retain);
            if cutoff > 0 {
                let pruned = self.store.prune_records_before(cutoff).await?;
                if pruned > 0 {
                    log::info!("pruned {} records below block {}", pruned, cutoff);
                }
            }
        }
        Ok(report)
    }

    /// Ticks every `scoring_interval` until `shutdown` fires, then cancels
    /// whatever is still queued or running.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.scoring_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        outcome = self.tick() => match outcome {
                            Ok(report) => log::info!(
                                "tick: {} blocks collected, {} subjects, {} completed, {} failed",
                                report.collected_blocks,
                                report.subjects,
                                report.completed,
                                report.failed
                            ),
                            Err(err) => log::error!("tick failed ({}): {}", err.kind(), err),
                        },
                    }
                }
            }
        }

        let state = self.state();
        for scheduled in state.active.values() {
            scheduled.cancel.cancel();
        }
        log::info!("validator loop stopped");
    }
}

fn collect(joined: std::result::Result<TaskRecord, tokio::task::JoinError>, finished: &mut Vec<TaskRecord>) {
    match joined {
        Ok(record) => finished.push(record),
        Err(err) => log::error!("validation task panicked: {}", err),
    }
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ValidationError::Cancelled("superseded".into())),
        outcome = work => outcome,
    }
}

/// Sends `submission` to one peer, retransmitting on timeouts and
/// unreachable errors until `policy` runs out.
async fn deliver(
    communication: &dyn Communication,
    peer: &str,
    submission: &ScoreSubmission,
    policy: &RetryPolicy,
    ack_timeout: Duration,
) -> std::result::Result<Ack, TransportError> {
    let label = format!("submit {} to {}", submission.submission_id, peer);
    policy
        .run(&label, TransportError::is_retryable, |_| async move {
            tokio::time::timeout(ack_timeout, communication.submit_score(peer, submission))
                .await
                .map_err(|_| TransportError::Timeout { peer: peer.to_string() })?
        })
        .await
}
