use std::time::Duration;

use patrol_chain_data::models::Subject;
use patrol_utils::retry::RetryPolicy;

/// One TAO in rao.
pub const RAO_PER_TAO: u64 = 1_000_000_000;

pub const NEUTRAL_SCORE: f64 = 0.5;
pub const DEFAULT_FLAG_THRESHOLD: f64 = 0.6;
pub const DEFAULT_WINDOW_BLOCKS: u64 = 7200;
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct VelocityConfig {
    pub bucket_blocks: u64,
    pub max_transfers_per_bucket: usize,
    pub max_volume_per_bucket: u64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            // about an hour of 12 second blocks
            bucket_blocks: 300,
            max_transfers_per_bucket: 20,
            max_volume_per_bucket: 10_000 * RAO_PER_TAO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityConfig {
    pub max_hops: usize,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self { max_hops: 3 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StakeConcentrationConfig {
    pub min_total_stake: u64,
    /// Only stake on this subnet counts when set.
    pub net_uid: Option<u16>,
}

impl Default for StakeConcentrationConfig {
    fn default() -> Self {
        Self {
            min_total_stake: RAO_PER_TAO,
            net_uid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckWeights {
    pub velocity: f64,
    pub proximity: f64,
    pub stake_concentration: f64,
}

impl Default for CheckWeights {
    fn default() -> Self {
        Self {
            velocity: 0.4,
            proximity: 0.4,
            stake_concentration: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub weights: CheckWeights,
    pub flag_threshold: f64,
    pub velocity: VelocityConfig,
    pub proximity: ProximityConfig,
    pub stake_concentration: StakeConcentrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: CheckWeights::default(),
            flag_threshold: DEFAULT_FLAG_THRESHOLD,
            velocity: VelocityConfig::default(),
            proximity: ProximityConfig::default(),
            stake_concentration: StakeConcentrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    /// Retries after the first attempt for retryable failures.
    pub retry_budget: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub submit_attempts: u32,
    pub ack_timeout: Duration,
    pub window_blocks: u64,
    /// Always evaluated, ahead of the most active accounts.
    pub subjects: Vec<Subject>,
    pub max_active_subjects: usize,
    /// Blocks collected behind the tip when the store is empty.
    pub initial_lookback: u64,
    pub scoring_interval: Duration,
    /// Records older than this many blocks behind the tip are pruned.
    pub retain_blocks: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            retry_budget: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            submit_attempts: 3,
            ack_timeout: Duration::from_secs(10),
            window_blocks: DEFAULT_WINDOW_BLOCKS,
            subjects: Vec::new(),
            max_active_subjects: 32,
            initial_lookback: DEFAULT_WINDOW_BLOCKS,
            scoring_interval: Duration::from_secs(60),
            retain_blocks: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_budget.saturating_add(1),
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            multiplier: 2,
        }
    }
}
