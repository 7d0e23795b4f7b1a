use serde::{Deserialize, Serialize};

use crate::models::Subject;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePosition {
    pub delegate: String,
    #[serde(default)]
    pub net_uid: Option<u16>,
    pub amount: u64,
}

/// Account state as of `block_height`, read from the archive node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub subject: Subject,
    pub block_height: u64,
    pub free_balance: u64,
    #[serde(default)]
    pub stakes: Vec<StakePosition>,
}

impl AccountSnapshot {
    pub fn total_stake(&self) -> u64 {
        self.stakes.iter().map(|s| s.amount).fold(0u64, u64::saturating_add)
    }
}
