use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifies a record by its position on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub block_height: u64,
    pub extrinsic_index: u32,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.block_height, self.extrinsic_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Transfer,
    StakeAdded,
    StakeRemoved,
    StakeMoved,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Transfer => "transfer",
            RecordKind::StakeAdded => "stake_added",
            RecordKind::StakeRemoved => "stake_removed",
            RecordKind::StakeMoved => "stake_moved",
        }
    }

    pub fn is_stake(&self) -> bool {
        !matches!(self, RecordKind::Transfer)
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transfer" => Ok(RecordKind::Transfer),
            "stake_added" => Ok(RecordKind::StakeAdded),
            "stake_removed" => Ok(RecordKind::StakeRemoved),
            "stake_moved" => Ok(RecordKind::StakeMoved),
            other => Err(Error::InvalidData(format!("unknown record kind {}", other))),
        }
    }
}

/// One observed on-chain event. Amounts are in rao.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub block_height: u64,
    pub extrinsic_index: u32,
    pub timestamp: i64,
    pub kind: RecordKind,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    pub amount: u64,
    #[serde(default)]
    pub net_uid: Option<u16>,
    #[serde(default)]
    pub delegate: Option<String>,
}

impl ChainRecord {
    pub fn transfer(
        block_height: u64,
        extrinsic_index: u32,
        timestamp: i64,
        from: &str,
        to: &str,
        amount: u64,
    ) -> Self {
        Self {
            block_height,
            extrinsic_index,
            timestamp,
            kind: RecordKind::Transfer,
            source: Some(from.to_string()),
            destination: Some(to.to_string()),
            owner: None,
            amount,
            net_uid: None,
            delegate: None,
        }
    }

    pub fn stake_added(
        block_height: u64,
        extrinsic_index: u32,
        timestamp: i64,
        coldkey: &str,
        delegate: &str,
        net_uid: u16,
        amount: u64,
    ) -> Self {
        Self {
            block_height,
            extrinsic_index,
            timestamp,
            kind: RecordKind::StakeAdded,
            source: Some(coldkey.to_string()),
            destination: None,
            owner: None,
            amount,
            net_uid: Some(net_uid),
            delegate: Some(delegate.to_string()),
        }
    }

    pub fn stake_removed(
        block_height: u64,
        extrinsic_index: u32,
        timestamp: i64,
        coldkey: &str,
        delegate: &str,
        net_uid: u16,
        amount: u64,
    ) -> Self {
        Self {
            block_height,
            extrinsic_index,
            timestamp,
            kind: RecordKind::StakeRemoved,
            source: None,
            destination: Some(coldkey.to_string()),
            owner: None,
            amount,
            net_uid: Some(net_uid),
            delegate: Some(delegate.to_string()),
        }
    }

    /// Stake moved by `owner` from `source` to `destination`, landing on `delegate`.
    #[allow(clippy::too_many_arguments)]
    pub fn stake_moved(
        block_height: u64,
        extrinsic_index: u32,
        timestamp: i64,
        owner: &str,
        source: &str,
        destination: &str,
        delegate: &str,
        amount: u64,
    ) -> Self {
        Self {
            block_height,
            extrinsic_index,
            timestamp,
            kind: RecordKind::StakeMoved,
            source: Some(source.to_string()),
            destination: Some(destination.to_string()),
            owner: Some(owner.to_string()),
            amount,
            net_uid: None,
            delegate: Some(delegate.to_string()),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            block_height: self.block_height,
            extrinsic_index: self.extrinsic_index,
        }
    }

    pub fn involves(&self, account: &str) -> bool {
        self.accounts().any(|a| a == account)
    }

    /// Source, destination and owner, in that order, skipping the absent ones.
    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        [&self.source, &self.destination, &self.owner]
            .into_iter()
            .filter_map(|a| a.as_deref())
    }

    /// The coldkey whose stake position with `delegate` this record changes.
    pub fn staker(&self) -> Option<&str> {
        match self.kind {
            RecordKind::StakeAdded => self.source.as_deref(),
            RecordKind::StakeMoved => self.owner.as_deref(),
            RecordKind::StakeRemoved => self.destination.as_deref(),
            RecordKind::Transfer => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.is_none() && self.destination.is_none() {
            return Err(Error::InvalidData(format!(
                "record {} names neither a source nor a destination",
                self.key()
            )));
        }
        if self.kind.is_stake() && self.delegate.is_none() {
            return Err(Error::InvalidData(format!(
                "{} record {} has no delegate",
                self.kind.as_str(),
                self.key()
            )));
        }
        if self.accounts().any(str::is_empty) {
            return Err(Error::InvalidData(format!("record {} names an empty account", self.key())));
        }
        Ok(())
    }
}
