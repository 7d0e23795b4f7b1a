use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedBlockReason {
    /// The archive call failed outright.
    Unavailable,
    /// The archive answered but left the height out.
    Gap,
}

impl MissedBlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissedBlockReason::Unavailable => "unavailable",
            MissedBlockReason::Gap => "gap",
        }
    }
}

impl FromStr for MissedBlockReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unavailable" => Ok(MissedBlockReason::Unavailable),
            "gap" => Ok(MissedBlockReason::Gap),
            other => Err(Error::InvalidData(format!("unknown missed block reason {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedBlock {
    pub id: String,
    pub block_height: u64,
    pub created_at: i64,
    pub reason: MissedBlockReason,
    pub error_message: Option<String>,
}
