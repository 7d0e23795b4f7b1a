use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An account address under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Inclusive block height range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct BlockWindow {
    from: u64,
    to: u64,
}

#[derive(Deserialize)]
struct RawWindow {
    from: u64,
    to: u64,
}

impl TryFrom<RawWindow> for BlockWindow {
    type Error = Error;

    fn try_from(raw: RawWindow) -> Result<Self> {
        BlockWindow::new(raw.from, raw.to)
    }
}

impl BlockWindow {
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if from > to {
            return Err(Error::InvalidData(format!("window start {} is after end {}", from, to)));
        }
        Ok(Self { from, to })
    }

    /// The `len` blocks ending at `tip`, clamped at genesis.
    pub fn trailing(tip: u64, len: u64) -> Self {
        Self {
            from: tip.saturating_sub(len.saturating_sub(1)),
            to: tip,
        }
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    pub fn to(&self) -> u64 {
        self.to
    }

    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && height <= self.to
    }

    pub fn heights(&self) -> impl Iterator<Item = u64> {
        self.from..=self.to
    }
}

impl fmt::Display for BlockWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}
