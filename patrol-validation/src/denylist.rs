//! Sources for the set of accounts the proximity check treats as known bad.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::{Result, ValidationError};

#[async_trait]
pub trait DenylistProvider: Send + Sync {
    async fn load(&self) -> Result<BTreeSet<String>>;
}

/// A fixed list, usually from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDenylist {
    accounts: BTreeSet<String>,
}

impl StaticDenylist {
    pub fn new<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: accounts
                .into_iter()
                .map(Into::into)
                .map(|a: String| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl DenylistProvider for StaticDenylist {
    async fn load(&self) -> Result<BTreeSet<String>> {
        Ok(self.accounts.clone())
    }
}

/// Fetches a JSON array of addresses on every load.
pub struct HttpDenylist {
    client: Client,
    url: String,
}

impl HttpDenylist {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ValidationError::CheckDependencyUnavailable(format!("denylist client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DenylistProvider for HttpDenylist {
    async fn load(&self) -> Result<BTreeSet<String>> {
        let unavailable = |e: reqwest::Error| {
            ValidationError::CheckDependencyUnavailable(format!("denylist {}: {}", self.url, e))
        };
        let response = self.client.get(&self.url).send().await.map_err(unavailable)?;
        let response = response.error_for_status().map_err(unavailable)?;
        let accounts: Vec<String> = response.json().await.map_err(unavailable)?;
        log::debug!("loaded {} denylisted accounts from {}", accounts.len(), self.url);
        Ok(StaticDenylist::new(accounts).accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_denylist_skips_blank_entries() -> anyhow::Result<()> {
        let list = StaticDenylist::new(["5Bad", " ", "5Worse "]);
        let loaded = list.load().await?;
        assert_eq!(loaded.into_iter().collect::<Vec<_>>(), vec!["5Bad", "5Worse"]);
        Ok(())
    }
}
