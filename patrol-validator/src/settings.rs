use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use patrol_chain_data::models::Subject;
use patrol_chain_data::{normalize_database_url, ArchiveConfig};
use patrol_protocol::communication::parse_peer;
use patrol_protocol::{CodecConfig, DecodeMode};
use patrol_validation::{EngineConfig, OrchestratorConfig};

/// Every knob of a validator node. Each one is read from the environment and
/// can be overridden by the matching flag.
#[derive(Debug, Clone, Parser)]
pub struct Settings {
    #[clap(long, env = "DB_DIR", default_value = "./data")]
    pub db_dir: PathBuf,

    /// Overrides the database under `DB_DIR`.
    #[clap(long, env = "DB_URL")]
    pub db_url: Option<String>,

    #[clap(long, env = "ARCHIVE_NODE", default_value = "http://127.0.0.1:9944")]
    pub archive_node: String,

    #[clap(long, env = "TEST_POSTGRESQL_URL", hide = true)]
    pub test_postgresql_url: Option<String>,

    #[clap(long, env = "NET_UID", default_value = "81")]
    pub net_uid: u16,

    #[clap(long, env = "SCORING_INTERVAL_SECONDS", default_value = "60")]
    pub scoring_interval_seconds: u64,

    #[clap(long, env = "BATCH_CONCURRENCY", default_value = "8")]
    pub batch_concurrency: usize,

    #[clap(long, env = "WINDOW_BLOCKS", default_value = "7200")]
    pub window_blocks: u64,

    #[clap(long, env = "RETRY_BUDGET", default_value = "3")]
    pub retry_budget: u32,

    #[clap(long, env = "MAX_RESPONSE_SIZE_MB", default_value = "64")]
    pub max_response_size_mb: usize,

    /// `<address>@<url>` entries, comma separated.
    #[clap(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    #[clap(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8181")]
    pub listen_addr: SocketAddr,

    /// Accounts scored every round regardless of activity.
    #[clap(long, env = "SUBJECTS", value_delimiter = ',')]
    pub subjects: Vec<String>,

    #[clap(long, env = "DENYLIST", value_delimiter = ',')]
    pub denylist: Vec<String>,

    /// Fetched on every evaluation instead of the static `DENYLIST`.
    #[clap(long, env = "DENYLIST_URL")]
    pub denylist_url: Option<String>,

    #[clap(long, env = "PROTOCOL_MODE", default_value = "lenient")]
    pub protocol_mode: DecodeMode,

    #[clap(long, env = "KEYPAIR_PATH")]
    pub keypair_path: Option<PathBuf>,

    #[clap(long, env = "PEER_TIMEOUT_SECONDS", default_value = "10")]
    pub peer_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenylistSource {
    Static(Vec<String>),
    Http(String),
}

/// Settings resolved into the configuration each component is built from.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub db_url: String,
    /// Created before connecting when the database lives under `DB_DIR`.
    pub db_dir: Option<PathBuf>,
    pub archive: ArchiveConfig,
    pub engine: EngineConfig,
    pub orchestrator: OrchestratorConfig,
    pub codec: CodecConfig,
    pub peers: Vec<(String, String)>,
    pub peer_timeout: Duration,
    pub listen_addr: SocketAddr,
    pub denylist: DenylistSource,
    pub keypair_path: Option<PathBuf>,
}

impl Settings {
    pub fn to_config(&self) -> Result<ValidatorConfig> {
        if self.window_blocks == 0 {
            bail!("WINDOW_BLOCKS must be at least 1");
        }
        if self.batch_concurrency == 0 {
            bail!("BATCH_CONCURRENCY must be at least 1");
        }
        if self.max_response_size_mb == 0 {
            bail!("MAX_RESPONSE_SIZE_MB must be at least 1");
        }
        if self.test_postgresql_url.is_some() {
            log::warn!("TEST_POSTGRESQL_URL is set but only sqlite databases are supported; ignoring it");
        }

        let (db_url, db_dir) = match &self.db_url {
            Some(url) => (url.clone(), None),
            None => (
                format!("sqlite://{}", self.db_dir.join("patrol.db").display()),
                Some(self.db_dir.clone()),
            ),
        };
        let db_url = normalize_database_url(&db_url).with_context(|| format!("invalid DB_URL {}", db_url))?;

        let mut engine = EngineConfig::default();
        engine.stake_concentration.net_uid = Some(self.net_uid);

        let orchestrator = OrchestratorConfig {
            max_concurrent_tasks: self.batch_concurrency,
            retry_budget: self.retry_budget,
            window_blocks: self.window_blocks,
            initial_lookback: self.window_blocks,
            subjects: non_empty(&self.subjects).map(Subject::new).collect(),
            scoring_interval: Duration::from_secs(self.scoring_interval_seconds.max(1)),
            ack_timeout: Duration::from_secs(self.peer_timeout_seconds.max(1)),
            ..OrchestratorConfig::default()
        };

        let max_message_bytes = self
            .max_response_size_mb
            .checked_mul(1024 * 1024)
            .context("MAX_RESPONSE_SIZE_MB is too large")?;
        let codec = CodecConfig {
            mode: self.protocol_mode,
            max_message_bytes,
        };

        let denylist = match self.denylist_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => DenylistSource::Http(url.to_string()),
            None => DenylistSource::Static(non_empty(&self.denylist).map(str::to_string).collect()),
        };

        Ok(ValidatorConfig {
            db_url,
            db_dir,
            archive: ArchiveConfig::new(self.archive_node.trim()),
            engine,
            orchestrator,
            codec,
            peers: non_empty(&self.peers).map(parse_peer).collect(),
            peer_timeout: Duration::from_secs(self.peer_timeout_seconds.max(1)),
            listen_addr: self.listen_addr,
            denylist,
            keypair_path: self.keypair_path.clone(),
        })
    }
}

fn non_empty(entries: &[String]) -> impl Iterator<Item = &str> {
    entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        Settings::try_parse_from(std::iter::once("patrol-validator").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let config = parse(&["--db-dir", "/var/lib/patrol"]).to_config()?;
        assert_eq!(config.db_url, "sqlite:///var/lib/patrol/patrol.db");
        assert_eq!(config.db_dir, Some(PathBuf::from("/var/lib/patrol")));
        assert_eq!(config.orchestrator.max_concurrent_tasks, 8);
        assert_eq!(config.orchestrator.window_blocks, 7200);
        assert_eq!(config.engine.stake_concentration.net_uid, Some(81));
        assert_eq!(config.codec.max_message_bytes, 64 * 1024 * 1024);
        assert_eq!(config.codec.mode, DecodeMode::Lenient);
        assert_eq!(config.denylist, DenylistSource::Static(vec![]));
        Ok(())
    }

    #[test]
    fn test_lists_and_overrides() -> Result<()> {
        let config = parse(&[
            "--db-url",
            "sqlite+aiosqlite:///patrol.db",
            "--peers",
            "5Abc@http://10.0.0.2:8181, ,http://10.0.0.3:8181",
            "--subjects",
            "5Mule,5Quiet",
            "--denylist-url",
            "http://lists.local/denylist",
            "--protocol-mode",
            "strict",
            "--batch-concurrency",
            "2",
        ])
        .to_config()?;
        assert_eq!(config.db_url, "sqlite://patrol.db");
        assert_eq!(config.db_dir, None);
        assert_eq!(
            config.peers,
            vec![
                ("5Abc".to_string(), "http://10.0.0.2:8181".to_string()),
                ("http://10.0.0.3:8181".to_string(), "http://10.0.0.3:8181".to_string()),
            ]
        );
        assert_eq!(config.orchestrator.subjects, vec![Subject::new("5Mule"), Subject::new("5Quiet")]);
        assert_eq!(config.denylist, DenylistSource::Http("http://lists.local/denylist".into()));
        assert_eq!(config.codec.mode, DecodeMode::Strict);
        assert_eq!(config.orchestrator.max_concurrent_tasks, 2);
        Ok(())
    }

    #[test]
    fn test_rejects_unusable_values() {
        assert!(parse(&["--window-blocks", "0"]).to_config().is_err());
        assert!(parse(&["--batch-concurrency", "0"]).to_config().is_err());
        assert!(parse(&["--db-url", "postgresql://localhost/patrol"]).to_config().is_err());
        assert!(Settings::try_parse_from(["patrol-validator", "--protocol-mode", "loose"]).is_err());
    }
}
