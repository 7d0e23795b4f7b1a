use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use patrol_validator::{load_or_create_keypair, Settings, ValidatorNode};

#[derive(Debug, Parser)]
pub struct Opts {
    #[clap(flatten)]
    settings: Settings,
}

pub async fn run(opts: &Opts) -> Result<()> {
    let config = opts.settings.to_config().context("invalid settings")?;
    log::info!(
        "db {} | archive {} | {} peers | window {} blocks",
        config.db_url,
        config.archive.url,
        config.peers.len(),
        config.orchestrator.window_blocks
    );

    let keypair = load_or_create_keypair(config.keypair_path.as_deref())?;
    let node = ValidatorNode::from_config(config, keypair).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down");
        }
        signal.cancel();
    });

    node.run(shutdown).await
}
