use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use patrol_chain_data::models::{BlockWindow, Subject};
use patrol_protocol::communication::{parse_peer, HttpCommunication};
use patrol_protocol::messages::new_message_id;
use patrol_protocol::{Communication, DecodeMode, EvidenceRequest, ProtocolCodec};
use patrol_utils::keypair::Keypair;
use patrol_validation::verify_evidence;

/// Asks one peer for its latest judgment of an account and prints it.
#[derive(Debug, Parser)]
pub struct Opts {
    /// `<address>@<url>` or a bare url.
    #[clap(long)]
    peer: String,

    #[clap(long)]
    subject: String,

    #[clap(long)]
    from_block: u64,

    #[clap(long)]
    to_block: u64,

    #[clap(long, env = "PROTOCOL_MODE", default_value = "lenient")]
    protocol_mode: DecodeMode,

    #[clap(long, default_value = "10")]
    timeout_seconds: u64,
}

pub async fn run(opts: &Opts) -> Result<()> {
    let window = BlockWindow::new(opts.from_block, opts.to_block)?;
    let subject = Subject::new(opts.subject.trim());
    let (peer, url) = parse_peer(&opts.peer);
    let codec = ProtocolCodec::new(patrol_protocol::CodecConfig {
        mode: opts.protocol_mode,
        ..Default::default()
    });
    let communication = HttpCommunication::new(codec, [(peer.clone(), url)], Duration::from_secs(opts.timeout_seconds))?;

    let request = EvidenceRequest {
        request_id: new_message_id(),
        sender: Keypair::generate().as_public_address(),
        subject: subject.clone(),
        window,
        extra: Default::default(),
    };
    let response = communication
        .request_evidence(&peer, &request)
        .await
        .with_context(|| format!("evidence request to {} failed", peer))?;
    verify_evidence(&peer, &subject, &response)?;

    match &response.result {
        Some(result) => log::info!(
            "{} scores {} at {:.3} ({}), {} records supplied",
            peer,
            subject,
            result.score,
            result.status,
            response.records.len()
        ),
        None => log::info!("{} holds no result for {}", peer, subject),
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
