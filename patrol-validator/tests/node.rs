use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use patrol_chain_data::models::{ResultStatus, Subject};
use patrol_chain_data::{ArchiveClient, ChainDataStore};
use patrol_devnet::{Devnet, FINALIZED_HEIGHT, MALLORY, MULE};
use patrol_protocol::communication::HttpCommunication;
use patrol_protocol::messages::new_message_id;
use patrol_protocol::{Communication, EvidenceRequest, Heartbeat, Message, ProtocolCodec};
use patrol_validation::verify_evidence;
use patrol_validator::server::routes;
use patrol_validator::{Settings, ValidatorConfig, ValidatorNode};

fn config(args: &[&str]) -> Result<ValidatorConfig> {
    let base = ["patrol-validator", "--window-blocks", "100", "--denylist", MALLORY];
    Settings::try_parse_from(base.iter().chain(args.iter()).copied())?.to_config()
}

async fn node(index: usize, config: ValidatorConfig) -> Result<ValidatorNode> {
    let archive: Arc<dyn ArchiveClient> = Arc::new(Devnet::new().archive());
    let store = Arc::new(ChainDataStore::create_in_memory().await?);
    ValidatorNode::with_archive(config, Devnet::new().get_keypair_by_index(index)?, store, archive)
}

fn serve(node: &ValidatorNode) -> SocketAddr {
    let (addr, server) = warp::serve(routes(node.dispatcher.clone(), node.store.clone(), 1024 * 1024))
        .bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

#[tokio::test]
async fn test_health_reports_identity_and_tip() -> Result<()> {
    let b = node(1, config(&[])?).await?;
    let addr = serve(&b);

    let health: Value = reqwest::get(format!("http://{}/patrol/v1/health", addr)).await?.json().await?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["id"], b.id.as_str());
    assert_eq!(health["protocol_version"], 1);
    assert!(health["latest_block"].is_null());
    Ok(())
}

#[tokio::test]
async fn test_message_endpoint_answers_codec_bytes() -> Result<()> {
    let b = node(1, config(&[])?).await?;
    let addr = serve(&b);
    let url = format!("http://{}/patrol/v1/message", addr);
    let codec = ProtocolCodec::default();
    let client = reqwest::Client::new();

    let heartbeat = codec.encode(&Message::Heartbeat(Heartbeat::new("5Elsewhere", Some(7))))?;
    let response = client.post(&url).body(heartbeat).send().await?;
    assert_eq!(response.status(), 200);
    match codec.decode(&response.bytes().await?)? {
        Message::Ack(ack) => assert!(ack.accepted),
        other => panic!("expected an ack, got {}", other.kind()),
    }
    assert_eq!(b.dispatcher.peer_book().get("5Elsewhere").and_then(|p| p.latest_block), Some(7));

    let response = client.post(&url).body("not an envelope").send().await?;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_tick_submits_scores_over_http() -> Result<()> {
    let b = node(1, config(&[])?).await?;
    let addr = serve(&b);

    let peer = format!("{}@http://{}", b.id, addr);
    let a = node(0, config(&["--peers", &peer, "--subjects", MULE])?).await?;
    let report = a.orchestrator.tick().await?;
    assert_eq!(report.collected_blocks, FINALIZED_HEIGHT as usize);
    assert_eq!(report.failed, 0);
    assert_eq!(report.completed, report.subjects);

    let scores = b.peer.peer_scores(&Subject::new(MULE));
    let held = scores.get(&a.id).expect("b holds a's score");
    assert_eq!(held.status, ResultStatus::Flagged);
    assert_eq!(b.dispatcher.peer_book().get(&a.id).and_then(|p| p.latest_block), Some(FINALIZED_HEIGHT));

    // the evidence behind it is served from a's own endpoint
    let a_addr = serve(&a);
    let communication = HttpCommunication::new(
        ProtocolCodec::default(),
        [(a.id.clone(), format!("http://{}", a_addr))],
        Duration::from_secs(5),
    )?;
    let request = EvidenceRequest {
        request_id: new_message_id(),
        sender: b.id.clone(),
        subject: Subject::new(MULE),
        window: held.window,
        extra: Default::default(),
    };
    let response = communication.request_evidence(&a.id, &request).await?;
    verify_evidence(&a.id, &Subject::new(MULE), &response)?;
    assert_eq!(response.result.as_ref().map(|r| r.score), Some(held.score));
    assert_eq!(response.records.len(), held.evidence_keys().len());
    Ok(())
}

#[tokio::test]
async fn test_on_disk_store_under_db_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_dir = dir.path().join("nested").join("data");
    let config = config(&["--db-dir", db_dir.to_str().unwrap_or_default()])?;
    let keypair = Devnet::new().get_keypair_by_index(2)?;

    let node = ValidatorNode::from_config(config, keypair).await?;
    assert!(db_dir.join("patrol.db").exists());
    assert!(node.store.highest_ingested_block().await?.is_none());
    node.store.close().await;
    Ok(())
}
