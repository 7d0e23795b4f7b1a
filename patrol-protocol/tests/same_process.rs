use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use patrol_chain_data::models::{BlockWindow, ResultStatus, Subject, ValidationResult};
use patrol_protocol::communication::SameProcess;
use patrol_protocol::messages::new_message_id;
use patrol_protocol::{
    Ack, Communication, Dispatcher, EvidenceRequest, EvidenceResponse, Heartbeat, PeerBook, PeerHandler,
    ProtocolCodec, ScoreSubmission, TransportError,
};
use patrol_utils::keypair::Keypair;
use serde_json::{json, Map};

struct RecordingPeer {
    id: String,
    submissions: Mutex<Vec<ScoreSubmission>>,
}

impl RecordingPeer {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            submissions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PeerHandler for RecordingPeer {
    fn peer_id(&self) -> &str {
        &self.id
    }

    async fn on_evidence_request(&self, request: EvidenceRequest) -> Result<EvidenceResponse> {
        if request.subject.as_str() == "unknown" {
            return Err(anyhow!("no result for {}", request.subject));
        }
        Ok(EvidenceResponse {
            request_id: request.request_id,
            sender: self.id.clone(),
            subject: request.subject,
            result: None,
            records: vec![],
            extra: Map::new(),
        })
    }

    async fn on_score_submission(&self, submission: ScoreSubmission) -> Result<Ack> {
        let ack = Ack::accept(&submission.submission_id, &self.id);
        self.submissions.lock().unwrap().push(submission);
        Ok(ack)
    }

    async fn on_heartbeat(&self, _heartbeat: Heartbeat) -> Result<()> {
        Ok(())
    }
}

fn network(ids: &[&str]) -> (SameProcess, Vec<Arc<RecordingPeer>>, Vec<Arc<PeerBook>>) {
    let mut peers = Vec::new();
    let mut books = Vec::new();
    let mut dispatchers = Vec::new();
    for id in ids {
        let peer = RecordingPeer::new(id);
        let book = Arc::new(PeerBook::new());
        dispatchers.push(Arc::new(Dispatcher::new(ProtocolCodec::default(), peer.clone(), book.clone())));
        peers.push(peer);
        books.push(book);
    }
    (SameProcess::from_dispatchers(dispatchers), peers, books)
}

fn signed_submission(keypair: &Keypair) -> ScoreSubmission {
    let result = ValidationResult::new(
        Subject::new("acct"),
        BlockWindow::new(1, 5).unwrap(),
        10,
        0.5,
        ResultStatus::NoData,
        vec![],
    )
    .unwrap();
    ScoreSubmission::new(&keypair.as_public_address(), result).sign(keypair).unwrap()
}

#[tokio::test]
async fn test_submission_is_acknowledged() -> Result<()> {
    let (comm, peers, _) = network(&["node-b"]);
    let keypair = Keypair::from_seed([1u8; 32]);
    let submission = signed_submission(&keypair);

    let ack = comm.submit_score("node-b", &submission).await?;
    assert!(ack.accepted);
    assert_eq!(ack.message_id, submission.submission_id);
    assert_eq!(peers[0].submissions.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_forged_submission_is_rejected_before_the_handler() -> Result<()> {
    let (comm, peers, _) = network(&["node-b"]);
    let keypair = Keypair::from_seed([1u8; 32]);
    let mut submission = signed_submission(&keypair);
    submission.result.score = 0.0;

    let ack = comm.submit_score("node-b", &submission).await?;
    assert!(!ack.accepted);
    assert!(peers[0].submissions.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_evidence_request_and_rejection() -> Result<()> {
    let (comm, _, _) = network(&["node-b"]);
    let mut request = EvidenceRequest {
        request_id: new_message_id(),
        sender: "node-a".into(),
        subject: Subject::new("acct"),
        window: BlockWindow::new(1, 5)?,
        extra: Map::new(),
    };
    let response = comm.request_evidence("node-b", &request).await?;
    assert_eq!(response.request_id, request.request_id);

    request.subject = Subject::new("unknown");
    assert!(matches!(
        comm.request_evidence("node-b", &request).await,
        Err(TransportError::Rejected { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_offline_and_unknown_peers() -> Result<()> {
    let (comm, _, _) = network(&["node-b", "node-c"]);
    comm.set_offline("node-c", true);
    let heartbeat = Heartbeat::new("node-a", Some(3));

    assert!(comm.send_heartbeat("node-b", &heartbeat).await?.accepted);
    let err = comm.send_heartbeat("node-c", &heartbeat).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        comm.send_heartbeat("node-z", &heartbeat).await,
        Err(TransportError::UnknownPeer(_))
    ));

    comm.set_offline("node-c", false);
    assert!(comm.send_heartbeat("node-c", &heartbeat).await?.accepted);
    Ok(())
}

#[tokio::test]
async fn test_slow_peer_times_out() -> Result<()> {
    let (comm, _, _) = network(&["node-b"]);
    let comm = comm.with_timeout(Duration::from_millis(50));
    comm.set_delay("node-b", Duration::from_millis(500));
    let err = comm
        .send_heartbeat("node-b", &Heartbeat::new("node-a", None))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_version_marks_sender_stale() -> Result<()> {
    let (_, _, books) = network(&["node-b"]);
    let handler = RecordingPeer::new("node-b");
    let dispatcher = Dispatcher::new(ProtocolCodec::default(), handler, books[0].clone());

    let future_message = serde_json::to_vec(&json!({
        "version": 2,
        "type": "heartbeat",
        "body": {"sender": "node-a", "sent_at": 1}
    }))?;
    assert!(dispatcher.dispatch(&future_message).await.is_err());
    assert!(books[0].is_stale("node-a"));

    // a later heartbeat in a supported version clears the mark
    let codec = ProtocolCodec::default();
    let hb = codec.encode(&patrol_protocol::Message::Heartbeat(Heartbeat::new("node-a", Some(9))))?;
    dispatcher.dispatch(&hb).await?;
    assert!(!books[0].is_stale("node-a"));
    assert_eq!(books[0].get("node-a").unwrap().latest_block, Some(9));
    Ok(())
}
