pub mod http;
pub mod same_process;

pub use http::{parse_peer, HttpCommunication};
pub use same_process::SameProcess;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::messages::{Ack, EvidenceRequest, EvidenceResponse, Heartbeat, Message};
use crate::ScoreSubmission;

/// Request/reply transport between validators.
#[async_trait]
pub trait Communication: Send + Sync {
    /// Peer ids this transport can reach, sorted.
    fn peers(&self) -> Vec<String>;

    /// Sends `message` to `to` and waits for its reply.
    async fn exchange(&self, to: &str, message: &Message) -> Result<Message, TransportError>;

    async fn submit_score(&self, to: &str, submission: &ScoreSubmission) -> Result<Ack, TransportError> {
        let reply = self.exchange(to, &Message::ScoreSubmission(submission.clone())).await?;
        expect_ack(to, reply)
    }

    async fn request_evidence(&self, to: &str, request: &EvidenceRequest) -> Result<EvidenceResponse, TransportError> {
        match self.exchange(to, &Message::EvidenceRequest(request.clone())).await? {
            Message::EvidenceResponse(response) => Ok(response),
            Message::Ack(ack) if !ack.accepted => Err(TransportError::Rejected {
                peer: to.to_string(),
                reason: ack.reason.unwrap_or_default(),
            }),
            other => Err(TransportError::UnexpectedReply {
                peer: to.to_string(),
                kind: other.kind(),
            }),
        }
    }

    async fn send_heartbeat(&self, to: &str, heartbeat: &Heartbeat) -> Result<Ack, TransportError> {
        let reply = self.exchange(to, &Message::Heartbeat(heartbeat.clone())).await?;
        expect_ack(to, reply)
    }
}

fn expect_ack(peer: &str, reply: Message) -> Result<Ack, TransportError> {
    match reply {
        Message::Ack(ack) => Ok(ack),
        other => Err(TransportError::UnexpectedReply {
            peer: peer.to_string(),
            kind: other.kind(),
        }),
    }
}
