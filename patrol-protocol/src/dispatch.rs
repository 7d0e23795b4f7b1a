use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::codec::ProtocolCodec;
use crate::error::CodecError;
use crate::messages::{Ack, EvidenceRequest, EvidenceResponse, Heartbeat, Message, ScoreSubmission};
use crate::peer_book::PeerBook;

/// Application side of inbound protocol traffic.
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Address this node signs and answers as.
    fn peer_id(&self) -> &str;
    async fn on_evidence_request(&self, request: EvidenceRequest) -> Result<EvidenceResponse>;
    /// Called only for submissions whose signature and digest verified.
    async fn on_score_submission(&self, submission: ScoreSubmission) -> Result<Ack>;
    async fn on_heartbeat(&self, heartbeat: Heartbeat) -> Result<()>;
}

/// Decodes inbound bytes, routes them to a [`PeerHandler`] and encodes the reply.
pub struct Dispatcher {
    codec: ProtocolCodec,
    handler: Arc<dyn PeerHandler>,
    peer_book: Arc<PeerBook>,
}

impl Dispatcher {
    pub fn new(codec: ProtocolCodec, handler: Arc<dyn PeerHandler>, peer_book: Arc<PeerBook>) -> Self {
        Self {
            codec,
            handler,
            peer_book,
        }
    }

    pub fn peer_id(&self) -> &str {
        self.handler.peer_id()
    }

    pub fn peer_book(&self) -> &Arc<PeerBook> {
        &self.peer_book
    }

    /// Returns the encoded reply. Undecodable input yields the codec error and
    /// no reply; a message in an unsupported version also marks its sender stale.
    pub async fn dispatch(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                if let CodecError::UnsupportedVersion { sender, .. } = &err {
                    let sender = sender.as_deref().unwrap_or("unknown");
                    log::warn!("dropping message from {}: {}", sender, err);
                    if sender != "unknown" {
                        self.peer_book.mark_stale(sender, &err.to_string());
                    }
                } else {
                    log::warn!("dropping undecodable message: {}", err);
                }
                return Err(err);
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        self.peer_book.touch(message.sender(), now);
        let reply = self.route(message, now).await;
        self.codec.encode(&reply)
    }

    async fn route(&self, message: Message, now: i64) -> Message {
        let me = self.handler.peer_id().to_string();
        let message_id = message.message_id().to_string();
        match message {
            Message::EvidenceRequest(request) => match self.handler.on_evidence_request(request).await {
                Ok(response) => Message::EvidenceResponse(response),
                Err(err) => {
                    log::warn!("evidence request {} failed: {:#}", message_id, err);
                    Message::Ack(Ack::reject(&message_id, &me, err.to_string()))
                }
            },
            Message::ScoreSubmission(submission) => {
                match submission.verify() {
                    Ok(true) => {}
                    Ok(false) => {
                        log::warn!("rejecting submission {} from {}: bad signature", message_id, submission.sender);
                        return Message::Ack(Ack::reject(&message_id, &me, "signature verification failed"));
                    }
                    Err(err) => {
                        return Message::Ack(Ack::reject(&message_id, &me, format!("unverifiable submission: {}", err)));
                    }
                }
                match self.handler.on_score_submission(submission).await {
                    Ok(ack) => Message::Ack(ack),
                    Err(err) => Message::Ack(Ack::reject(&message_id, &me, err.to_string())),
                }
            }
            Message::Heartbeat(heartbeat) => {
                self.peer_book.record_heartbeat(&heartbeat.sender, heartbeat.latest_block, now);
                match self.handler.on_heartbeat(heartbeat).await {
                    Ok(()) => Message::Ack(Ack::accept(&message_id, &me)),
                    Err(err) => Message::Ack(Ack::reject(&message_id, &me, err.to_string())),
                }
            }
            other @ (Message::EvidenceResponse(_) | Message::Ack(_)) => Message::Ack(Ack::reject(
                &message_id,
                &me,
                format!("unsolicited {} message", other.kind()),
            )),
        }
    }
}
