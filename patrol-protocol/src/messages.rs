use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use patrol_chain_data::models::{BlockWindow, ChainRecord, Subject, ValidationResult};
use patrol_utils::keypair::Keypair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    EvidenceRequest,
    EvidenceResponse,
    ScoreSubmission,
    Heartbeat,
    Ack,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::EvidenceRequest,
        MessageKind::EvidenceResponse,
        MessageKind::ScoreSubmission,
        MessageKind::Heartbeat,
        MessageKind::Ack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::EvidenceRequest => "evidence_request",
            MessageKind::EvidenceResponse => "evidence_response",
            MessageKind::ScoreSubmission => "score_submission",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Ack => "ack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Asks a peer for its latest judgment of `subject` and the records behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub request_id: String,
    pub sender: String,
    pub subject: Subject,
    pub window: BlockWindow,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceResponse {
    pub request_id: String,
    pub sender: String,
    pub subject: Subject,
    #[serde(default)]
    pub result: Option<ValidationResult>,
    /// The records `result` cites.
    #[serde(default)]
    pub records: Vec<ChainRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub submission_id: String,
    /// Base58 address of the submitting validator; signatures verify against it.
    pub sender: String,
    pub result: ValidationResult,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScoreSubmission {
    pub fn new(sender: &str, result: ValidationResult) -> Self {
        Self {
            submission_id: new_message_id(),
            sender: sender.to_string(),
            result,
            signature: None,
            extra: Map::new(),
        }
    }

    fn signable(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("signature");
        }
        Ok(value)
    }

    pub fn sign(mut self, keypair: &Keypair) -> Result<Self> {
        if keypair.as_public_address() != self.sender {
            return Err(anyhow!("keypair {} cannot sign for {}", keypair.as_public_address(), self.sender));
        }
        self.signature = Some(keypair.sign_json(&self.signable()?)?);
        Ok(self)
    }

    /// Checks the signature against `sender` and the evidence digest against the result.
    pub fn verify(&self) -> Result<bool> {
        let Some(signature) = &self.signature else {
            return Ok(false);
        };
        let signer = Keypair::from_public_address(&self.sender)?;
        Ok(signer.verify_json(signature, &self.signable()?)? && self.result.verify_digest())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sender: String,
    pub sent_at: i64,
    #[serde(default)]
    pub latest_block: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Heartbeat {
    pub fn new(sender: &str, latest_block: Option<u64>) -> Self {
        Self {
            sender: sender.to_string(),
            sent_at: chrono::Utc::now().timestamp_millis(),
            latest_block,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Id of the message acknowledged, empty for heartbeats.
    pub message_id: String,
    pub sender: String,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ack {
    pub fn accept(message_id: &str, sender: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            sender: sender.to_string(),
            accepted: true,
            reason: None,
            extra: Map::new(),
        }
    }

    pub fn reject(message_id: &str, sender: &str, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            ..Self::accept(message_id, sender)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    EvidenceRequest(EvidenceRequest),
    EvidenceResponse(EvidenceResponse),
    ScoreSubmission(ScoreSubmission),
    Heartbeat(Heartbeat),
    Ack(Ack),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::EvidenceRequest(_) => MessageKind::EvidenceRequest,
            Message::EvidenceResponse(_) => MessageKind::EvidenceResponse,
            Message::ScoreSubmission(_) => MessageKind::ScoreSubmission,
            Message::Heartbeat(_) => MessageKind::Heartbeat,
            Message::Ack(_) => MessageKind::Ack,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Message::EvidenceRequest(m) => &m.sender,
            Message::EvidenceResponse(m) => &m.sender,
            Message::ScoreSubmission(m) => &m.sender,
            Message::Heartbeat(m) => &m.sender,
            Message::Ack(m) => &m.sender,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Message::EvidenceRequest(m) => &m.request_id,
            Message::EvidenceResponse(m) => &m.request_id,
            Message::ScoreSubmission(m) => &m.submission_id,
            Message::Heartbeat(_) => "",
            Message::Ack(m) => &m.message_id,
        }
    }

    /// Body fields this version does not know about.
    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            Message::EvidenceRequest(m) => &m.extra,
            Message::EvidenceResponse(m) => &m.extra,
            Message::ScoreSubmission(m) => &m.extra,
            Message::Heartbeat(m) => &m.extra,
            Message::Ack(m) => &m.extra,
        }
    }

    pub(crate) fn body(&self) -> serde_json::Result<Value> {
        match self {
            Message::EvidenceRequest(m) => serde_json::to_value(m),
            Message::EvidenceResponse(m) => serde_json::to_value(m),
            Message::ScoreSubmission(m) => serde_json::to_value(m),
            Message::Heartbeat(m) => serde_json::to_value(m),
            Message::Ack(m) => serde_json::to_value(m),
        }
    }

    pub(crate) fn from_body(kind: MessageKind, body: &Value) -> serde_json::Result<Self> {
        Ok(match kind {
            MessageKind::EvidenceRequest => Message::EvidenceRequest(Deserialize::deserialize(body)?),
            MessageKind::EvidenceResponse => Message::EvidenceResponse(Deserialize::deserialize(body)?),
            MessageKind::ScoreSubmission => Message::ScoreSubmission(Deserialize::deserialize(body)?),
            MessageKind::Heartbeat => Message::Heartbeat(Deserialize::deserialize(body)?),
            MessageKind::Ack => Message::Ack(Deserialize::deserialize(body)?),
        })
    }
}
