use thiserror::Error;

use crate::messages::MessageKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion { version: u64, sender: Option<String> },

    #[error("unknown message type {0}")]
    UnknownType(String),

    #[error("{kind} message carries unknown fields: {}", .fields.join(", "))]
    UnknownFields { kind: MessageKind, fields: Vec<String> },

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("peer {peer} did not answer in time")]
    Timeout { peer: String },

    #[error("peer {peer} rejected the message: {reason}")]
    Rejected { peer: String, reason: String },

    #[error("unknown peer {0}")]
    UnknownPeer(String),

    #[error("peer {peer} answered with an unexpected {kind} message")]
    UnexpectedReply { peer: String, kind: MessageKind },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TransportError {
    /// Worth retransmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unreachable { .. } | TransportError::Timeout { .. })
    }
}
