use std::fmt;

use thiserror::Error;

use patrol_chain_data::models::RecordKey;
use patrol_chain_data::{ArchiveError, IngestError};
use patrol_protocol::TransportError;

use crate::task::TaskState;

/// Coarse classification used for retry decisions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UpstreamUnavailable,
    PartialRange,
    MalformedResponse,
    StorageUnavailable,
    OutOfOrder,
    InvalidData,
    Database,
    MalformedRecord,
    CheckDependencyUnavailable,
    Transport,
    Unacknowledged,
    InvalidEvidence,
    Cancelled,
    IllegalTransition,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::PartialRange => "partial_range",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::OutOfOrder => "out_of_order",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::Database => "database",
            ErrorKind::MalformedRecord => "malformed_record",
            ErrorKind::CheckDependencyUnavailable => "check_dependency_unavailable",
            ErrorKind::Transport => "transport",
            ErrorKind::Unacknowledged => "unacknowledged",
            ErrorKind::InvalidEvidence => "invalid_evidence",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::IllegalTransition => "illegal_transition",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UpstreamUnavailable | ErrorKind::PartialRange | ErrorKind::StorageUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] patrol_chain_data::Error),

    #[error("malformed record {key}: {reason}")]
    MalformedRecord { key: RecordKey, reason: String },

    #[error("check dependency unavailable: {0}")]
    CheckDependencyUnavailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no peer acknowledged submission: {0}")]
    Unacknowledged(String),

    #[error("invalid evidence: {0}")]
    InvalidEvidence(String),

    #[error("task cancelled: {0}")]
    Cancelled(String),

    #[error("illegal task transition from {from} to {to}")]
    IllegalTransition { from: TaskState, to: TaskState },
}

impl From<IngestError> for ValidationError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Archive(e) => ValidationError::Archive(e),
            IngestError::Store(e) => ValidationError::Store(e),
        }
    }
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::Archive(ArchiveError::UpstreamUnavailable(_)) => ErrorKind::UpstreamUnavailable,
            ValidationError::Archive(ArchiveError::PartialRange { .. }) => ErrorKind::PartialRange,
            ValidationError::Archive(_) => ErrorKind::MalformedResponse,
            ValidationError::Store(patrol_chain_data::Error::StorageUnavailable(_)) => ErrorKind::StorageUnavailable,
            ValidationError::Store(patrol_chain_data::Error::OutOfOrder { .. }) => ErrorKind::OutOfOrder,
            ValidationError::Store(patrol_chain_data::Error::Database(_)) => ErrorKind::Database,
            ValidationError::Store(_) => ErrorKind::InvalidData,
            ValidationError::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            ValidationError::CheckDependencyUnavailable(_) => ErrorKind::CheckDependencyUnavailable,
            ValidationError::Transport(_) => ErrorKind::Transport,
            ValidationError::Unacknowledged(_) => ErrorKind::Unacknowledged,
            ValidationError::InvalidEvidence(_) => ErrorKind::InvalidEvidence,
            ValidationError::Cancelled(_) => ErrorKind::Cancelled,
            ValidationError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
