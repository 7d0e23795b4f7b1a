pub mod codec;
pub mod communication;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod peer_book;

pub use codec::{CodecConfig, DecodeMode, ProtocolCodec, PROTOCOL_VERSION, SUPPORTED_VERSIONS};
pub use communication::Communication;
pub use dispatch::{Dispatcher, PeerHandler};
pub use error::{CodecError, TransportError};
pub use messages::{Ack, EvidenceRequest, EvidenceResponse, Heartbeat, Message, MessageKind, ScoreSubmission};
pub use peer_book::{PeerBook, PeerInfo};

/// Path peers accept protocol messages on.
pub const MESSAGE_PATH: &str = "/patrol/v1/message";
pub const HEALTH_PATH: &str = "/patrol/v1/health";
