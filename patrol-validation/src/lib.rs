pub mod aggregator;
pub mod checks;
pub mod config;
pub mod denylist;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod peer;
pub mod task;

pub use config::{EngineConfig, OrchestratorConfig};
pub use denylist::{DenylistProvider, HttpDenylist, StaticDenylist};
pub use engine::ValidationEngine;
pub use error::{ErrorKind, ValidationError};
pub use orchestrator::{OrchestratorProps, TickReport, ValidatorOrchestrator};
pub use peer::{verify_evidence, ValidatorPeer};
pub use task::{TaskRecord, TaskState, ValidationTask};

pub type Result<T> = std::result::Result<T, ValidationError>;
