pub mod account;
pub mod chain_record;
pub mod missed_block;
pub mod subject;
pub mod validation_result;

pub use account::{AccountSnapshot, StakePosition};
pub use chain_record::{ChainRecord, RecordKey, RecordKind};
pub use missed_block::{MissedBlock, MissedBlockReason};
pub use subject::{BlockWindow, Subject};
pub use validation_result::{CheckKind, Evidence, ResultStatus, ValidationResult};
