mod error;
mod migrations;
mod chain_datastore;

pub mod archive;
pub mod ingestor;
pub mod models;

pub use archive::{ArchiveClient, ArchiveConfig, ArchiveError, MemoryArchive, RpcArchiveClient};
pub use chain_datastore::{normalize_database_url, ChainDataStore};
pub use error::Error;
pub use ingestor::{IngestError, IngestReport, Ingestor};

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidData(format!("{} does not fit in a sqlite integer", value)))
}

pub(crate) fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidData(format!("negative value {} in an unsigned column", value)))
}
