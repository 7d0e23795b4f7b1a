use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("out of order result for {subject}: evaluated_at {attempted} is older than latest {latest}")]
    OutOfOrder {
        subject: String,
        latest: i64,
        attempted: i64,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl Error {
    /// Transient store failures; the caller may retry after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_))
    }
}

// SQLITE_BUSY, SQLITE_LOCKED, SQLITE_IOERR, SQLITE_CANTOPEN
const UNAVAILABLE_SQLITE_CODES: &[&str] = &["5", "6", "10", "14"];

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => Error::StorageUnavailable(e.to_string()),
            sqlx::Error::PoolTimedOut => Error::StorageUnavailable("connection pool timed out".into()),
            sqlx::Error::PoolClosed => Error::StorageUnavailable("connection pool closed".into()),
            sqlx::Error::WorkerCrashed => Error::StorageUnavailable("sqlite worker crashed".into()),
            sqlx::Error::Database(db_err) => {
                let busy = db_err
                    .code()
                    .map(|code| UNAVAILABLE_SQLITE_CODES.contains(&code.as_ref()))
                    .unwrap_or(false)
                    || db_err.message().contains("database is locked");
                if busy {
                    Error::StorageUnavailable(db_err.message().to_string())
                } else {
                    Error::Database(db_err.message().to_string())
                }
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Error::InvalidData(err.to_string()),
            other => Error::Database(other.to_string()),
        }
    }
}
