use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("postgres error: {0}")]
    Postgres(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("slot error: {0}")]
    Slot(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid lsn: {0}")]
    InvalidLsn(String),
    #[error("watcher failed: {0}")]
    Watcher(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio_postgres::Error> for ReplicationError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            ReplicationError::Postgres(format!(
                "{}: {} ({})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            ))
        } else if err.is_closed() {
            ReplicationError::Connection(err.to_string())
        } else {
            ReplicationError::Postgres(err.to_string())
        }
    }
}

impl ReplicationError {
    /// `SQLSTATE 08xxx` — connection-class failures the caller should
    /// retry against a freshly reopened connection (SPEC_FULL §4.2).
    pub fn is_connection_bad(&self) -> bool {
        matches!(self, ReplicationError::Connection(_))
    }
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
