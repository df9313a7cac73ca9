use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("postgres error: {0}")]
    Postgres(String),
    #[error("streaming worker panicked: {0}")]
    WorkerPanic(String),
    #[error("streaming worker failed: {0}")]
    WorkerFailed(String),
}

impl From<tokio_postgres::Error> for WatcherError {
    fn from(err: tokio_postgres::Error) -> Self {
        WatcherError::Postgres(err.to_string())
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
