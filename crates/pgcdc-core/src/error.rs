use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("watcher failed: {0}")]
    Watcher(String),
    #[error("{0}")]
    Other(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
