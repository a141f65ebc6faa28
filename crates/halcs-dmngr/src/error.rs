use thiserror::Error;

#[derive(Debug, Error)]
pub enum DmngrError {
    #[error("failed to scan endpoints in {0}: {1}")]
    Discovery(String, String),
    #[error("failed to spawn child: {0}")]
    Spawn(String),
    #[error("no such endpoint registered: {0}")]
    UnknownEndpoint(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type DmngrResult<T> = Result<T, DmngrError>;
