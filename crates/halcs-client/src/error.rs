use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("zmq I/O error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server returned error code {0}")]
    Server(u32),
    #[error("deadline elapsed before the operation completed")]
    Timeout,
    #[error("cancellation flag observed")]
    Interrupted,
}

pub type ClientResult<T> = Result<T, ClientError>;
