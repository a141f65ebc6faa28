use thiserror::Error;

/// Error taxonomy for the dispatch/message layer. `code()` gives the value
/// that actually crosses the wire in a reply's frame 0.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MsgError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("wrong argument frames for this opcode")]
    WrongArgs,
    #[error("framing not recognized")]
    NotSupported,
    #[error("malformed reply: {0}")]
    ProtocolMalformed(String),
    #[error("handler error: {0}")]
    Handler(String),
}

impl MsgError {
    /// Numeric code carried in frame 0 of a reply.
    pub fn code(&self) -> u32 {
        match self {
            MsgError::UnknownOpcode(_) => 1,
            MsgError::WrongArgs => 2,
            MsgError::NotSupported => 3,
            MsgError::ProtocolMalformed(_) => 4,
            MsgError::Handler(_) => 5,
        }
    }
}

pub type MsgResult<T> = Result<T, MsgError>;
