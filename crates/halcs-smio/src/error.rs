use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmioError {
    #[error("worker not in the expected lifecycle state: {0}")]
    Lifecycle(&'static str),
    #[error(transparent)]
    Llio(#[from] halcs_llio::LlioError),
    #[error(transparent)]
    Msg(#[from] halcs_msg::MsgError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("broker error: {0}")]
    Broker(String),
}

pub type SmioResult<T> = Result<T, SmioError>;
