use thiserror::Error;

/// Error taxonomy for the low-level I/O layer.
///
/// These are *kinds*, not wire codes; `halcs-msg` maps each variant to the
/// numeric code that actually crosses the wire in a reply's frame 0.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlioError {
    #[error("out of memory")]
    Allocation,
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("I/O attempted on a closed endpoint")]
    ClosedEndpoint,
    #[error("unrecoverable hardware timeout after {tries} retries")]
    TimeoutUnrecoverable { tries: u32 },
    #[error("operation not supported by this backend")]
    Unsupported,
    #[error("backend I/O failure: {0}")]
    Backend(String),
}

pub type LlioResult<T> = Result<T, LlioError>;
