use thiserror::Error;

/// Entropy decoding error types
///
/// Every variant is fatal for the section being decoded; callers must discard
/// whatever was produced before the error.
#[derive(Error, Debug)]
pub enum JxlError {
    #[error("Malformed distribution: {0}")]
    MalformedDistribution(String),

    #[error("Malformed cluster map: {0}")]
    MalformedClusterMap(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(
        "Bitstream exhausted at bit {position}: requested {requested} bits, {available} available"
    )]
    BitstreamExhausted {
        position: usize,
        requested: usize,
        available: usize,
    },
}

pub type JxlResult<T> = Result<T, JxlError>;
