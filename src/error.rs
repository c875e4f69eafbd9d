use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("application layer state is not valid for inspection")]
    InvalidAppState,

    #[error("transaction {0} does not support per-transaction detect state")]
    DetectStateUnsupported(u64),

    #[error("failed to attach detect state to transaction {0}")]
    StateAttach(u64),

    #[error("unknown signature index {0}")]
    UnknownSignature(u32),
}

pub type Result<T> = std::result::Result<T, DetectError>;
