use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u64),

    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0} values have no wire representation")]
    Unrepresentable(&'static str),

    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },
}

impl CodecError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CodecError::Malformed(msg.into())
    }

    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        CodecError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
