use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification for a failed data-connection operation. Failures travel
/// through the output log as data, so the classification must survive
/// serialization with a stable wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Connect,
    Statement,
    ShapeMismatch,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Connect => "connect",
            FailureKind::Statement => "statement",
            FailureKind::ShapeMismatch => "shape_mismatch",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable descriptor of one execution failure, recorded in
/// `QueryFailure`/`UpdateFailure` outcome records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureInfo {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Error raised by a caller-supplied result handler. Handler errors are
/// caller bugs, not pipeline faults, and propagate out of the reader.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorCode {
    Io,
    Encode,
    MalformedRecord,
    LogAppend,
    LogClosed,
    Execution,
    Handler,
    Dispatcher,
    InvalidConfig,
}

impl RelayErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayErrorCode::Io => "io",
            RelayErrorCode::Encode => "encode",
            RelayErrorCode::MalformedRecord => "malformed_record",
            RelayErrorCode::LogAppend => "log_append",
            RelayErrorCode::LogClosed => "log_closed",
            RelayErrorCode::Execution => "execution",
            RelayErrorCode::Handler => "handler",
            RelayErrorCode::Dispatcher => "dispatcher",
            RelayErrorCode::InvalidConfig => "invalid_config",
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("log append failed: {0}")]
    LogAppend(String),
    #[error("log is closed")]
    LogClosed,
    #[error("execution failed: {0}")]
    Execution(FailureInfo),
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("dispatcher terminated: {0}")]
    Dispatcher(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
}

impl RelayError {
    pub fn code(&self) -> RelayErrorCode {
        match self {
            RelayError::Io(_) => RelayErrorCode::Io,
            RelayError::Encode(_) => RelayErrorCode::Encode,
            RelayError::MalformedRecord(_) => RelayErrorCode::MalformedRecord,
            RelayError::LogAppend(_) => RelayErrorCode::LogAppend,
            RelayError::LogClosed => RelayErrorCode::LogClosed,
            RelayError::Execution(_) => RelayErrorCode::Execution,
            RelayError::Handler(_) => RelayErrorCode::Handler,
            RelayError::Dispatcher(_) => RelayErrorCode::Dispatcher,
            RelayError::InvalidConfig { .. } => RelayErrorCode::InvalidConfig,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
