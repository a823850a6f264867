use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeFlowError>;

#[derive(Error, Debug)]
pub enum ForgeFlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connector error: {message}")]
    Connector { message: String, retryable: bool },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown {kind} type: {type_name}")]
    UnknownComponent { kind: &'static str, type_name: String },

    #[error("Pipeline {pipeline} failed: {message}")]
    Pipeline { pipeline: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl ForgeFlowError {
    /// Connector failure worth another attempt (timeouts, resets, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Connector {
            message: message.into(),
            retryable: true,
        }
    }

    /// Connector failure that must not be retried (auth, validation, 4xx).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Connector {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Classification consulted by the retry policy
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector { retryable, .. } => *retryable,
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
