use std::fmt;

use thiserror::Error;

/// Failure classes of the chat-completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    NotConfigured,
    Unauthorized,
    RateLimited,
    Timeout,
    Api,
    Network,
    InvalidResponse,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotConfigured => "not configured",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate limited",
            Self::Timeout => "timeout",
            Self::Api => "api error",
            Self::Network => "network error",
            Self::InvalidResponse => "invalid response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("LLM provider {kind}: {message}")]
    Llm { kind: LlmErrorKind, message: String },

    #[error("Vector index failed: {0}")]
    Index(String),

    #[error("Document store failed: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn llm(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::Llm { kind, message: message.into() }
    }

    /// True for failures caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
