use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request for {symbol} timed out after {after_ms}ms")]
    Timeout { symbol: String, after_ms: u64 },
    #[error("invalid data for {symbol}: {reason}")]
    DataInvalid { symbol: String, reason: String },
    #[error("json decode error: {0}")]
    Decode(#[from] simd_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by retry and fallback decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    DataInvalid,
    Usage,
}

impl AppError {
    pub fn data_invalid(symbol: &str, reason: impl Into<String>) -> Self {
        Self::DataInvalid {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::Io(_) => ErrorKind::Transport,
            Self::DataInvalid { .. } | Self::Decode(_) => ErrorKind::DataInvalid,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::Usage,
        }
    }

    /// Upstream failures worth another attempt. Usage errors never are.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Usage)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
