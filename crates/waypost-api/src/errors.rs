use thiserror::Error;

/// A payload rejected before it reaches the network.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("API request {path} missing parameter {name}")]
    MissingParameter { path: String, name: String },
    #[error("API request {path}, parameter {name} is not {expected}")]
    WrongType {
        path: String,
        name: String,
        expected: &'static str,
    },
    #[error("API request {path}, parameter {name} is not in the proper format")]
    WrongFormat { path: String, name: String },
}

impl Violation {
    pub fn parameter(&self) -> &str {
        match self {
            Self::MissingParameter { name, .. }
            | Self::WrongType { name, .. }
            | Self::WrongFormat { name, .. } => name,
        }
    }
}

/// Error type for everything between a payload and a parsed response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] Violation),
    #[error("Request timed out")]
    Timeout,
    #[error("Error in API: {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("Requested operation cannot be completed since tracking is disabled")]
    TrackingDisabled,
}

impl ApiError {
    /// Numeric status attached to the error, mirroring what the server would report.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Timeout => Some(504),
            Self::Status { status } => Some(*status),
            Self::Transport(_) => Some(0),
            _ => None,
        }
    }

    /// Only failures that never produced a definitive answer are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
