use std::fmt;
use thiserror::Error;
use waypost_api::ApiError;
use waypost_store::StoreError;

/// Why the last initialization attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitFailureCode {
    FingerprintFetchFailed,
    SessionOpenFailed,
    Unknown,
}

impl InitFailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FingerprintFetchFailed => "fingerprint-fetch-failed",
            Self::SessionOpenFailed => "session-open-failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InitFailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for SDK operations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SdkError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("SDK not initialized")]
    NotInitialized,
    #[error("initialization in progress")]
    InitPending,
    #[error("initialization failed ({code}): {detail}")]
    InitFailed {
        code: InitFailureCode,
        detail: String,
    },
    #[error("call queue closed")]
    QueueClosed,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("no tokio runtime available to run the call queue")]
    NoRuntime,
}

impl From<StoreError> for SdkError {
    fn from(error: StoreError) -> Self {
        Self::Storage(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_failed_message_embeds_code_and_detail() {
        let error = SdkError::InitFailed {
            code: InitFailureCode::FingerprintFetchFailed,
            detail: "Error in API: 500".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "initialization failed (fingerprint-fetch-failed): Error in API: 500"
        );
    }

    #[test]
    fn api_errors_pass_through_transparently() {
        let error = SdkError::from(ApiError::Timeout);
        assert_eq!(error.to_string(), "Request timed out");
    }
}
