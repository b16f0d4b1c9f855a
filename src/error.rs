/// Errors produced while moving bytes to the upload endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Upload failed: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload worker is not running")]
    WorkerStopped,

    #[error("upload task panicked")]
    Panicked,
}

impl TransferError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Status { status, .. } => *status >= 500 || *status == 429,
            TransferError::Request(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransferError::InvalidResponse(err.to_string())
        } else {
            TransferError::Request(err.to_string())
        }
    }
}

/// Errors in a merged upload configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("upload URL is required")]
    MissingUploadUrl,

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("worker concurrency must be greater than zero")]
    ZeroConcurrency,

    #[error("invalid header `{0}`, expected NAME=VALUE")]
    InvalidHeader(String),
}
