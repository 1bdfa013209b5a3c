use thiserror::Error;

/// Core error type for chatstream.
///
/// These are rejections and transport failures surfaced to callers. Failures
/// that happen *inside* a running stream are recorded on the terminal
/// `StreamSession` instead (see `session::SessionFailure`).
#[derive(Debug, Error)]
pub enum ChatStreamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("message limit is {max} characters, got {actual}")]
    InputTooLong { max: usize, actual: usize },

    #[error("a response is already streaming")]
    Busy,

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("transport unavailable: {endpoint}")]
    Unavailable { endpoint: String },

    #[error("upstream error from {endpoint}: {code} {message}")]
    Upstream {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, ChatStreamError>;
