use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document parse error: {0}")]
    Extraction(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

/// Provider-facing taxonomy for delegated question generation. Transient
/// variants are retried with backoff; `InvalidResponse` covers payloads that
/// fail parse-then-validate.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_) | Self::Http(_))
    }
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("concurrent update to recommendation {0}")]
    Conflict(String),

    #[error("recommendation not found: {0}")]
    NotFound(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
