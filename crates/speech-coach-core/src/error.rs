use thiserror::Error;

/// Failure of a single external AI/voice backend call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} is not configured")]
    NotConfigured { provider: String },

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: &'static str,
    },

    #[error("no provider configured for {capability}")]
    NoRoute { capability: &'static str },

    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned malformed output: {message}")]
    Malformed { provider: String, message: String },

    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("provider gateway has been shut down")]
    ShutDown,
}

impl ProviderError {
    pub fn request(provider: &str, err: impl std::fmt::Display) -> Self {
        Self::Request {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    pub fn malformed(provider: &str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SpeechCoachError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SpeechCoachError>;
