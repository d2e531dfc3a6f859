use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceBridgeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Translation service unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("Translation service error: {0}")]
    UpstreamError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceBridgeError>;
