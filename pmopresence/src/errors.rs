use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("All {attempts} artwork upload providers failed")]
    UploadExhausted { attempts: usize },

    #[error("{provider} rejected the upload: {reason}")]
    UploadRejected { provider: String, reason: String },

    #[error("Artwork source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid feed message: {0}")]
    Feed(String),

    #[error(transparent)]
    Ipc(#[from] pmodiscord::IpcError),

    #[error(transparent)]
    Cache(#[from] pmocache::CacheError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PresenceError {
    pub fn rejected(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UploadRejected {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}
