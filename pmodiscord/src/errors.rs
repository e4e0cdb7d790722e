use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("No Discord IPC endpoint accepted a connection ({tried} tried). Is Discord running?")]
    NoEndpointFound { tried: usize },

    #[error("Discord IPC handshake failed: {0}")]
    HandshakeRejected(String),

    #[error("Failed to write to Discord IPC socket: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("Not connected to Discord")]
    NotConnected,

    #[error("IPC protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IpcError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::HandshakeRejected(msg.into())
    }
}
