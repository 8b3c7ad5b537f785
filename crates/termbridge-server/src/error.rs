//! Error types for the session bridge

use thiserror::Error;

/// Main error type for the gateway and registry
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} has exited with code {code}")]
    SessionExited { id: String, code: i32 },

    #[error("Not attached to session {0}")]
    NotAttached(String),

    #[error("Failed to spawn shell for session {id}: {message}")]
    Spawn { id: String, message: String },

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Input queue full for session {0}, input dropped")]
    InputBackpressure(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl BridgeError {
    /// Soft errors are reported to the client and never end the connection.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            BridgeError::SessionNotFound(_)
                | BridgeError::SessionExited { .. }
                | BridgeError::NotAttached(_)
                | BridgeError::InputBackpressure(_)
                | BridgeError::Pty(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
