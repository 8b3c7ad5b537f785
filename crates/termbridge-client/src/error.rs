//! Error types for the client side of the bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid ready pattern: {0}")]
    ReadyPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
