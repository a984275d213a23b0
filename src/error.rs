//! Error types for the live synchronization engine

use thiserror::Error;

/// Synchronization engine errors
///
/// Errors are `Clone` because a terminal failure is stored on a coordinator's
/// replay-latest feed and handed to every observer that joins afterwards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Invalid request format: {0}")]
    InvalidRequestFormat(String),

    #[error("Resource unavailable or deleted")]
    ResourceUnavailableOrDeleted,

    #[error("Subscribe handshake failed")]
    OnSubscribe,

    #[error("No response from socket on subscribed content")]
    NoResponseFromSocketOnContent,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("User session not found")]
    UserSessionNotFound,

    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidRequestFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
