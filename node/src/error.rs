//! Unified error handling for the node.

use crate::config::ConfigError;
use std::time::Duration;

/// Node error type.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Engine error: {0}")]
    Engine(#[from] infodb_engine::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Node has not been started")]
    NotInitialised,

    #[error("Node is already running")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
