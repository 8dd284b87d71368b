//! Error types for the gateway core

use thiserror::Error;

/// Errors that can occur in the gateway core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Protocol error from the ZCL layer
    #[error("Protocol error: {0}")]
    Protocol(#[from] zcl_protocol::ProtocolError),

    /// The radio is not joined to a network
    #[error("Not in network")]
    NotInNetwork,

    /// The outbound task queue is full
    #[error("Task queue full")]
    QueueFull,

    /// A referenced entity does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A value is outside its permitted range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
