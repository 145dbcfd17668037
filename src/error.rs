//! Error types for Proctor Flux

use thiserror::Error;

/// Errors that can occur while scoring, recording, or summarizing
#[derive(Debug, Error)]
pub enum ProctorError {
    #[error("Invalid scorer configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Result sink error: {0}")]
    Sink(String),

    #[error("No active session for student {roll_no} in session {session_id}")]
    SessionNotActive { session_id: String, roll_no: String },

    #[error("Student {roll_no} already has an active session in {session_id}")]
    SessionAlreadyActive { session_id: String, roll_no: String },
}
