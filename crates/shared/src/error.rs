use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Rejected user input; the flow state stays where it was.
    Validation,
    /// An action arrived in a step that does not support it.
    InvalidState,
    /// The token service rejected a call or returned a failure result.
    ServiceFailure,
    /// The durable order store failed.
    Storage,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct FlowError {
    pub code: ErrorCode,
    pub message: String,
}

impl FlowError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceFailure, message)
    }

    /// True when the error only rejects input and must not reset the flow.
    pub fn is_input_rejection(&self) -> bool {
        self.code == ErrorCode::Validation
    }
}
