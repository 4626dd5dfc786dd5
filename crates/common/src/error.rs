use thiserror::Error;
use serde::Serialize;

/// Common error type for ChatRelay with clear taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// Client request errors (4xx)
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Remote completion service answered with a non-success status.
    /// The body is forwarded to the caller untouched.
    #[error("Upstream returned status {status}")]
    Upstream {
        status: u16,
        body: serde_json::Value,
    },

    /// A single stream payload could not be parsed. Never returned to callers.
    #[error("Could not parse stream message: {0}")]
    DecodeWarning(String),

    /// Internal errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// IO and serialization errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            // 4xx Client Errors
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::MethodNotAllowed => 405,

            // Forwarded as received
            Error::Upstream { status, .. } => *status,

            // Internal Errors
            Error::DecodeWarning(_) => 500,
            Error::Config(_) => 500,
            Error::Store(_) => 500,
            Error::Transport(_) => 500,
            Error::Internal(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
        }
    }

    /// Get error type for metrics/logging
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::MethodNotAllowed => "method_not_allowed",
            Error::Upstream { .. } => "upstream_error",
            Error::DecodeWarning(_) => "decode_warning",
            Error::Config(_) => "configuration_error",
            Error::Store(_) => "store_error",
            Error::Transport(_) => "transport_error",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// Message shown to API callers
    pub fn public_message(&self) -> String {
        match self {
            Error::Transport(_) => "An error occurred during your request.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response for HTTP API
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse {
            error: ErrorDetail {
                message: err.public_message(),
                r#type: err.error_type().to_string(),
                code: err.status_code(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
