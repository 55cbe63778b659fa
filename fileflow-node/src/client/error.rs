//! Control-plane client errors.

use thiserror::Error;

/// Result type for control-plane calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors raised while talking to the control plane.
///
/// Callers treat every variant as "skip this tick and retry later".
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid control plane address '{address}': {message}")]
    InvalidUrl { address: String, message: String },

    #[error("Registration failed after {} attempt(s); last error: {last}", attempts.len())]
    Registration {
        attempts: Vec<String>,
        #[source]
        last: Box<ClientError>,
    },

    #[error("Control plane unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    pub fn invalid_url(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn decode(operation: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            operation,
            message: message.to_string(),
        }
    }

    /// HTTP status code, when the control plane answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
