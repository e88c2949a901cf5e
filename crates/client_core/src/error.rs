use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid relay endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("relay connection is not established (state: {0})")]
    NotConnected(ConnectionState),
    #[error("failed to encode relay frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message body is empty")]
    EmptyBody,
    #[error("no consultation is selected")]
    NoActiveConsultation,
    #[error("fallback send failed: {source}")]
    Fallback {
        restored_body: String,
        source: BackendError,
    },
}

impl SendError {
    pub fn restored_body(&self) -> Option<&str> {
        match self {
            Self::Fallback { restored_body, .. } => Some(restored_body),
            Self::EmptyBody | Self::NoActiveConsultation => None,
        }
    }
}
