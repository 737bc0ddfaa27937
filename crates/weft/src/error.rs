//! Service-wide error taxonomy.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the orchestrator, converter, and attachment lifecycle.
///
/// Nothing here is retried; transient failures propagate to the caller,
/// which owns retry policy.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller broke the request protocol (e.g. tool output submitted with
    /// no outstanding call).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An attachment blob is unbound or missing when the converter needs to
    /// inline it. Fatal for the request; there is no partial degradation.
    #[error("attachment file missing: {0}")]
    MissingAttachment(String),

    /// Malformed request body, rejected before any state mutation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("agent run failed: {0}")]
    Agent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Stable machine-readable code for the wire error event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Protocol(_) => "protocol_violation",
            Self::MissingAttachment(_) => "missing_attachment",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Store(_) => "store_error",
            Self::Agent(_) => "agent_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }
}
