//! Failure taxonomy for routed tool calls

use thiserror::Error;

/// Why a routed call did not produce a result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Target is neither a registered id nor an alias. Never retried.
    #[error("No agent found for target: {0}")]
    NotFound(String),

    /// Target resolved but is marked unhealthy. Fails without a network call.
    #[error("Agent {0} is unhealthy")]
    Unhealthy(String),

    /// Connection refused, timeout and other client-side failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Agent answered with a non-success HTTP status
    #[error("Agent returned HTTP {0}")]
    Status(u16),

    /// Agent answered successfully but the envelope carried an error object
    #[error("Agent reported error: {0}")]
    Remote(String),

    /// Response body was not a JSON object
    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("All {attempts} attempts failed (last error: {last})")]
    RetriesExhausted { attempts: u32, last: String },
}

impl RouterError {
    /// Label used for the failure counter
    pub fn reason(&self) -> &'static str {
        match self {
            RouterError::NotFound(_) => "not_found",
            RouterError::Unhealthy(_) => "unhealthy",
            RouterError::Transport(_) => "transport",
            RouterError::Status(_) => "status",
            RouterError::Remote(_) => "remote",
            RouterError::Decode(_) => "decode",
            RouterError::RetriesExhausted { .. } => "exhausted",
        }
    }
}
