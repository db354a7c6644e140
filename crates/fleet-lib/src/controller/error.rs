use super::action::ActionKind;
use thiserror::Error;

/// Failure while executing an action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("No orchestrator agent available")]
    NoOrchestrator,

    /// The routed call failed, or the tool reported an error in its payload
    #[error("{0}")]
    Call(String),

    #[error("Unsupported action type: {0}")]
    Unsupported(ActionKind),

    #[error("Action panicked: {0}")]
    Panicked(String),
}
