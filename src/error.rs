//! Error taxonomy shared by every component.
//!
//! Fatal errors (`InvalidAgent`, `UnknownAgent`, `ObservationEncoding`) are
//! surfaced to the call site or terminate the offending match. Everything
//! else degrades a single agent's result and lets the generation converge.

use thiserror::Error;

use crate::utils::ids::{AgentId, RunId};

/// Errors raised by the colosseum core
#[derive(Debug, Error)]
pub enum ColosseumError {
    /// An agent was submitted without a completion channel
    #[error("agent {0} was submitted without a completion channel")]
    InvalidAgent(AgentId),

    /// A prediction was requested for an agent that has no registered model
    #[error("no model registered for agent {0}")]
    UnknownAgent(AgentId),

    /// An observation or action vector has the wrong dimensionality
    #[error("observation encoding error: expected {expected} values, got {actual}")]
    ObservationEncoding {
        /// Dimensionality the consumer requires
        expected: usize,
        /// Dimensionality that was supplied
        actual: usize,
    },

    /// A completion arrived twice for the same id
    #[error("duplicate completion for {0}")]
    DuplicateCompletion(String),

    /// A trajectory step is missing its state or action
    #[error("invalid trajectory step for run {run}: {reason}")]
    InvalidStep {
        /// Run the step belongs to
        run: RunId,
        /// What was wrong with it
        reason: &'static str,
    },

    /// A policy could not be converted to or from its transferable form
    #[error("policy transfer failed: {0}")]
    Transfer(String),

    /// A worker domain went away before answering
    #[error("{0} worker is disconnected")]
    WorkerDisconnected(&'static str),

    /// The training backend reported a failure
    #[error("training failed: {0}")]
    Training(String),

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem error while loading or saving
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while loading or saving
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ColosseumError {
    /// Whether the error must terminate the match it occurred in
    pub fn is_fatal_for_match(&self) -> bool {
        matches!(
            self,
            Self::UnknownAgent(_) | Self::ObservationEncoding { .. } | Self::Transfer(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ColosseumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ColosseumError::ObservationEncoding { expected: 4, actual: 3 };
        assert_eq!(err.to_string(), "observation encoding error: expected 4 values, got 3");

        let err = ColosseumError::UnknownAgent(AgentId(7));
        assert_eq!(err.to_string(), "no model registered for agent agent-7");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ColosseumError::UnknownAgent(AgentId(1)).is_fatal_for_match());
        assert!(ColosseumError::ObservationEncoding { expected: 1, actual: 2 }.is_fatal_for_match());
        assert!(!ColosseumError::DuplicateCompletion("x".into()).is_fatal_for_match());
        assert!(!ColosseumError::WorkerDisconnected("trainer").is_fatal_for_match());
    }
}
