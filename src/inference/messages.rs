//! Message types for the inference worker
//!
//! - Simulation → pool: model uploads, prediction requests, release, stop
//! - Pool → simulation: predictions, failures, evictions, cancellation, stop
//!   acknowledgement

use crate::{
    error::ColosseumError,
    policy::Transferable,
    utils::ids::{AgentId, MatchId},
};

/// Command sent to the inference worker
#[derive(Debug)]
pub enum PoolCommand {
    /// Upload (or replace) the model snapshot of an agent
    Register {
        /// Owner of the model
        agent_id: AgentId,
        /// Flattened policy
        model: Transferable,
    },

    /// Request an action for an observation
    Predict {
        /// Agent whose model should answer
        agent_id: AgentId,
        /// Match the observation was taken in
        match_id: MatchId,
        /// Encoded observation
        observation: Vec<f32>,
    },

    /// Drop an agent's snapshot and any pending request
    Release {
        /// Agent to drop
        agent_id: AgentId,
    },

    /// Cancel pending work, dispose every model and acknowledge
    Stop,
}

/// Event emitted by the inference worker
#[derive(Debug)]
pub enum PoolEvent {
    /// A prediction finished
    Prediction {
        /// Agent the action belongs to
        agent_id: AgentId,
        /// Match the request came from
        match_id: MatchId,
        /// Observation the action was computed from
        observation: Vec<f32>,
        /// Predicted action
        action: Vec<f32>,
    },

    /// A request for this agent could not be served
    Failed {
        /// Agent whose request failed
        agent_id: AgentId,
        /// Match of the failed prediction; `None` for a failed upload
        match_id: Option<MatchId>,
        /// Cause
        error: ColosseumError,
    },

    /// Snapshots disposed after going idle; callers must re-register
    Evicted {
        /// Evicted agents
        agents: Vec<AgentId>,
    },

    /// A pending request was dropped by `Stop`
    Cancelled {
        /// Agent whose request was dropped
        agent_id: AgentId,
    },

    /// The worker disposed its models and exited
    Stopped,
}

impl PoolEvent {
    /// Agent this event concerns, if it concerns exactly one
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::Prediction { agent_id, .. }
            | Self::Failed { agent_id, .. }
            | Self::Cancelled { agent_id } => Some(*agent_id),
            Self::Evicted { .. } | Self::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_agent_id() {
        let event = PoolEvent::Cancelled { agent_id: AgentId(3) };
        assert_eq!(event.agent_id(), Some(AgentId(3)));
        assert_eq!(PoolEvent::Stopped.agent_id(), None);
        assert_eq!(PoolEvent::Evicted { agents: vec![AgentId(1)] }.agent_id(), None);
    }
}
