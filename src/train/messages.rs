//! Message types for the trainer worker

use super::stats::TrainingStats;
use crate::{
    buffer::ReplaySnapshot,
    error::ColosseumError,
    policy::Transferable,
    utils::ids::RequestId,
};

/// Command sent to the trainer worker
#[derive(Debug)]
pub enum TrainerCommand {
    /// Replace the sampling dataset with a fresh replay snapshot
    Dataset(ReplaySnapshot),

    /// Fine-tune a policy and answer with `Refined`
    Refine {
        /// Correlation id of the answer
        request_id: RequestId,
        /// Flattened policy
        model: Transferable,
    },

    /// Cancel queued work, dispose the critic and acknowledge
    Stop,
}

/// Event emitted by the trainer worker
#[derive(Debug)]
pub enum TrainerEvent {
    /// A fine-tune finished
    Refined {
        /// Request this answers
        request_id: RequestId,
        /// Fine-tuned policy
        model: Transferable,
        /// Actor statistics of the fine-tune
        stats: TrainingStats,
    },

    /// A fine-tune could not be completed
    Failed {
        /// Request this answers
        request_id: RequestId,
        /// Cause
        error: ColosseumError,
    },

    /// A queued or running fine-tune was dropped by `Stop`
    Cancelled {
        /// Request this answers
        request_id: RequestId,
    },

    /// The worker disposed its state and exited
    Stopped,
}

impl TrainerEvent {
    /// Request this event answers, if any
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Refined { request_id, .. }
            | Self::Failed { request_id, .. }
            | Self::Cancelled { request_id } => Some(*request_id),
            Self::Stopped => None,
        }
    }
}
