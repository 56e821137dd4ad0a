//! Replay store for off-policy training
//!
//! This module implements experience storage for critic and actor updates:
//! - Per-run trajectory buffering (state, action, cumulative score)
//! - Conversion of finished runs into discounted-return samples
//! - A fixed-capacity circular buffer of samples
//! - Uniform sampling with replacement
//!
//! # Run lifecycle
//!
//! Steps for one [`RunId`] are buffered until the run is completed, either
//! by a `done` step or by [`ReplayStore::mark_complete`]. Completion sorts
//! the steps by timestamp, turns consecutive score deltas into rewards,
//! computes `G[i] = reward[i] + discount * G[i + 1]` backwards, pairs every
//! step with its successor and discards the raw steps.

mod returns;
mod sampling;
#[cfg(test)]
mod tests;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use returns::{discounted_returns, score_deltas};
pub use sampling::SampleBatch;

use crate::{
    error::{ColosseumError, Result},
    utils::ids::RunId,
};

/// One raw per-step record of a run
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryStep {
    /// Run the step belongs to
    pub run_id: RunId,
    /// Observation at this step
    pub state: Option<Vec<f32>>,
    /// Action in effect at this step
    pub action: Option<Vec<f32>>,
    /// Cumulative score at this step
    pub score: f32,
    /// Simulated time of the step
    pub timestamp: f64,
    /// Whether this step completes the run
    pub done: bool,
}

/// Training unit exposed outside the store
///
/// `reward` holds the discounted return of the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSample {
    /// Observation
    pub state: Vec<f32>,
    /// Observation of the following step (own state when terminal)
    pub next_state: Vec<f32>,
    /// Action
    pub action: Vec<f32>,
    /// Action of the following step (own action when terminal)
    pub next_action: Vec<f32>,
    /// Discounted return
    pub reward: f32,
    /// Last step of its run
    pub terminal: bool,
}

/// Raw form handed to the trainer worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySnapshot {
    /// Buffer capacity
    pub capacity: usize,
    /// Discount factor
    pub discount: f32,
    /// Samples, oldest first
    pub buffer: Vec<TrainingSample>,
}

#[derive(Debug, Clone)]
struct BufferedStep {
    state: Vec<f32>,
    action: Vec<f32>,
    score: f32,
    timestamp: f64,
}

/// Replay store
///
/// # Example
///
/// ```rust
/// use colosseum_rl::buffer::{ReplayStore, TrajectoryStep};
/// use colosseum_rl::utils::ids::{AgentId, MatchId, RunId};
///
/// let mut store = ReplayStore::new(100, 0.99);
/// let run_id = RunId::new(MatchId(1), AgentId(1));
///
/// for (t, score) in [(0.0, 0.0), (16.0, 2.0)] {
///     store
///         .record(TrajectoryStep {
///             run_id,
///             state: Some(vec![0.0, 1.0]),
///             action: Some(vec![0.5]),
///             score,
///             timestamp: t,
///             done: false,
///         })
///         .unwrap();
/// }
/// assert_eq!(store.mark_complete(run_id, 3.0), 2);
/// assert_eq!(store.len(), 2);
/// ```
#[derive(Debug)]
pub struct ReplayStore {
    capacity: usize,
    discount: f32,
    buffer: Vec<TrainingSample>,
    /// Next slot to overwrite once the buffer is full
    cursor: usize,
    runs: HashMap<RunId, Vec<BufferedStep>>,
}

impl ReplayStore {
    /// Create an empty store
    pub fn new(capacity: usize, discount: f32) -> Self {
        assert!(capacity > 0, "replay capacity must be positive");
        Self {
            capacity,
            discount,
            buffer: Vec::with_capacity(capacity.min(4096)),
            cursor: 0,
            runs: HashMap::new(),
        }
    }

    /// Rebuild a store from its raw form
    pub fn from_snapshot(snapshot: ReplaySnapshot) -> Self {
        let capacity = snapshot.capacity.max(1);
        let mut buffer = snapshot.buffer;
        if buffer.len() > capacity {
            buffer.drain(..buffer.len() - capacity);
        }
        Self { capacity, discount: snapshot.discount, buffer, cursor: 0, runs: HashMap::new() }
    }

    /// Raw form with samples in insertion order
    pub fn snapshot(&self) -> ReplaySnapshot {
        let mut buffer = Vec::with_capacity(self.buffer.len());
        buffer.extend_from_slice(&self.buffer[self.cursor..]);
        buffer.extend_from_slice(&self.buffer[..self.cursor]);
        ReplaySnapshot { capacity: self.capacity, discount: self.discount, buffer }
    }

    /// Number of stored samples
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no samples are stored
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of stored samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discount factor
    pub fn discount(&self) -> f32 {
        self.discount
    }

    /// Runs with buffered, not yet completed steps
    pub fn open_runs(&self) -> usize {
        self.runs.len()
    }

    /// Stored samples in storage order
    pub fn samples(&self) -> &[TrainingSample] {
        &self.buffer
    }

    /// Append a step to its run
    ///
    /// A step without state or action is rejected with `InvalidStep` unless
    /// it is also the `done` step, in which case it is not stored and the
    /// run is finalized from what was already buffered. Returns the number
    /// of samples emitted (non-zero only when the run completed).
    pub fn record(&mut self, step: TrajectoryStep) -> Result<usize> {
        let TrajectoryStep { run_id, state, action, score, timestamp, done } = step;

        match (state, action) {
            (Some(state), Some(action)) => {
                self.runs.entry(run_id).or_default().push(BufferedStep {
                    state,
                    action,
                    score,
                    timestamp,
                });
                if done {
                    Ok(self.finalize(run_id, None))
                } else {
                    Ok(0)
                }
            }
            _ if done => Ok(self.finalize(run_id, None)),
            (None, _) => Err(ColosseumError::InvalidStep { run: run_id, reason: "missing state" }),
            (_, None) => Err(ColosseumError::InvalidStep { run: run_id, reason: "missing action" }),
        }
    }

    /// Complete a run, overriding its latest score with `terminal_score`
    ///
    /// Returns the number of samples emitted; a run with no buffered steps
    /// contributes nothing.
    pub fn mark_complete(&mut self, run_id: RunId, terminal_score: f32) -> usize {
        self.finalize(run_id, Some(terminal_score))
    }

    fn finalize(&mut self, run_id: RunId, terminal_score: Option<f32>) -> usize {
        let Some(mut run) = self.runs.remove(&run_id) else {
            return 0;
        };
        if run.is_empty() {
            return 0;
        }

        run.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let (Some(score), Some(last)) = (terminal_score, run.last_mut()) {
            last.score = score;
        }

        let scores: Vec<f32> = run.iter().map(|step| step.score).collect();
        let returns = discounted_returns(&score_deltas(&scores), self.discount);

        let n = run.len();
        for i in 0..n {
            let next = if i + 1 < n { i + 1 } else { i };
            self.push(TrainingSample {
                state: run[i].state.clone(),
                next_state: run[next].state.clone(),
                action: run[i].action.clone(),
                next_action: run[next].action.clone(),
                reward: returns[i],
                terminal: i + 1 == n,
            });
        }

        tracing::debug!("Run {} completed with {} samples", run_id, n);
        n
    }

    fn push(&mut self, sample: TrainingSample) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(sample);
            return;
        }
        // replace the oldest sample
        self.buffer[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.capacity;
    }
}
