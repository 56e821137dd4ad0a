//! Uniform sampling from the replay store
//!
//! Batches are returned as parallel arrays so the critic and the actor can
//! walk them column by column.

use rand::Rng;

use super::ReplayStore;

/// Samples drawn from the store as parallel arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    /// Observations
    pub states: Vec<Vec<f32>>,
    /// Following observations
    pub next_states: Vec<Vec<f32>>,
    /// Actions
    pub actions: Vec<Vec<f32>>,
    /// Following actions
    pub next_actions: Vec<Vec<f32>>,
    /// Discounted returns
    pub rewards: Vec<f32>,
    /// Terminal flags
    pub terminals: Vec<bool>,
}

impl SampleBatch {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

impl ReplayStore {
    /// Draw `n` samples uniformly at random with replacement
    ///
    /// Returns `None` while the store is empty.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Option<SampleBatch> {
        if self.buffer.is_empty() {
            return None;
        }

        let mut batch = SampleBatch {
            states: Vec::with_capacity(n),
            next_states: Vec::with_capacity(n),
            actions: Vec::with_capacity(n),
            next_actions: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            terminals: Vec::with_capacity(n),
        };
        for _ in 0..n {
            let sample = &self.buffer[rng.gen_range(0..self.buffer.len())];
            batch.states.push(sample.state.clone());
            batch.next_states.push(sample.next_state.clone());
            batch.actions.push(sample.action.clone());
            batch.next_actions.push(sample.next_action.clone());
            batch.rewards.push(sample.reward);
            batch.terminals.push(sample.terminal);
        }
        Some(batch)
    }
}
