//! State-action value critics
//!
//! A critic regresses `Q(state, action)` toward
//! `reward + discount * (1 - terminal) * Q_target(next_state, next_action)`
//! and keeps a slowly tracking target copy, blended after every update.
//! The trainer also needs `dQ/d action` to push actors uphill.

use rand::Rng;
use rayon::prelude::*;

use crate::{
    buffer::SampleBatch,
    error::{ColosseumError, Result},
    nn::{Activation, Adam, Mlp},
};

/// Value critic used by the trainer
pub trait Critic: Send + 'static {
    /// One regression step on a batch, followed by the target update
    ///
    /// Returns the mean squared error before the step.
    fn update(&mut self, batch: &SampleBatch, discount: f32) -> Result<f32>;

    /// Online estimate of `Q(state, action)`
    fn value(&self, state: &[f32], action: &[f32]) -> Result<f32>;

    /// `dQ/d action` of the online critic for every pair
    fn action_gradients(&self, states: &[Vec<f32>], actions: &[Vec<f32>])
        -> Result<Vec<Vec<f32>>>;
}

/// Pure Rust critic: online and target MLPs with Adam
#[derive(Debug, Clone)]
pub struct MlpCritic {
    online: Mlp,
    target: Mlp,
    optimizer: Adam,
    tau: f32,
    state_dim: usize,
    action_dim: usize,
}

impl MlpCritic {
    /// Create a critic for the given state and action sizes
    pub fn new<R: Rng + ?Sized>(
        state_dim: usize,
        action_dim: usize,
        hidden_layers: usize,
        hidden_units: usize,
        learning_rate: f32,
        tau: f32,
        rng: &mut R,
    ) -> Self {
        let mut sizes = vec![state_dim + action_dim];
        sizes.extend(std::iter::repeat(hidden_units).take(hidden_layers));
        sizes.push(1);
        let online = Mlp::new(sizes, Activation::Relu, Activation::Linear, rng);
        let target = online.clone();
        let optimizer = Adam::new(online.params().len(), learning_rate);
        Self { online, target, optimizer, tau, state_dim, action_dim }
    }

    /// Online network
    pub fn online(&self) -> &Mlp {
        &self.online
    }

    /// Target network
    pub fn target(&self) -> &Mlp {
        &self.target
    }

    fn input(&self, state: &[f32], action: &[f32]) -> Result<Vec<f32>> {
        if state.len() != self.state_dim {
            return Err(ColosseumError::ObservationEncoding {
                expected: self.state_dim,
                actual: state.len(),
            });
        }
        if action.len() != self.action_dim {
            return Err(ColosseumError::ObservationEncoding {
                expected: self.action_dim,
                actual: action.len(),
            });
        }
        let mut input = Vec::with_capacity(self.state_dim + self.action_dim);
        input.extend_from_slice(state);
        input.extend_from_slice(action);
        Ok(input)
    }
}

fn check_batch(batch: &SampleBatch) -> Result<()> {
    let n = batch.len();
    let lengths = [
        batch.states.len(),
        batch.next_states.len(),
        batch.actions.len(),
        batch.next_actions.len(),
        batch.terminals.len(),
    ];
    if lengths.iter().any(|&len| len != n) {
        return Err(ColosseumError::Training(format!("ragged batch: {n} rewards, {lengths:?}")));
    }
    Ok(())
}

impl Critic for MlpCritic {
    fn update(&mut self, batch: &SampleBatch, discount: f32) -> Result<f32> {
        check_batch(batch)?;
        if batch.is_empty() {
            return Ok(0.0);
        }
        let n = batch.len();

        let mut targets = Vec::with_capacity(n);
        let mut inputs = Vec::with_capacity(n);
        for i in 0..n {
            let next = self.input(&batch.next_states[i], &batch.next_actions[i])?;
            let not_done = if batch.terminals[i] { 0.0 } else { 1.0 };
            targets.push(batch.rewards[i] + discount * not_done * self.target.forward(&next)[0]);
            inputs.push(self.input(&batch.states[i], &batch.actions[i])?);
        }

        let online = &self.online;
        let scale = 2.0 / n as f32;
        let num_params = online.params().len();
        let (grads, squared_error) = inputs
            .par_iter()
            .zip(targets.par_iter())
            .map(|(input, &target)| {
                let trace = online.forward_trace(input);
                let error = trace.output()[0] - target;
                let (grads, _) = online.backward(&trace, &[scale * error]);
                (grads, error * error)
            })
            .reduce(
                || (vec![0.0; num_params], 0.0),
                |(mut acc, acc_err), (g, err)| {
                    acc.iter_mut().zip(&g).for_each(|(a, b)| *a += b);
                    (acc, acc_err + err)
                },
            );

        self.optimizer.step(self.online.params_mut(), &grads);
        self.target.blend_toward(&self.online, self.tau)?;

        Ok(squared_error / n as f32)
    }

    fn value(&self, state: &[f32], action: &[f32]) -> Result<f32> {
        Ok(self.online.forward(&self.input(state, action)?)[0])
    }

    fn action_gradients(
        &self,
        states: &[Vec<f32>],
        actions: &[Vec<f32>],
    ) -> Result<Vec<Vec<f32>>> {
        if states.len() != actions.len() {
            return Err(ColosseumError::Training(format!(
                "{} states but {} actions",
                states.len(),
                actions.len()
            )));
        }
        let inputs =
            states.iter().zip(actions).map(|(s, a)| self.input(s, a)).collect::<Result<Vec<_>>>()?;

        let state_dim = self.state_dim;
        Ok(inputs
            .par_iter()
            .map(|input| {
                let trace = self.online.forward_trace(input);
                let (_, input_grad) = self.online.backward(&trace, &[1.0]);
                input_grad[state_dim..].to_vec()
            })
            .collect())
    }
}
