//! libtorch-backed critic
//!
//! Same contract as [`MlpCritic`](super::MlpCritic), with the online and
//! target networks held in two `VarStore`s and updated through tch's Adam.
//! Only available with the "training" feature.

use tch::{
    nn::{self, Module, OptimizerConfig},
    Device, Kind, Reduction, Tensor,
};

use super::critic::Critic;
use crate::{
    buffer::SampleBatch,
    error::{ColosseumError, Result},
};

fn build_network(
    p: &nn::Path,
    input_dim: i64,
    hidden_layers: usize,
    hidden_units: i64,
) -> nn::Sequential {
    let mut seq = nn::seq();
    let mut in_dim = input_dim;
    for i in 0..hidden_layers {
        seq = seq
            .add(nn::linear(p / format!("fc{i}"), in_dim, hidden_units, Default::default()))
            .add_fn(|x| x.relu());
        in_dim = hidden_units;
    }
    seq.add(nn::linear(p / "q", in_dim, 1, Default::default()))
}

fn training_error(e: tch::TchError) -> ColosseumError {
    ColosseumError::Training(e.to_string())
}

/// Critic on libtorch
pub struct TchCritic {
    vs: nn::VarStore,
    target_vs: nn::VarStore,
    online: nn::Sequential,
    target: nn::Sequential,
    optimizer: nn::Optimizer,
    tau: f64,
    state_dim: i64,
    action_dim: i64,
    device: Device,
}

impl TchCritic {
    /// Create a critic on `device`
    pub fn new(
        state_dim: usize,
        action_dim: usize,
        hidden_layers: usize,
        hidden_units: usize,
        learning_rate: f64,
        tau: f64,
        device: Device,
    ) -> Result<Self> {
        let (state_dim, action_dim) = (state_dim as i64, action_dim as i64);
        let input_dim = state_dim + action_dim;

        let vs = nn::VarStore::new(device);
        let online = build_network(&vs.root(), input_dim, hidden_layers, hidden_units as i64);
        let mut target_vs = nn::VarStore::new(device);
        let target = build_network(&target_vs.root(), input_dim, hidden_layers, hidden_units as i64);
        target_vs.copy(&vs).map_err(training_error)?;

        let optimizer = nn::Adam::default().build(&vs, learning_rate).map_err(training_error)?;

        Ok(Self { vs, target_vs, online, target, optimizer, tau, state_dim, action_dim, device })
    }

    fn tensor(&self, rows: &[Vec<f32>], width: i64) -> Result<Tensor> {
        if let Some(row) = rows.iter().find(|r| r.len() as i64 != width) {
            return Err(ColosseumError::ObservationEncoding {
                expected: width as usize,
                actual: row.len(),
            });
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Ok(Tensor::from_slice(&flat).view([rows.len() as i64, width]).to_device(self.device))
    }

    fn soft_update(&mut self) {
        let online = self.vs.variables();
        let tau = self.tau;
        tch::no_grad(|| {
            for (name, mut target) in self.target_vs.variables() {
                if let Some(source) = online.get(&name) {
                    let blended = &target * (1.0 - tau) + source * tau;
                    target.copy_(&blended);
                }
            }
        });
    }
}

impl Critic for TchCritic {
    fn update(&mut self, batch: &SampleBatch, discount: f32) -> Result<f32> {
        let n = batch.len() as i64;
        if n == 0 {
            return Ok(0.0);
        }
        let states = self.tensor(&batch.states, self.state_dim)?;
        let actions = self.tensor(&batch.actions, self.action_dim)?;
        let next_states = self.tensor(&batch.next_states, self.state_dim)?;
        let next_actions = self.tensor(&batch.next_actions, self.action_dim)?;
        let rewards = Tensor::from_slice(&batch.rewards).view([n, 1]).to_device(self.device);
        let not_done: Vec<f32> =
            batch.terminals.iter().map(|&t| if t { 0.0 } else { 1.0 }).collect();
        let not_done = Tensor::from_slice(&not_done).view([n, 1]).to_device(self.device);

        let target_q = tch::no_grad(|| {
            let next_q = self.target.forward(&Tensor::cat(&[next_states, next_actions], 1));
            rewards + next_q * not_done * f64::from(discount)
        });

        let predicted = self.online.forward(&Tensor::cat(&[states, actions], 1));
        let loss = predicted.mse_loss(&target_q, Reduction::Mean);
        self.optimizer.backward_step(&loss);
        self.soft_update();

        Ok(f64::try_from(&loss).unwrap_or(0.0) as f32)
    }

    fn value(&self, state: &[f32], action: &[f32]) -> Result<f32> {
        let s = self.tensor(&[state.to_vec()], self.state_dim)?;
        let a = self.tensor(&[action.to_vec()], self.action_dim)?;
        let q = tch::no_grad(|| self.online.forward(&Tensor::cat(&[s, a], 1)));
        Ok(f64::try_from(q.view([-1]).get(0)).unwrap_or(0.0) as f32)
    }

    fn action_gradients(
        &self,
        states: &[Vec<f32>],
        actions: &[Vec<f32>],
    ) -> Result<Vec<Vec<f32>>> {
        let s = self.tensor(states, self.state_dim)?;
        let a = self.tensor(actions, self.action_dim)?.set_requires_grad(true);
        let q = self.online.forward(&Tensor::cat(&[&s, &a], 1)).sum(Kind::Float);
        let grads = Tensor::run_backward(&[q], &[&a], false, false);

        let Some(grad) = grads.first() else {
            return Err(ColosseumError::Training("no action gradient".to_string()));
        };
        let flat: Vec<f32> = Vec::try_from(grad.to_device(Device::Cpu).flatten(0, -1))
            .map_err(training_error)?;
        Ok(flat.chunks(self.action_dim as usize).map(<[f32]>::to_vec).collect())
    }
}
