//! libtorch autograd over flat-parameter networks
//!
//! Rebuilds an [`Mlp`]'s graph from its flat parameters so gradients come
//! from tch's autograd, and steps flat parameter vectors with tch's Adam.
//! Results follow the flat layout, so callers never see a tensor. Only
//! available with the "training" feature.

use std::fmt;

use tch::{
    nn::{self, OptimizerConfig},
    Device, Kind, Tensor,
};

use super::{Activation, Mlp};
use crate::error::{ColosseumError, Result};

fn training_error(e: tch::TchError) -> ColosseumError {
    ColosseumError::Training(e.to_string())
}

fn activate(x: Tensor, activation: Activation) -> Tensor {
    match activation {
        Activation::Relu => x.relu(),
        Activation::Tanh => x.tanh(),
        Activation::Linear => x,
    }
}

fn batch_tensor(rows: &[Vec<f32>], width: usize) -> Result<Tensor> {
    if let Some(row) = rows.iter().find(|r| r.len() != width) {
        return Err(ColosseumError::ObservationEncoding { expected: width, actual: row.len() });
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_slice(&flat).view([rows.len() as i64, width as i64]))
}

/// Mean parameter gradient of `sum(network(inputs) * output_grads) / n`
///
/// Same value and layout as [`Mlp::mean_gradient`].
pub fn mean_gradient(
    network: &Mlp,
    inputs: &[Vec<f32>],
    output_grads: &[Vec<f32>],
) -> Result<Vec<f32>> {
    let params = network.params();
    if inputs.is_empty() {
        return Ok(vec![0.0; params.len()]);
    }
    let sizes = network.sizes();
    let layers = sizes.len() - 1;

    let mut leaves = Vec::with_capacity(2 * layers);
    let mut x = batch_tensor(inputs, network.input_dim())?;
    let mut offset = 0;
    for (i, pair) in sizes.windows(2).enumerate() {
        let (fan_in, fan_out) = (pair[0], pair[1]);
        let weights_end = offset + fan_in * fan_out;
        let weight = Tensor::from_slice(&params[offset..weights_end])
            .view([fan_out as i64, fan_in as i64])
            .set_requires_grad(true);
        let bias =
            Tensor::from_slice(&params[weights_end..weights_end + fan_out]).set_requires_grad(true);
        offset = weights_end + fan_out;

        let activation =
            if i + 1 == layers { network.output_activation() } else { network.hidden_activation() };
        x = activate(x.linear(&weight, Some(&bias)), activation);
        leaves.push(weight);
        leaves.push(bias);
    }

    let direction = batch_tensor(output_grads, network.output_dim())?;
    let surrogate = (x * direction).sum(Kind::Float) / inputs.len() as f64;
    let grads = Tensor::run_backward(&[surrogate], leaves.as_slice(), false, false);

    let mut flat = Vec::with_capacity(params.len());
    for grad in &grads {
        let values: Vec<f32> = Vec::try_from(grad.flatten(0, -1)).map_err(training_error)?;
        flat.extend(values);
    }
    Ok(flat)
}

/// tch's Adam driving a flat parameter vector
///
/// The optimizer owns one trainable variable holding a copy of the
/// parameters; each step loads the caller's values, applies the gradient
/// and writes the result back.
pub struct TchAdam {
    vs: nn::VarStore,
    params: Tensor,
    optimizer: nn::Optimizer,
    steps: i64,
}

impl TchAdam {
    /// Create optimizer state for `num_params` parameters
    pub fn new(num_params: usize, learning_rate: f32) -> Result<Self> {
        let vs = nn::VarStore::new(Device::Cpu);
        let params = vs.root().zeros("params", &[num_params as i64]);
        let optimizer =
            nn::Adam::default().build(&vs, f64::from(learning_rate)).map_err(training_error)?;
        Ok(Self { vs, params, optimizer, steps: 0 })
    }

    /// Number of steps taken so far
    pub fn steps(&self) -> i64 {
        self.steps
    }

    /// Apply one descent step using `grads`
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        let expected = self.params.numel();
        if params.len() != expected || grads.len() != expected {
            return Err(ColosseumError::Training(format!(
                "optimizer holds {expected} parameters, got {} values and {} gradients",
                params.len(),
                grads.len()
            )));
        }

        let current = Tensor::from_slice(params);
        tch::no_grad(|| self.params.copy_(&current));
        // d/dp sum(p * g) = g, so the optimizer sees exactly `grads`
        let surrogate = (&self.params * Tensor::from_slice(grads)).sum(Kind::Float);
        self.optimizer.backward_step(&surrogate);

        let updated: Vec<f32> = Vec::try_from(&self.params).map_err(training_error)?;
        params.copy_from_slice(&updated);
        self.steps += 1;
        Ok(())
    }
}

impl fmt::Debug for TchAdam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TchAdam")
            .field("device", &self.vs.device())
            .field("params", &self.params.numel())
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::nn::Adam;

    #[test]
    fn test_autograd_matches_manual_backward() {
        let mut rng = StdRng::seed_from_u64(5);
        let net = Mlp::new(vec![3, 6, 2], Activation::Relu, Activation::Tanh, &mut rng);
        let inputs = vec![vec![0.2, -0.4, 0.9], vec![-1.0, 0.3, 0.1]];
        let grads = vec![vec![1.0, -0.5], vec![0.25, 2.0]];

        let expected = net.mean_gradient(&inputs, &grads);
        let actual = mean_gradient(&net, &inputs, &grads).unwrap();
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-4, "autograd {a} vs manual {e}");
        }
    }

    #[test]
    fn test_tch_adam_matches_flat_adam() {
        let grads = [5.0, -0.5, 0.0];
        let mut ours = vec![1.0_f32, 1.0, 1.0];
        let mut theirs = ours.clone();
        let mut flat = Adam::new(3, 0.01);
        let mut tch_adam = TchAdam::new(3, 0.01).unwrap();
        for _ in 0..3 {
            flat.step(&mut ours, &grads);
            tch_adam.step(&mut theirs, &grads).unwrap();
        }
        for (a, b) in ours.iter().zip(&theirs) {
            assert!((a - b).abs() < 1e-4);
        }
        assert_eq!(tch_adam.steps(), 3);
    }

    #[test]
    fn test_tch_adam_rejects_wrong_length() {
        let mut adam = TchAdam::new(2, 0.01).unwrap();
        assert!(adam.step(&mut [0.0; 3], &[0.0; 3]).is_err());
    }
}
