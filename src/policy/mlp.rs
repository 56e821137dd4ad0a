//! Multi-Layer Perceptron (MLP) policy for continuous actions
//!
//! # Architecture
//!
//! ```text
//! Input (observations)
//!         |
//!   [Dense(hidden)] x hidden_layers
//!         |
//!       ReLU
//!         |
//!   [Dense(action_dim)]
//!         |
//!       Tanh
//!         |
//!   Actions in [-1, 1]
//! ```

use rand::Rng;

use super::{Policy, ShapeMetadata, TrainablePolicy, Transferable};
use crate::{
    error::{ColosseumError, Result},
    nn::{Activation, Mlp},
};

const KIND: &str = "mlp";

/// MLP actor policy
#[derive(Debug, Clone, PartialEq)]
pub struct MlpPolicy {
    network: Mlp,
}

impl MlpPolicy {
    /// Create a new randomly initialized policy
    ///
    /// # Arguments
    ///
    /// * `obs_dim` - Observation dimension
    /// * `action_dim` - Action dimension
    /// * `hidden_layers` - Number of hidden layers
    /// * `hidden_units` - Width of each hidden layer
    /// * `rng` - Initialization randomness
    pub fn new<R: Rng + ?Sized>(
        obs_dim: usize,
        action_dim: usize,
        hidden_layers: usize,
        hidden_units: usize,
        rng: &mut R,
    ) -> Self {
        let mut sizes = Vec::with_capacity(hidden_layers + 2);
        sizes.push(obs_dim);
        sizes.extend(std::iter::repeat(hidden_units).take(hidden_layers));
        sizes.push(action_dim);
        Self { network: Mlp::new(sizes, Activation::Relu, Activation::Tanh, rng) }
    }

    /// Wrap an existing network
    pub fn from_network(network: Mlp) -> Self {
        Self { network }
    }

    /// Underlying network
    pub fn network(&self) -> &Mlp {
        &self.network
    }

    fn check_observation(&self, observation: &[f32]) -> Result<()> {
        if observation.len() != self.network.input_dim() {
            return Err(ColosseumError::ObservationEncoding {
                expected: self.network.input_dim(),
                actual: observation.len(),
            });
        }
        Ok(())
    }
}

impl Policy for MlpPolicy {
    fn input_dim(&self) -> usize {
        self.network.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.network.output_dim()
    }

    fn predict(&self, observation: &[f32]) -> Result<Vec<f32>> {
        self.check_observation(observation)?;
        Ok(self.network.forward(observation))
    }

    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, rate: f32, std: f32) {
        self.network.mutate(rng, rate, std);
    }

    fn combine(&self, other: &Self, factor: f32) -> Result<Self> {
        Ok(Self { network: self.network.interpolate(&other.network, factor)? })
    }

    fn to_transferable(&self) -> Transferable {
        Transferable {
            kind: KIND.to_string(),
            shape: ShapeMetadata {
                sizes: self.network.sizes().to_vec(),
                hidden_activation: self.network.hidden_activation(),
                output_activation: self.network.output_activation(),
            },
            flat_weights: self.network.params().to_vec(),
        }
    }

    fn from_transferable(transferable: &Transferable) -> Result<Self> {
        if transferable.kind != KIND {
            return Err(ColosseumError::Transfer(format!(
                "expected a '{KIND}' model, got '{}'",
                transferable.kind
            )));
        }
        let network = Mlp::from_parts(
            transferable.shape.sizes.clone(),
            transferable.shape.hidden_activation,
            transferable.shape.output_activation,
            transferable.flat_weights.clone(),
        )?;
        Ok(Self { network })
    }
}

impl TrainablePolicy for MlpPolicy {
    fn parameters_mut(&mut self) -> &mut [f32] {
        self.network.params_mut()
    }

    fn num_parameters(&self) -> usize {
        self.network.params().len()
    }

    fn actor_gradient(&self, states: &[Vec<f32>], action_grads: &[Vec<f32>]) -> Result<Vec<f32>> {
        if states.len() != action_grads.len() {
            return Err(ColosseumError::Training(format!(
                "{} states but {} action gradients",
                states.len(),
                action_grads.len()
            )));
        }
        if states.is_empty() {
            return Ok(vec![0.0; self.num_parameters()]);
        }
        for (state, grad) in states.iter().zip(action_grads) {
            self.check_observation(state)?;
            if grad.len() != self.output_dim() {
                return Err(ColosseumError::ObservationEncoding {
                    expected: self.output_dim(),
                    actual: grad.len(),
                });
            }
        }

        #[cfg(feature = "training")]
        {
            crate::nn::autograd::mean_gradient(&self.network, states, action_grads)
        }
        #[cfg(not(feature = "training"))]
        {
            Ok(self.network.mean_gradient(states, action_grads))
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn policy(seed: u64) -> MlpPolicy {
        MlpPolicy::new(4, 3, 2, 8, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_policy_creation() {
        let p = policy(0);
        assert_eq!(p.input_dim(), 4);
        assert_eq!(p.output_dim(), 3);
        assert_eq!(p.network().sizes(), &[4, 8, 8, 3]);
    }

    #[test]
    fn test_predict_is_bounded() {
        let mut p = policy(1);
        p.mutate(&mut StdRng::seed_from_u64(2), 1.0, 10.0);
        let action = p.predict(&[1.0, -2.0, 3.0, 0.5]).unwrap();
        assert_eq!(action.len(), 3);
        assert!(action.iter().all(|a| (-1.0..=1.0).contains(a)));
    }

    #[test]
    fn test_predict_rejects_wrong_length() {
        let p = policy(1);
        let err = p.predict(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ColosseumError::ObservationEncoding { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_transferable_roundtrip_predicts_identically() {
        let p = policy(3);
        let restored = MlpPolicy::from_transferable(&p.to_transferable()).unwrap();
        let obs = [0.1, 0.2, -0.3, 0.4];
        assert_eq!(p.predict(&obs).unwrap(), restored.predict(&obs).unwrap());
    }

    #[test]
    fn test_from_transferable_rejects_other_kinds() {
        let mut t = policy(3).to_transferable();
        t.kind = "cnn".to_string();
        assert!(matches!(MlpPolicy::from_transferable(&t), Err(ColosseumError::Transfer(_))));
    }

    #[test]
    fn test_combine_and_copy_are_independent() {
        let a = policy(4);
        let b = policy(5);
        let mut child = a.combine(&b, 0.5).unwrap();
        let snapshot = child.clone();
        child.mutate(&mut StdRng::seed_from_u64(6), 1.0, 1.0);
        assert_ne!(child, snapshot);
        assert_eq!(a, policy(4));
    }

    #[test]
    fn test_actor_gradient_descends() {
        // Push the first action output upward: loss = -a0
        let mut p = policy(7);
        let states = vec![vec![0.5, -0.5, 0.25, 1.0]; 4];
        let grads = vec![vec![-1.0, 0.0, 0.0]; 4];
        let before = p.predict(&states[0]).unwrap()[0];

        for _ in 0..20 {
            let g = p.actor_gradient(&states, &grads).unwrap();
            for (w, dw) in p.parameters_mut().iter_mut().zip(&g) {
                *w -= 0.05 * dw;
            }
        }

        let after = p.predict(&states[0]).unwrap()[0];
        assert!(after > before, "{after} <= {before}");
    }
}
