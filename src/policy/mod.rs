//! Policy capabilities
//!
//! The orchestration layer never looks inside a policy. It only needs the
//! capability set below: predict an action, perturb parameters, blend two
//! parents, duplicate (via `Clone`) and convert to and from the flat
//! transferable form used at worker boundaries. Disposal is `Drop`.

pub mod mlp;
pub mod transfer;

pub use transfer::{ShapeMetadata, Transferable};

use rand::Rng;

use crate::error::Result;

/// Opaque, evolvable control policy
pub trait Policy: Clone + Send + Sync + 'static {
    /// Length of the observation vector the policy consumes
    fn input_dim(&self) -> usize;

    /// Length of the action vector the policy produces
    fn output_dim(&self) -> usize;

    /// Compute an action for one observation
    ///
    /// Returns `ObservationEncoding` when the observation length does not
    /// match [`Policy::input_dim`].
    fn predict(&self, observation: &[f32]) -> Result<Vec<f32>>;

    /// Add N(0, `std`) noise to each parameter with probability `rate`
    fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, rate: f32, std: f32);

    /// Offspring whose parameters are `self * factor + other * (1 - factor)`
    fn combine(&self, other: &Self, factor: f32) -> Result<Self>;

    /// Flatten into the boundary-crossing form
    fn to_transferable(&self) -> Transferable;

    /// Rebuild from the boundary-crossing form
    fn from_transferable(transferable: &Transferable) -> Result<Self>;
}

/// A policy the trainer can fine-tune with deterministic policy gradients
pub trait TrainablePolicy: Policy {
    /// Flat, mutable parameter view updated by the optimizer
    fn parameters_mut(&mut self) -> &mut [f32];

    /// Number of trainable parameters
    fn num_parameters(&self) -> usize;

    /// Mean parameter gradient over a batch
    ///
    /// `action_grads[i]` is dL/d action for `states[i]`; the result follows
    /// the layout of [`TrainablePolicy::parameters_mut`].
    fn actor_gradient(&self, states: &[Vec<f32>], action_grads: &[Vec<f32>]) -> Result<Vec<f32>>;
}
