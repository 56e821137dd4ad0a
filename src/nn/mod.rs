//! Pure Rust dense networks
//!
//! A small multi-layer perceptron that keeps all of its parameters in one
//! flat vector next to its layer shape. The flat layout is what crosses
//! worker boundaries, what the genetic operators work on, and what the
//! optimizer updates, so no conversion is ever needed between them.
//!
//! Layout, per layer in order: weights `[out_features, in_features]`
//! row-major, then biases `[out_features]`.

pub mod adam;
#[cfg(feature = "training")]
pub mod autograd;

pub use adam::Adam;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ColosseumError, Result};

/// Activation function applied after a dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activation {
    /// max(0, x)
    Relu,
    /// Hyperbolic tangent
    Tanh,
    /// Identity
    Linear,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Tanh => x.tanh(),
            Self::Linear => x,
        }
    }

    /// Derivative expressed through the activation's output
    fn derivative(self, output: f32) -> f32 {
        match self {
            Self::Relu => {
                if output > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Tanh => 1.0 - output * output,
            Self::Linear => 1.0,
        }
    }
}

/// Location of one dense layer inside the flat parameter vector
#[derive(Debug, Clone, Copy)]
struct LayerSpan {
    offset: usize,
    in_features: usize,
    out_features: usize,
}

impl LayerSpan {
    fn weights(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.in_features * self.out_features
    }

    fn biases(&self) -> std::ops::Range<usize> {
        let start = self.offset + self.in_features * self.out_features;
        start..start + self.out_features
    }
}

fn layer_spans(sizes: &[usize]) -> Vec<LayerSpan> {
    let mut offset = 0;
    sizes
        .windows(2)
        .map(|pair| {
            let span = LayerSpan { offset, in_features: pair[0], out_features: pair[1] };
            offset += pair[0] * pair[1] + pair[1];
            span
        })
        .collect()
}

/// Forward pass through a linear layer
fn dense_forward(weights: &[f32], biases: &[f32], input: &[f32]) -> Vec<f32> {
    let in_features = input.len();
    biases
        .iter()
        .enumerate()
        .map(|(i, &bias)| {
            // Row-major indexing: weights[i * in_features + j]
            let row = &weights[i * in_features..(i + 1) * in_features];
            bias + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>()
        })
        .collect()
}

/// Post-activation values of every layer, input included
#[derive(Debug, Clone)]
pub struct Trace {
    activations: Vec<Vec<f32>>,
}

impl Trace {
    /// Network output recorded by this trace
    pub fn output(&self) -> &[f32] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Multi-layer perceptron with a flat parameter vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    sizes: Vec<usize>,
    hidden: Activation,
    output: Activation,
    params: Vec<f32>,
}

impl Mlp {
    /// Create a randomly initialized network
    ///
    /// # Arguments
    ///
    /// * `sizes` - Layer widths, input first and output last
    /// * `hidden` - Activation after every hidden layer
    /// * `output` - Activation after the final layer
    /// * `rng` - Source of the Glorot-uniform initial weights
    pub fn new<R: Rng + ?Sized>(
        sizes: Vec<usize>,
        hidden: Activation,
        output: Activation,
        rng: &mut R,
    ) -> Self {
        assert!(sizes.len() >= 2, "an MLP needs at least an input and an output layer");

        let mut params = vec![0.0; Self::param_count(&sizes)];
        for span in layer_spans(&sizes) {
            let limit = (6.0 / (span.in_features + span.out_features) as f32).sqrt();
            for w in &mut params[span.weights()] {
                *w = rng.gen_range(-limit..=limit);
            }
        }

        Self { sizes, hidden, output, params }
    }

    /// Rebuild a network from shape metadata and flat parameters
    pub fn from_parts(
        sizes: Vec<usize>,
        hidden: Activation,
        output: Activation,
        params: Vec<f32>,
    ) -> Result<Self> {
        if sizes.len() < 2 || sizes.contains(&0) {
            return Err(ColosseumError::Transfer(format!("invalid layer sizes {sizes:?}")));
        }
        let expected = Self::param_count(&sizes);
        if params.len() != expected {
            return Err(ColosseumError::Transfer(format!(
                "expected {expected} parameters for layers {sizes:?}, got {}",
                params.len()
            )));
        }
        Ok(Self { sizes, hidden, output, params })
    }

    /// Number of parameters a network with these layer widths holds
    pub fn param_count(sizes: &[usize]) -> usize {
        sizes.windows(2).map(|pair| pair[0] * pair[1] + pair[1]).sum()
    }

    /// Layer widths, input first
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Hidden activation
    pub fn hidden_activation(&self) -> Activation {
        self.hidden
    }

    /// Output activation
    pub fn output_activation(&self) -> Activation {
        self.output
    }

    /// Input dimensionality
    pub fn input_dim(&self) -> usize {
        self.sizes[0]
    }

    /// Output dimensionality
    pub fn output_dim(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    /// Flat parameters
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Mutable flat parameters
    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn activation_for(&self, layer: usize, num_layers: usize) -> Activation {
        if layer + 1 == num_layers {
            self.output
        } else {
            self.hidden
        }
    }

    /// Forward pass
    ///
    /// # Panics
    ///
    /// Panics if `input` does not match the input dimension. Callers at
    /// trust boundaries check the length first and report
    /// `ObservationEncoding` instead.
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.input_dim(), "Input dimension mismatch");

        let spans = layer_spans(&self.sizes);
        let mut x = input.to_vec();
        for (i, span) in spans.iter().enumerate() {
            let activation = self.activation_for(i, spans.len());
            x = dense_forward(&self.params[span.weights()], &self.params[span.biases()], &x)
                .into_iter()
                .map(|z| activation.apply(z))
                .collect();
        }
        x
    }

    /// Forward pass that keeps every intermediate activation for `backward`
    pub fn forward_trace(&self, input: &[f32]) -> Trace {
        assert_eq!(input.len(), self.input_dim(), "Input dimension mismatch");

        let spans = layer_spans(&self.sizes);
        let mut activations = Vec::with_capacity(spans.len() + 1);
        activations.push(input.to_vec());
        for (i, span) in spans.iter().enumerate() {
            let activation = self.activation_for(i, spans.len());
            let previous = &activations[i];
            let next: Vec<f32> =
                dense_forward(&self.params[span.weights()], &self.params[span.biases()], previous)
                    .into_iter()
                    .map(|z| activation.apply(z))
                    .collect();
            activations.push(next);
        }
        Trace { activations }
    }

    /// Backpropagate `grad_output` (dL/d output) through a recorded trace
    ///
    /// Returns `(parameter_gradients, input_gradient)`; parameter gradients
    /// follow the flat parameter layout.
    pub fn backward(&self, trace: &Trace, grad_output: &[f32]) -> (Vec<f32>, Vec<f32>) {
        assert_eq!(grad_output.len(), self.output_dim(), "Output gradient dimension mismatch");

        let spans = layer_spans(&self.sizes);
        let mut grads = vec![0.0; self.params.len()];
        let mut grad_a = grad_output.to_vec();

        for (i, span) in spans.iter().enumerate().rev() {
            let activation = self.activation_for(i, spans.len());
            let output = &trace.activations[i + 1];
            let input = &trace.activations[i];

            let grad_z: Vec<f32> = grad_a
                .iter()
                .zip(output)
                .map(|(g, &a)| g * activation.derivative(a))
                .collect();

            let weights = &self.params[span.weights()];
            let mut grad_input = vec![0.0; span.in_features];
            for (o, &gz) in grad_z.iter().enumerate() {
                let row = o * span.in_features;
                for j in 0..span.in_features {
                    grads[span.offset + row + j] += gz * input[j];
                    grad_input[j] += weights[row + j] * gz;
                }
                grads[span.biases().start + o] += gz;
            }
            grad_a = grad_input;
        }

        (grads, grad_a)
    }

    /// Mean over a batch of the parameter gradients of `output · output_grads`
    ///
    /// Per-sample backward passes run in parallel and are summed.
    pub fn mean_gradient(&self, inputs: &[Vec<f32>], output_grads: &[Vec<f32>]) -> Vec<f32> {
        let num_params = self.params.len();
        if inputs.is_empty() {
            return vec![0.0; num_params];
        }
        let summed = inputs
            .par_iter()
            .zip(output_grads.par_iter())
            .map(|(input, grad)| {
                let trace = self.forward_trace(input);
                self.backward(&trace, grad).0
            })
            .reduce(
                || vec![0.0; num_params],
                |mut acc, g| {
                    acc.iter_mut().zip(&g).for_each(|(a, b)| *a += b);
                    acc
                },
            );
        let n = inputs.len() as f32;
        summed.into_iter().map(|g| g / n).collect()
    }

    fn check_compatible(&self, other: &Mlp) -> Result<()> {
        if self.sizes != other.sizes {
            return Err(ColosseumError::Transfer(format!(
                "incompatible layer shapes {:?} and {:?}",
                self.sizes, other.sizes
            )));
        }
        Ok(())
    }

    /// Parameter interpolation `self * factor + other * (1 - factor)`
    pub fn interpolate(&self, other: &Mlp, factor: f32) -> Result<Mlp> {
        self.check_compatible(other)?;
        let params = self
            .params
            .iter()
            .zip(&other.params)
            .map(|(a, b)| a * factor + b * (1.0 - factor))
            .collect();
        Ok(Mlp { params, ..self.clone() })
    }

    /// Move parameters toward `other` by `tau` in place
    pub fn blend_toward(&mut self, other: &Mlp, tau: f32) -> Result<()> {
        self.check_compatible(other)?;
        for (t, o) in self.params.iter_mut().zip(&other.params) {
            *t = (1.0 - tau) * *t + tau * o;
        }
        Ok(())
    }

    /// Add N(0, std) noise to each parameter with probability `rate`
    pub fn mutate<R: Rng + ?Sized>(&mut self, rng: &mut R, rate: f32, std: f32) {
        let Ok(noise) = Normal::new(0.0_f32, std) else {
            return;
        };
        for p in &mut self.params {
            if rng.gen::<f32>() < rate {
                *p += noise.sample(rng);
            }
        }
    }
}
