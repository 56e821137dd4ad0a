//! # Colosseum
//!
//! Population-based training for competing control policies.
//!
//! Agents are evaluated against each other in pairwise, time-boxed matches
//! and the population is evolved across generations with selection,
//! crossover and mutation. Survivors' offspring can optionally be refined
//! with off-policy actor-critic training before they are evaluated.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colosseum_rl::prelude::*;
//!
//! # fn main() -> colosseum_rl::Result<()> {
//! let config = ColosseumConfig::default().population_size(8).seeds_n(2);
//! let mut env = DuelEnvironment::new(config.total_arenas, 4);
//! let (obs_dim, act_dim) = (env.observation_dim(), env.action_dim());
//!
//! let mut colosseum = Colosseum::<MlpPolicy, ()>::builder(config)
//!     .factory(move |rng| MlpPolicy::new(obs_dim, act_dim, 2, 32, rng))
//!     .build()?;
//!
//! colosseum.start()?;
//! for _ in 0..1_000 {
//!     env.step(16.0);
//!     for (slot, contact) in env.drain_contacts() {
//!         colosseum.on_collision(slot, &contact, &env);
//!     }
//!     colosseum.tick(16.0, &mut env)?;
//! }
//! colosseum.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Configuration for every component
pub mod config;

/// Error taxonomy
pub mod error;

/// Simulation and reporting boundaries
pub mod env;

/// Pure Rust dense networks
pub mod nn;

/// Policy capability traits and implementations
pub mod policy;

/// Trajectory storage and replay sampling
pub mod buffer;

/// Rate-limited inference worker service
pub mod inference;

/// Off-policy fine-tuning worker service
pub mod train;

/// Matches, scheduling and the generational loop
pub mod multi_agent;

/// Identifiers and small helpers
pub mod utils;

pub use error::{ColosseumError, Result};

/// Prelude module for convenient imports
///
/// This module re-exports commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::{
        config::ColosseumConfig,
        env::{duel::DuelEnvironment, ArenaEnvironment, BodyRef, Contact, Reporter, Side},
        error::{ColosseumError, Result},
        inference::InferencePool,
        multi_agent::{Colosseum, GenerationStats, MatchResult},
        policy::{mlp::MlpPolicy, Policy, TrainablePolicy, Transferable},
        train::{critic::MlpCritic, Trainer},
        utils::ids::AgentId,
    };
}

/// Current version of colosseum-rl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
