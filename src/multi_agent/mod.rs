//! Competitive evaluation and generational evolution
//!
//! # Architecture
//!
//! - **PopulationController**: owns the agents of the current generation,
//!   submits them for evaluation and evolves the next generation once the
//!   last score is in
//! - **MatchScheduler**: pairs queued agents in FIFO order into a fixed
//!   number of slots
//! - **Arena**: one timed match between two agents, fed by the inference
//!   pool and recording trajectories into the replay store
//! - **Colosseum**: the driver a simulation loop talks to
//!
//! # Example
//!
//! ```rust,no_run
//! use colosseum_rl::{config::ColosseumConfig, prelude::*};
//!
//! # fn main() -> colosseum_rl::Result<()> {
//! let mut env = DuelEnvironment::new(2, 3);
//! let (obs, act) = (env.observation_dim(), env.action_dim());
//!
//! let config = ColosseumConfig::default().total_arenas(2).population_size(4).seeds_n(2);
//! let mut colosseum = Colosseum::<MlpPolicy, ()>::builder(config)
//!     .factory(move |rng| MlpPolicy::new(obs, act, 2, 16, rng))
//!     .build()?;
//!
//! colosseum.start()?;
//! while colosseum.history().len() < 3 {
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

pub mod arena;
pub mod colosseum;
pub mod messages;
pub mod population;
pub mod scheduler;
pub mod scoring;

pub use arena::{Arena, ArenaState};
pub use colosseum::{Colosseum, ColosseumBuilder};
pub use messages::{AgentOutcome, Contender, GenerationStats, MatchOutcome, MatchResult, ScoreReport};
pub use population::{Agent, EvolutionConfig, PolicyFactory, PopulationController, SelectionPolicy};
pub use scheduler::{MatchScheduler, Submit};
pub use scoring::{score_contact, ScoringConfig};
