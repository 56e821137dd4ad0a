//! Colosseum configuration and hyperparameters
//!
//! One flat, serde-friendly struct carries every recognized option. Each
//! component receives its own slice of it through the `From` conversions
//! at the bottom of this file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ColosseumError, Result},
    inference::PoolConfig,
    multi_agent::{population::EvolutionConfig, scoring::ScoringConfig, SelectionPolicy},
    train::TrainerConfig,
};

/// Colosseum configuration parameters
///
/// Field names serialize in camelCase so configuration files can use the
/// same option names as the browser-side tooling (`totalArenas`,
/// `fightersPerEpoch`, `seedsN`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColosseumConfig {
    /// Number of concurrent match slots
    pub total_arenas: usize,

    /// Agents per generation (must be even)
    #[serde(alias = "fightersPerEpoch")]
    pub population_size: usize,

    /// Survivors kept per generation
    #[serde(rename = "seedsN")]
    pub seeds_n: usize,

    /// Match duration in simulated milliseconds
    pub time_limit_ms: f64,

    /// Fraction of parameters touched by offspring mutation
    pub mutation_rate: f32,

    /// Standard deviation of offspring mutation noise
    pub mutation_std: f32,

    /// Standard deviation used to scatter the first generation
    pub initial_mutation_std: f32,

    /// Standard deviation of the noisy seed clones (0 disables them)
    pub additive_noise_std: f32,

    /// Interpolation fractions per parent pair
    #[serde(alias = "crossoversSplits")]
    pub crossover_splits: usize,

    /// How offspring parents are chosen
    pub selection: SelectionPolicy,

    /// Discount applied when turning scores into returns
    pub discount_factor: f32,

    /// Capacity of the replay buffer
    pub replay_buffer_capacity: usize,

    /// Minimum wall time between two predictions of one agent
    pub inference_throttle_ms: u64,

    /// Idle time after which a model snapshot is evicted
    pub model_idle_eviction_ms: u64,

    /// Threads used by the inference pool
    pub inference_threads: usize,

    /// Samples per critic / actor update
    pub trainer_batch_size: usize,

    /// Fine-tune steps spent on each refined agent
    pub trainer_steps_per_agent: usize,

    /// Adam learning rate for critic and actor updates
    pub trainer_learning_rate: f32,

    /// Soft update rate of the target critic
    pub critic_tau: f32,

    /// Enables the trainer; when false refinement is a pass-through
    pub trainable: bool,

    /// Force applied per unit of action
    pub max_force: f32,

    /// Reward per unit of height granted to an agent that gets hit
    pub height_reward_scale: f32,

    /// Penalty for striking something that is not the opponent
    pub off_target_penalty: f32,

    /// Fraction of the off-target penalty actually applied
    pub off_target_penalty_fraction: f32,

    /// Seed for the evolution RNG (entropy when unset)
    pub seed: Option<u64>,
}

impl Default for ColosseumConfig {
    fn default() -> Self {
        Self {
            total_arenas: 2,
            population_size: 10,
            seeds_n: 3,
            time_limit_ms: 10_000.0,
            mutation_rate: 0.5,
            mutation_std: 0.1,
            initial_mutation_std: 10.0,
            additive_noise_std: 0.0,
            crossover_splits: 1,
            selection: SelectionPolicy::AllPairs,
            discount_factor: 0.99,
            replay_buffer_capacity: 10_000,
            inference_throttle_ms: 100,
            model_idle_eviction_ms: 25_000,
            inference_threads: 2,
            trainer_batch_size: 32,
            trainer_steps_per_agent: 100,
            trainer_learning_rate: 1e-4,
            critic_tau: 0.001,
            trainable: false,
            max_force: 25.0,
            height_reward_scale: 0.01,
            off_target_penalty: 20.0,
            off_target_penalty_fraction: 1.0,
            seed: None,
        }
    }
}

impl ColosseumConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(ColosseumError::InvalidConfig(msg.to_string()))
        }

        if self.total_arenas == 0 {
            return invalid("totalArenas must be positive");
        }
        if self.population_size < 2 || self.population_size % 2 != 0 {
            return invalid("populationSize must be even and at least 2");
        }
        if self.seeds_n == 0 || self.seeds_n > self.population_size {
            return invalid("seedsN must be in [1, populationSize]");
        }
        if self.time_limit_ms.is_nan() || self.time_limit_ms <= 0.0 {
            return invalid("timeLimitMs must be positive");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutationRate must be in [0, 1]");
        }
        if self.mutation_std < 0.0 || self.initial_mutation_std < 0.0 {
            return invalid("mutation standard deviations must be non-negative");
        }
        if self.additive_noise_std < 0.0 {
            return invalid("additiveNoiseStd must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return invalid("discountFactor must be in [0, 1]");
        }
        if self.replay_buffer_capacity == 0 {
            return invalid("replayBufferCapacity must be positive");
        }
        if self.inference_threads == 0 {
            return invalid("inferenceThreads must be positive");
        }
        if self.trainer_batch_size == 0 {
            return invalid("trainerBatchSize must be positive");
        }
        if self.trainer_steps_per_agent == 0 {
            return invalid("trainerStepsPerAgent must be positive");
        }
        if self.trainer_learning_rate <= 0.0 {
            return invalid("trainerLearningRate must be positive");
        }
        if !(0.0..=1.0).contains(&self.critic_tau) {
            return invalid("criticTau must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.off_target_penalty_fraction) {
            return invalid("offTargetPenaltyFraction must be in [0, 1]");
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Set number of match slots
    pub fn total_arenas(mut self, n: usize) -> Self {
        self.total_arenas = n;
        self
    }

    /// Set generation size
    pub fn population_size(mut self, n: usize) -> Self {
        self.population_size = n;
        self
    }

    /// Set number of survivors per generation
    pub fn seeds_n(mut self, n: usize) -> Self {
        self.seeds_n = n;
        self
    }

    /// Set match duration
    pub fn time_limit_ms(mut self, ms: f64) -> Self {
        self.time_limit_ms = ms;
        self
    }

    /// Set offspring mutation rate and noise
    pub fn mutation(mut self, rate: f32, std: f32) -> Self {
        self.mutation_rate = rate;
        self.mutation_std = std;
        self
    }

    /// Set noisy seed clone standard deviation
    pub fn additive_noise_std(mut self, std: f32) -> Self {
        self.additive_noise_std = std;
        self
    }

    /// Set crossover fractions per parent pair
    pub fn crossover_splits(mut self, n: usize) -> Self {
        self.crossover_splits = n;
        self
    }

    /// Set parent selection policy
    pub fn selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Set inference throttle interval
    pub fn inference_throttle_ms(mut self, ms: u64) -> Self {
        self.inference_throttle_ms = ms;
        self
    }

    /// Enable or disable the trainer
    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Set fine-tune budget per agent
    pub fn trainer_steps_per_agent(mut self, steps: usize) -> Self {
        self.trainer_steps_per_agent = steps;
        self
    }

    /// Set RNG seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl From<&ColosseumConfig> for PoolConfig {
    fn from(config: &ColosseumConfig) -> Self {
        PoolConfig {
            throttle: std::time::Duration::from_millis(config.inference_throttle_ms),
            idle_eviction: std::time::Duration::from_millis(config.model_idle_eviction_ms),
            threads: config.inference_threads,
        }
    }
}

impl From<&ColosseumConfig> for TrainerConfig {
    fn from(config: &ColosseumConfig) -> Self {
        TrainerConfig {
            batch_size: config.trainer_batch_size,
            steps_per_agent: config.trainer_steps_per_agent,
            learning_rate: config.trainer_learning_rate,
            tau: config.critic_tau,
            seed: config.seed,
        }
    }
}

impl From<&ColosseumConfig> for EvolutionConfig {
    fn from(config: &ColosseumConfig) -> Self {
        EvolutionConfig {
            population_size: config.population_size,
            seeds_n: config.seeds_n,
            mutation_rate: config.mutation_rate,
            mutation_std: config.mutation_std,
            initial_mutation_std: config.initial_mutation_std,
            additive_noise_std: config.additive_noise_std,
            crossover_splits: config.crossover_splits,
            selection: config.selection,
        }
    }
}

impl From<&ColosseumConfig> for ScoringConfig {
    fn from(config: &ColosseumConfig) -> Self {
        ScoringConfig {
            max_force: config.max_force,
            height_reward_scale: config.height_reward_scale,
            off_target_penalty: config.off_target_penalty,
            off_target_penalty_fraction: config.off_target_penalty_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ColosseumConfig::default().validate().is_ok());
    }

    #[test]
    fn test_odd_population_rejected() {
        let config = ColosseumConfig::new().population_size(5);
        assert!(matches!(config.validate(), Err(ColosseumError::InvalidConfig(_))));
    }

    #[test]
    fn test_too_many_seeds_rejected() {
        let config = ColosseumConfig::new().population_size(4).seeds_n(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_option_names_and_aliases() {
        let json = r#"{
            "totalArenas": 3,
            "fightersPerEpoch": 6,
            "seedsN": 2,
            "crossoversSplits": 3,
            "trainable": true
        }"#;
        let config: ColosseumConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.total_arenas, 3);
        assert_eq!(config.population_size, 6);
        assert_eq!(config.seeds_n, 2);
        assert_eq!(config.crossover_splits, 3);
        assert!(config.trainable);
        assert_eq!(config.discount_factor, 0.99);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ColosseumConfig::new().population_size(6).seed(42);
        let file = NamedTempFile::new().unwrap();
        config.save_json(file.path()).unwrap();
        let loaded = ColosseumConfig::load_json(file.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_sub_configs() {
        let config = ColosseumConfig::new().inference_throttle_ms(150);
        let pool = PoolConfig::from(&config);
        assert_eq!(pool.throttle.as_millis(), 150);

        let evolution = EvolutionConfig::from(&config);
        assert_eq!(evolution.population_size, config.population_size);
    }
}
