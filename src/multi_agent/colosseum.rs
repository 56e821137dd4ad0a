//! The driver wiring scheduler, controller and workers together
//!
//! Everything here runs on the caller's thread, one `tick` or
//! `on_collision` at a time. The inference pool and the trainer run on
//! their own threads and are reached only through their handles.

use rand::{rngs::StdRng, SeedableRng};

use super::{
    messages::{GenerationStats, MatchResult},
    population::{EvolutionConfig, PolicyFactory, PopulationController},
    scheduler::MatchScheduler,
    scoring::ScoringConfig,
};
use crate::{
    buffer::ReplayStore,
    config::ColosseumConfig,
    env::{ArenaEnvironment, Contact, Reporter},
    error::{ColosseumError, Result},
    inference::{InferencePool, PoolConfig},
    policy::TrainablePolicy,
    train::{Trainer, TrainerConfig},
};

const CRITIC_HIDDEN_LAYERS: usize = 4;
const CRITIC_HIDDEN_UNITS: usize = 164;

/// Builder for [`Colosseum`]
pub struct ColosseumBuilder<P, R> {
    config: ColosseumConfig,
    factory: Option<PolicyFactory<P>>,
    trainer: Option<Trainer>,
    reporter: R,
}

impl<P: TrainablePolicy, R: Reporter> ColosseumBuilder<P, R> {
    /// How fresh policies of the first generation are built
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut(&mut StdRng) -> P + Send + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Where score updates and generation statistics go
    pub fn reporter<R2: Reporter>(self, reporter: R2) -> ColosseumBuilder<P, R2> {
        ColosseumBuilder {
            config: self.config,
            factory: self.factory,
            trainer: self.trainer,
            reporter,
        }
    }

    /// Use an already running trainer instead of the default one
    pub fn trainer(mut self, trainer: Trainer) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Validate the configuration and start the workers
    pub fn build(self) -> Result<Colosseum<P, R>> {
        let config = self.config;
        config.validate()?;
        let Some(mut factory) = self.factory else {
            return Err(ColosseumError::InvalidConfig("no policy factory".to_string()));
        };

        let trainer = match self.trainer {
            Some(trainer) => trainer,
            None if config.trainable => {
                let mut rng = match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let sample = factory(&mut rng);
                spawn_trainer(&config, &sample, &mut rng)?
            }
            None => Trainer::disabled(),
        };

        let pool = InferencePool::spawn::<P>(PoolConfig::from(&config))?;
        let scheduler = MatchScheduler::new(
            config.total_arenas,
            config.time_limit_ms,
            ScoringConfig::from(&config),
        );
        let controller =
            PopulationController::new(EvolutionConfig::from(&config), factory, trainer, config.seed);
        let replay = ReplayStore::new(config.replay_buffer_capacity, config.discount_factor);

        tracing::info!(
            "Colosseum ready: {} arenas, {} agents per generation, training {}",
            config.total_arenas,
            config.population_size,
            if controller.trainer().is_enabled() { "on" } else { "off" }
        );
        Ok(Colosseum {
            config,
            scheduler,
            controller,
            pool,
            replay,
            reporter: self.reporter,
            paused: false,
            stopped: false,
            matches_played: 0,
        })
    }
}

/// Trainer around a libtorch critic sized for `sample`
#[cfg(feature = "training")]
fn spawn_trainer<P: TrainablePolicy>(
    config: &ColosseumConfig,
    sample: &P,
    _rng: &mut StdRng,
) -> Result<Trainer> {
    use crate::train::tch_critic::TchCritic;

    let critic = TchCritic::new(
        sample.input_dim(),
        sample.output_dim(),
        CRITIC_HIDDEN_LAYERS,
        CRITIC_HIDDEN_UNITS,
        f64::from(config.trainer_learning_rate),
        f64::from(config.critic_tau),
        tch::Device::cuda_if_available(),
    )?;
    Trainer::spawn::<P, TchCritic>(TrainerConfig::from(config), critic)
}

/// Trainer around a pure Rust critic sized for `sample`
#[cfg(not(feature = "training"))]
fn spawn_trainer<P: TrainablePolicy>(
    config: &ColosseumConfig,
    sample: &P,
    rng: &mut StdRng,
) -> Result<Trainer> {
    use crate::train::critic::MlpCritic;

    let critic = MlpCritic::new(
        sample.input_dim(),
        sample.output_dim(),
        CRITIC_HIDDEN_LAYERS,
        CRITIC_HIDDEN_UNITS,
        config.trainer_learning_rate,
        config.critic_tau,
        rng,
    );
    Trainer::spawn::<P, MlpCritic>(TrainerConfig::from(config), critic)
}

/// Population-based training over pairwise matches
///
/// The caller owns the simulation: it advances it, feeds every contact to
/// [`on_collision`](Self::on_collision) and calls [`tick`](Self::tick)
/// once per frame.
pub struct Colosseum<P, R> {
    config: ColosseumConfig,
    scheduler: MatchScheduler<P>,
    controller: PopulationController<P>,
    pool: InferencePool,
    replay: ReplayStore,
    reporter: R,
    paused: bool,
    stopped: bool,
    matches_played: usize,
}

impl<P: TrainablePolicy, R: Reporter + Default> Colosseum<P, R> {
    /// Start building a colosseum
    pub fn builder(config: ColosseumConfig) -> ColosseumBuilder<P, R> {
        ColosseumBuilder { config, factory: None, trainer: None, reporter: R::default() }
    }
}

impl<P: TrainablePolicy, R: Reporter> Colosseum<P, R> {
    /// Create and submit the first generation
    pub fn start(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.controller.start(&mut self.scheduler)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped {
            return Err(ColosseumError::WorkerDisconnected("inference"));
        }
        Ok(())
    }

    /// Advance every match by `dt_ms` simulated milliseconds
    ///
    /// Returns the matches that finished during this tick. Does nothing
    /// while paused.
    pub fn tick<E: ArenaEnvironment>(&mut self, dt_ms: f64, env: &mut E) -> Result<Vec<MatchResult>> {
        self.ensure_running()?;
        if self.paused {
            return Ok(Vec::new());
        }

        let results = self.scheduler.tick(dt_ms, env, &self.pool, &mut self.replay);
        self.matches_played += results.len();

        if let Some(stats) = self.controller.poll(&mut self.scheduler, &self.replay)? {
            self.reporter.on_generation_stats(&stats);
        }
        Ok(results)
    }

    /// Feed one contact reported by the simulation for `slot`
    ///
    /// Returns the match scores when the contact changed them.
    pub fn on_collision<E: ArenaEnvironment>(
        &mut self,
        slot: usize,
        contact: &Contact,
        env: &E,
    ) -> Option<[f32; 2]> {
        if self.paused || self.stopped {
            return None;
        }
        let scores = self.scheduler.on_collision(slot, contact, env)?;
        self.reporter.on_score_update(slot, scores[0], scores[1]);
        Some(scores)
    }

    /// Stop advancing matches; in-flight predictions are kept
    pub fn pause(&mut self) {
        if !self.paused {
            tracing::info!("Colosseum paused");
        }
        self.paused = true;
    }

    /// Continue after [`pause`](Self::pause)
    pub fn resume(&mut self) {
        if self.paused {
            tracing::info!("Colosseum resumed");
        }
        self.paused = false;
    }

    /// Whether ticks are currently ignored
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop both workers and wait for them
    ///
    /// Running matches end with their current scores and queued agents
    /// are dropped. Further ticks fail with `WorkerDisconnected`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let dropped = self.scheduler.drain(&self.pool, &mut self.replay);
        let pool_events = self.pool.stop()?;
        let trainer_events = self.controller.trainer_mut().stop()?;
        tracing::info!(
            "Colosseum shut down after {} matches ({} queued agents dropped, {} pool and {} trainer requests cancelled)",
            self.matches_played,
            dropped.len(),
            pool_events.len(),
            trainer_events.len()
        );
        Ok(())
    }

    /// Current generation, 0 before `start`
    pub fn epoch(&self) -> usize {
        self.controller.epoch()
    }

    /// Statistics of every completed generation
    pub fn history(&self) -> &[GenerationStats] {
        self.controller.history()
    }

    /// Matches finished so far
    pub fn matches_played(&self) -> usize {
        self.matches_played
    }

    /// Predictions run by the inference pool so far
    pub fn inferences(&self) -> u64 {
        self.pool.dispatched()
    }

    /// Configuration the colosseum was built with
    pub fn config(&self) -> &ColosseumConfig {
        &self.config
    }

    /// Trajectories recorded so far
    pub fn replay(&self) -> &ReplayStore {
        &self.replay
    }

    /// The match scheduler
    pub fn scheduler(&self) -> &MatchScheduler<P> {
        &self.scheduler
    }

    /// The generational loop
    pub fn controller(&self) -> &PopulationController<P> {
        &self.controller
    }

    /// The reporter
    pub fn reporter(&self) -> &R {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{duel::DuelEnvironment, BodyRef, Side},
        policy::mlp::MlpPolicy,
    };

    #[derive(Default)]
    struct Recorder {
        updates: Vec<(usize, f32, f32)>,
    }

    impl Reporter for Recorder {
        fn on_score_update(&mut self, slot: usize, score_a: f32, score_b: f32) {
            self.updates.push((slot, score_a, score_b));
        }
    }

    fn colosseum(env: &DuelEnvironment) -> Colosseum<MlpPolicy, Recorder> {
        let (obs, act) = (env.observation_dim(), env.action_dim());
        let config = ColosseumConfig::default()
            .total_arenas(1)
            .population_size(2)
            .seeds_n(1)
            .time_limit_ms(1000.0)
            .seed(5);
        Colosseum::<MlpPolicy, Recorder>::builder(config)
            .factory(move |rng| MlpPolicy::new(obs, act, 1, 8, rng))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_factory() {
        let result = Colosseum::<MlpPolicy, ()>::builder(ColosseumConfig::default()).build();
        assert!(matches!(result, Err(ColosseumError::InvalidConfig(_))));
    }

    #[test]
    fn test_pause_freezes_matches() {
        let mut env = DuelEnvironment::new(1, 2);
        let mut colosseum = colosseum(&env);
        colosseum.start().unwrap();
        colosseum.tick(16.0, &mut env).unwrap();
        let elapsed = colosseum.scheduler().arena(0).unwrap().elapsed_ms();

        colosseum.pause();
        colosseum.tick(16.0, &mut env).unwrap();
        assert_eq!(colosseum.scheduler().arena(0).unwrap().elapsed_ms(), elapsed);

        let contact = Contact {
            body: BodyRef::Fighter { side: Side::A, part: 0 },
            target: BodyRef::Fighter { side: Side::B, part: 0 },
            body_velocity: [10.0, 0.0, 0.0],
            target_velocity: [0.0; 3],
        };
        assert_eq!(colosseum.on_collision(0, &contact, &env), None);

        colosseum.resume();
        assert!(colosseum.on_collision(0, &contact, &env).is_some());
        assert_eq!(colosseum.reporter().updates.len(), 1);
        colosseum.tick(16.0, &mut env).unwrap();
        assert!(colosseum.scheduler().arena(0).unwrap().elapsed_ms() > elapsed);
    }

    #[test]
    fn test_shutdown_rejects_further_ticks() {
        let mut env = DuelEnvironment::new(1, 2);
        let mut colosseum = colosseum(&env);
        colosseum.start().unwrap();
        colosseum.tick(16.0, &mut env).unwrap();
        colosseum.shutdown().unwrap();
        colosseum.shutdown().unwrap();
        assert!(matches!(
            colosseum.tick(16.0, &mut env),
            Err(ColosseumError::WorkerDisconnected(_))
        ));
    }
}
