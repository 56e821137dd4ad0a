//! Trainer loop: the synchronous core of the trainer worker
//!
//! One call to [`TrainerLoop::step`] does one unit of work. A pending
//! fine-tune always wins: the oldest queued policy is taken and receives
//! one deterministic-policy-gradient step per call until its budget is
//! spent. With nothing to fine-tune, the call runs one critic update
//! instead.
//!
//! With the "training" feature actor steps go through tch's Adam; without
//! it the flat-vector [`Adam`](crate::nn::Adam) takes its place.

use std::collections::VecDeque;

use rand::{rngs::StdRng, SeedableRng};

use super::{critic::Critic, stats::TrainingStats, TrainerConfig};
use crate::{
    buffer::{ReplaySnapshot, ReplayStore},
    error::{ColosseumError, Result},
    policy::TrainablePolicy,
    utils::ids::RequestId,
};

/// Result of one [`TrainerLoop::step`]
#[derive(Debug)]
pub enum StepOutcome<P> {
    /// Nothing to do
    Idle,

    /// The critic took one regression step
    CriticUpdated {
        /// Regression loss
        loss: f32,
    },

    /// A fine-tune took one step and has budget left
    ActorUpdated {
        /// Request being served
        request_id: RequestId,
        /// Actor loss
        loss: f32,
    },

    /// A fine-tune finished (or was passed through for lack of data)
    Refined {
        /// Request this answers
        request_id: RequestId,
        /// Resulting policy
        policy: P,
        /// Actor statistics of the fine-tune
        stats: TrainingStats,
    },

    /// A fine-tune failed; the request is answered and dropped
    Failed {
        /// Request this answers
        request_id: RequestId,
        /// Cause
        error: ColosseumError,
    },
}

#[cfg(feature = "training")]
type ActorOptimizer = crate::nn::autograd::TchAdam;
#[cfg(not(feature = "training"))]
type ActorOptimizer = crate::nn::Adam;

#[cfg(feature = "training")]
fn actor_optimizer(num_params: usize, learning_rate: f32) -> Result<ActorOptimizer> {
    ActorOptimizer::new(num_params, learning_rate)
}

#[cfg(not(feature = "training"))]
fn actor_optimizer(num_params: usize, learning_rate: f32) -> Result<ActorOptimizer> {
    Ok(ActorOptimizer::new(num_params, learning_rate))
}

#[cfg(feature = "training")]
fn optimizer_step(optimizer: &mut ActorOptimizer, params: &mut [f32], grads: &[f32]) -> Result<()> {
    optimizer.step(params, grads)
}

#[cfg(not(feature = "training"))]
fn optimizer_step(optimizer: &mut ActorOptimizer, params: &mut [f32], grads: &[f32]) -> Result<()> {
    optimizer.step(params, grads);
    Ok(())
}

#[derive(Debug)]
struct FineTune<P> {
    request_id: RequestId,
    policy: P,
    optimizer: ActorOptimizer,
    steps: usize,
    stats: TrainingStats,
}

/// Critic improvement and agent fine-tuning sharing one loop
#[derive(Debug)]
pub struct TrainerLoop<P, C> {
    config: TrainerConfig,
    critic: C,
    dataset: Option<ReplayStore>,
    queue: VecDeque<(RequestId, P)>,
    current: Option<FineTune<P>>,
    critic_stats: TrainingStats,
    rng: StdRng,
}

impl<P: TrainablePolicy, C: Critic> TrainerLoop<P, C> {
    /// Create a loop around a critic
    pub fn new(config: TrainerConfig, critic: C) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            critic,
            dataset: None,
            queue: VecDeque::new(),
            current: None,
            critic_stats: TrainingStats::zeros(),
            rng,
        }
    }

    /// Replace the dataset samples are drawn from
    pub fn set_dataset(&mut self, snapshot: ReplaySnapshot) {
        tracing::debug!("Trainer received {} samples", snapshot.buffer.len());
        self.dataset = Some(ReplayStore::from_snapshot(snapshot));
    }

    /// Queue a policy for fine-tuning
    pub fn enqueue(&mut self, request_id: RequestId, policy: P) {
        self.queue.push_back((request_id, policy));
    }

    /// Fine-tunes queued or running
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    fn has_data(&self) -> bool {
        self.dataset.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Whether a call to `step` would do anything
    pub fn has_work(&self) -> bool {
        self.pending() > 0 || self.has_data()
    }

    /// Critic statistics since creation
    pub fn critic_stats(&self) -> &TrainingStats {
        &self.critic_stats
    }

    /// The critic
    pub fn critic(&self) -> &C {
        &self.critic
    }

    /// Perform one unit of work
    pub fn step(&mut self) -> StepOutcome<P> {
        if self.pending() > 0 {
            return self.fine_tune_step();
        }
        if !self.has_data() {
            return StepOutcome::Idle;
        }
        match self.critic_step() {
            Ok(loss) => {
                self.critic_stats.record_critic(loss);
                StepOutcome::CriticUpdated { loss }
            }
            Err(e) => {
                tracing::warn!("Critic update failed: {}", e);
                StepOutcome::Idle
            }
        }
    }

    fn critic_step(&mut self) -> Result<f32> {
        let Some(dataset) = self.dataset.as_ref() else {
            return Ok(0.0);
        };
        let Some(batch) = dataset.sample(self.config.batch_size, &mut self.rng) else {
            return Ok(0.0);
        };
        self.critic.update(&batch, dataset.discount())
    }

    fn fine_tune_step(&mut self) -> StepOutcome<P> {
        if self.current.is_none() {
            let Some((request_id, policy)) = self.queue.pop_front() else {
                return StepOutcome::Idle;
            };
            if !self.has_data() {
                tracing::debug!("No replay data yet, passing {} through", request_id);
                return StepOutcome::Refined { request_id, policy, stats: TrainingStats::zeros() };
            }
            let num_params = policy.num_parameters();
            let optimizer = match actor_optimizer(num_params, self.config.learning_rate) {
                Ok(optimizer) => optimizer,
                Err(error) => return StepOutcome::Failed { request_id, error },
            };
            self.current = Some(FineTune {
                request_id,
                policy,
                optimizer,
                steps: 0,
                stats: TrainingStats::zeros(),
            });
        }

        let Some(mut job) = self.current.take() else {
            return StepOutcome::Idle;
        };
        match self.actor_step(&mut job) {
            Ok(loss) => {
                job.stats.record_actor(loss);
                job.steps += 1;
                if job.steps >= self.config.steps_per_agent {
                    tracing::debug!(
                        "Refined {} in {} steps (mean actor loss {:.4})",
                        job.request_id,
                        job.steps,
                        job.stats.mean_actor_loss()
                    );
                    StepOutcome::Refined {
                        request_id: job.request_id,
                        policy: job.policy,
                        stats: job.stats,
                    }
                } else {
                    let request_id = job.request_id;
                    self.current = Some(job);
                    StepOutcome::ActorUpdated { request_id, loss }
                }
            }
            Err(error) => StepOutcome::Failed { request_id: job.request_id, error },
        }
    }

    /// One step of `loss = -mean(Q(s, policy(s)))`
    fn actor_step(&mut self, job: &mut FineTune<P>) -> Result<f32> {
        let Some(dataset) = self.dataset.as_ref() else {
            return Err(ColosseumError::Training("no dataset".to_string()));
        };
        let Some(batch) = dataset.sample(self.config.batch_size, &mut self.rng) else {
            return Err(ColosseumError::Training("empty dataset".to_string()));
        };

        let actions =
            batch.states.iter().map(|s| job.policy.predict(s)).collect::<Result<Vec<_>>>()?;
        let mut value = 0.0;
        for (s, a) in batch.states.iter().zip(&actions) {
            value += self.critic.value(s, a)?;
        }
        let loss = -value / batch.len() as f32;

        let action_grads: Vec<Vec<f32>> = self
            .critic
            .action_gradients(&batch.states, &actions)?
            .into_iter()
            .map(|g| g.into_iter().map(|x| -x).collect())
            .collect();
        let grads = job.policy.actor_gradient(&batch.states, &action_grads)?;
        optimizer_step(&mut job.optimizer, job.policy.parameters_mut(), &grads)?;
        Ok(loss)
    }

    /// Drop every queued and running fine-tune, returning their ids
    pub fn drain(&mut self) -> Vec<RequestId> {
        let mut cancelled: Vec<RequestId> =
            self.current.take().map(|job| job.request_id).into_iter().collect();
        cancelled.extend(self.queue.drain(..).map(|(id, _)| id));
        self.dataset = None;
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::TrajectoryStep,
        policy::mlp::MlpPolicy,
        train::critic::MlpCritic,
        utils::ids::{AgentId, MatchId, RunId},
    };

    fn config(steps: usize) -> TrainerConfig {
        TrainerConfig {
            batch_size: 8,
            steps_per_agent: steps,
            learning_rate: 1e-2,
            tau: 0.01,
            seed: Some(3),
        }
    }

    fn trainer(steps: usize) -> TrainerLoop<MlpPolicy, MlpCritic> {
        let mut rng = StdRng::seed_from_u64(0);
        TrainerLoop::new(config(steps), MlpCritic::new(2, 1, 1, 8, 1e-2, 0.01, &mut rng))
    }

    fn policy(seed: u64) -> MlpPolicy {
        MlpPolicy::new(2, 1, 1, 4, &mut StdRng::seed_from_u64(seed))
    }

    fn snapshot() -> ReplaySnapshot {
        let mut store = ReplayStore::new(64, 0.9);
        let run_id = RunId::new(MatchId(0), AgentId(0));
        for t in 0..6 {
            store
                .record(TrajectoryStep {
                    run_id,
                    state: Some(vec![t as f32 / 6.0, 1.0]),
                    action: Some(vec![0.1 * t as f32]),
                    score: t as f32,
                    timestamp: f64::from(t),
                    done: false,
                })
                .unwrap();
        }
        store.mark_complete(run_id, 6.0);
        store.snapshot()
    }

    #[test]
    fn test_idle_without_data_or_requests() {
        let mut trainer = trainer(3);
        assert!(!trainer.has_work());
        assert!(matches!(trainer.step(), StepOutcome::Idle));
    }

    #[test]
    fn test_pass_through_without_data() {
        let mut trainer = trainer(3);
        let p = policy(1);
        trainer.enqueue(RequestId(9), p.clone());
        match trainer.step() {
            StepOutcome::Refined { request_id, policy, stats } => {
                assert_eq!(request_id, RequestId(9));
                assert_eq!(policy, p);
                assert_eq!(stats.actor_updates, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_fine_tune_has_priority_and_runs_its_budget() {
        let mut trainer = trainer(3);
        trainer.set_dataset(snapshot());
        assert!(matches!(trainer.step(), StepOutcome::CriticUpdated { .. }));

        let p = policy(2);
        trainer.enqueue(RequestId(1), p.clone());
        trainer.enqueue(RequestId(2), policy(3));

        assert!(matches!(trainer.step(), StepOutcome::ActorUpdated { request_id: RequestId(1), .. }));
        assert!(matches!(trainer.step(), StepOutcome::ActorUpdated { request_id: RequestId(1), .. }));
        match trainer.step() {
            StepOutcome::Refined { request_id, policy, stats } => {
                assert_eq!(request_id, RequestId(1));
                assert_eq!(stats.actor_updates, 3);
                assert_ne!(policy, p);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        // The next queued request is served before the critic resumes
        assert!(matches!(trainer.step(), StepOutcome::ActorUpdated { request_id: RequestId(2), .. }));
        assert_eq!(trainer.pending(), 1);
    }

    #[test]
    fn test_mismatched_policy_fails_only_its_request() {
        let mut trainer = trainer(2);
        trainer.set_dataset(snapshot());
        let wrong = MlpPolicy::new(5, 1, 1, 4, &mut StdRng::seed_from_u64(4));
        trainer.enqueue(RequestId(7), wrong);
        trainer.enqueue(RequestId(8), policy(5));

        assert!(matches!(trainer.step(), StepOutcome::Failed { request_id: RequestId(7), .. }));
        assert!(matches!(trainer.step(), StepOutcome::ActorUpdated { request_id: RequestId(8), .. }));
    }

    #[test]
    fn test_drain_cancels_everything() {
        let mut trainer = trainer(5);
        trainer.set_dataset(snapshot());
        trainer.enqueue(RequestId(1), policy(1));
        trainer.enqueue(RequestId(2), policy(2));
        trainer.step();
        assert_eq!(trainer.drain(), vec![RequestId(1), RequestId(2)]);
        assert!(!trainer.has_work());
    }
}
