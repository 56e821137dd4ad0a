//! One running match
//!
//! An arena pairs two contenders in a slot of the simulation. Actions are
//! pipelined: every tick applies the latest prediction received for each
//! side and requests the next one, so the action produced from the
//! observation of tick `n` is applied from tick `n + 1` on. The match ends
//! when its simulated time runs out or when a fatal error aborts it.
//!
//! Errors never escape an arena: a failure on one side aborts the match
//! with that side at fault, so the scheduler always gets an outcome back.

use super::{
    messages::{AgentOutcome, Contender, MatchOutcome, MatchResult},
    scoring::{score_contact, ScoringConfig},
};
use crate::{
    buffer::{ReplayStore, TrajectoryStep},
    env::{ArenaEnvironment, Contact, Side},
    error::{ColosseumError, Result},
    inference::InferencePool,
    policy::Policy,
    utils::ids::{AgentId, MatchId, RunId},
};

/// Lifecycle of an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaState {
    /// Assigned, waiting for its first tick
    Pending,
    /// Ticking
    Running,
    /// Scores reported; further calls do nothing
    Finished,
}

/// A match between two contenders
#[derive(Debug)]
pub struct Arena<P> {
    slot: usize,
    match_id: MatchId,
    agents: [AgentId; 2],
    contenders: Option<[Contender<P>; 2]>,
    state: ArenaState,
    elapsed_ms: f64,
    scores: [f32; 2],
    /// Latest prediction per side with the observation it answered
    last_steps: [Option<(Vec<f32>, Vec<f32>)>; 2],
    action_dim: usize,
}

impl<P: Policy> Arena<P> {
    /// Pair two contenders in `slot`
    pub fn new(slot: usize, match_id: MatchId, a: Contender<P>, b: Contender<P>) -> Self {
        Self {
            slot,
            match_id,
            agents: [a.agent_id, b.agent_id],
            contenders: Some([a, b]),
            state: ArenaState::Pending,
            elapsed_ms: 0.0,
            scores: [0.0; 2],
            last_steps: [None, None],
            action_dim: 0,
        }
    }

    /// Slot index inside the simulation
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Match identity
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// Lifecycle state
    pub fn state(&self) -> ArenaState {
        self.state
    }

    /// Current scores in `[A, B]` order
    pub fn scores(&self) -> [f32; 2] {
        self.scores
    }

    /// Simulated time since the first tick
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    /// Agents in `[A, B]` order
    pub fn agents(&self) -> [AgentId; 2] {
        self.agents
    }

    /// Side played by `agent_id`, if it plays here
    pub fn side_of(&self, agent_id: AgentId) -> Option<Side> {
        Side::BOTH.into_iter().find(|side| self.agents[side.index()] == agent_id)
    }

    fn run_id(&self, side: Side) -> RunId {
        RunId::new(self.match_id, self.agents[side.index()])
    }

    /// Upload the model of `side` to the pool
    pub fn register(&self, side: Side, pool: &InferencePool) -> Result<()> {
        match &self.contenders {
            Some(contenders) => {
                let contender = &contenders[side.index()];
                pool.register(contender.agent_id, &contender.policy)
            }
            None => Ok(()),
        }
    }

    /// Reset the slot and upload both models; on failure, the side at fault
    fn start<E: ArenaEnvironment>(
        &mut self,
        env: &mut E,
        pool: &InferencePool,
    ) -> std::result::Result<(), (Side, ColosseumError)> {
        env.reset_slot(self.slot);
        self.action_dim = env.action_dim();
        self.state = ArenaState::Running;
        for side in Side::BOTH {
            self.register(side, pool).map_err(|e| (side, e))?;
        }
        tracing::debug!(
            "{} started in slot {}: {} vs {}",
            self.match_id,
            self.slot,
            self.agents[0],
            self.agents[1]
        );
        Ok(())
    }

    /// Advance the match by `dt_ms`
    ///
    /// Returns the outcome once, when the match ends on this tick, whether
    /// by time limit or by abort.
    pub fn tick<E: ArenaEnvironment>(
        &mut self,
        dt_ms: f64,
        time_limit_ms: f64,
        max_force: f32,
        env: &mut E,
        pool: &InferencePool,
        replay: &mut ReplayStore,
    ) -> Option<MatchOutcome<P>> {
        match self.state {
            ArenaState::Finished => return None,
            ArenaState::Pending => {
                if let Err((side, error)) = self.start(env, pool) {
                    return self.abort(side, &error, pool, replay);
                }
            }
            ArenaState::Running => {}
        }

        self.elapsed_ms += dt_ms;
        if self.elapsed_ms >= time_limit_ms {
            return self.finish(pool, replay, false);
        }

        for side in Side::BOTH {
            if let Some((_, action)) = &self.last_steps[side.index()] {
                if action.len() != self.action_dim {
                    let error = ColosseumError::ObservationEncoding {
                        expected: self.action_dim,
                        actual: action.len(),
                    };
                    return self.abort(side, &error, pool, replay);
                }
                for (part, value) in action.iter().enumerate() {
                    env.apply_action(self.slot, side, part, [value * max_force, 0.0, 0.0]);
                }
            }
            let observation = env.encode_observation(self.slot, side);
            let agent_id = self.agents[side.index()];
            if let Err(error) = pool.predict(agent_id, self.match_id, observation) {
                return self.abort(side, &error, pool, replay);
            }
        }
        None
    }

    /// Store a prediction for the next ticks and record the transition
    ///
    /// Predictions requested by another match are ignored.
    pub fn on_prediction(
        &mut self,
        agent_id: AgentId,
        match_id: MatchId,
        observation: Vec<f32>,
        action: Vec<f32>,
        replay: &mut ReplayStore,
    ) -> Result<()> {
        if self.state != ArenaState::Running || match_id != self.match_id {
            return Ok(());
        }
        let Some(side) = self.side_of(agent_id) else {
            return Ok(());
        };
        replay.record(TrajectoryStep {
            run_id: self.run_id(side),
            state: Some(observation.clone()),
            action: Some(action.clone()),
            score: self.scores[side.index()],
            timestamp: self.elapsed_ms,
            done: false,
        })?;
        self.last_steps[side.index()] = Some((observation, action));
        Ok(())
    }

    /// Apply one contact to the scores
    ///
    /// Returns the updated scores when the contact changed them.
    pub fn on_collision<E: ArenaEnvironment>(
        &mut self,
        contact: &Contact,
        env: &E,
        scoring: &ScoringConfig,
    ) -> Option<[f32; 2]> {
        if self.state != ArenaState::Running {
            return None;
        }
        let height = contact.target.side().and_then(|side| env.agent_height(self.slot, side));
        let delta = score_contact(contact, env.agent_distance(self.slot), height, scoring)?;
        self.scores[0] += delta[0];
        self.scores[1] += delta[1];
        Some(self.scores)
    }

    /// End the match early, zeroing the score of the side at fault
    pub fn abort(
        &mut self,
        side: Side,
        error: &ColosseumError,
        pool: &InferencePool,
        replay: &mut ReplayStore,
    ) -> Option<MatchOutcome<P>> {
        if self.state == ArenaState::Finished {
            return None;
        }
        tracing::warn!(
            "{} aborted: {} failed with {}",
            self.match_id,
            self.agents[side.index()],
            error
        );
        self.scores[side.index()] = 0.0;
        self.finish(pool, replay, true)
    }

    /// Report final scores and hand the contenders back
    ///
    /// Each side's run gets a terminal step carrying its final score and
    /// closes with it; a side that never received a prediction has no
    /// state to record and contributes nothing. Idempotent: only the first
    /// call produces an outcome.
    pub fn finish(
        &mut self,
        pool: &InferencePool,
        replay: &mut ReplayStore,
        aborted: bool,
    ) -> Option<MatchOutcome<P>> {
        if self.state == ArenaState::Finished {
            return None;
        }
        self.state = ArenaState::Finished;
        let contenders = self.contenders.take()?;

        for side in Side::BOTH {
            let (state, action) = match self.last_steps[side.index()].take() {
                Some((state, action)) => (Some(state), Some(action)),
                None => (None, None),
            };
            let terminal = TrajectoryStep {
                run_id: self.run_id(side),
                state,
                action,
                score: self.scores[side.index()],
                timestamp: self.elapsed_ms,
                done: true,
            };
            if let Err(e) = replay.record(terminal) {
                tracing::warn!("Terminal step of {} not recorded: {}", self.run_id(side), e);
            }
            if let Err(e) = pool.release(self.agents[side.index()]) {
                tracing::warn!("Could not release {}: {}", self.agents[side.index()], e);
            }
        }

        let result = MatchResult {
            slot_index: self.slot,
            match_id: self.match_id,
            agent_a: AgentOutcome { id: self.agents[0], final_score: self.scores[0] },
            agent_b: AgentOutcome { id: self.agents[1], final_score: self.scores[1] },
            aborted,
        };
        tracing::debug!(
            "{} finished after {:.0} ms: {:.3} / {:.3}",
            self.match_id,
            self.elapsed_ms,
            self.scores[0],
            self.scores[1]
        );
        Some(MatchOutcome { result, contenders })
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        env::{duel::DuelEnvironment, BodyRef},
        inference::{PoolConfig, PoolEvent},
        policy::mlp::MlpPolicy,
    };
    use std::time::Duration;

    fn contender(id: u64, env: &DuelEnvironment) -> Contender<MlpPolicy> {
        let mut rng = StdRng::seed_from_u64(id);
        Contender {
            agent_id: AgentId(id),
            generation: 1,
            policy: MlpPolicy::new(env.observation_dim(), env.action_dim(), 1, 8, &mut rng),
            reply: None,
        }
    }

    fn pool() -> InferencePool {
        let config = PoolConfig {
            throttle: Duration::ZERO,
            idle_eviction: Duration::from_secs(60),
            threads: 1,
        };
        InferencePool::spawn::<MlpPolicy>(config).unwrap()
    }

    fn wait_prediction(pool: &InferencePool) -> PoolEvent {
        pool.events().recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn terminal_samples(replay: &ReplayStore) -> usize {
        replay.samples().iter().filter(|s| s.terminal).count()
    }

    #[test]
    fn test_pipelined_actions_and_time_limit() {
        let mut env = DuelEnvironment::new(1, 2);
        let mut replay = ReplayStore::new(100, 0.9);
        let pool = pool();
        let mut arena = Arena::new(0, MatchId(0), contender(1, &env), contender(2, &env));
        assert_eq!(arena.state(), ArenaState::Pending);

        assert!(arena.tick(16.0, 100.0, 25.0, &mut env, &pool, &mut replay).is_none());
        assert_eq!(arena.state(), ArenaState::Running);

        for _ in 0..2 {
            if let PoolEvent::Prediction { agent_id, match_id, observation, action } =
                wait_prediction(&pool)
            {
                arena.on_prediction(agent_id, match_id, observation, action, &mut replay).unwrap();
            }
        }
        assert_eq!(replay.open_runs(), 2);

        let mut outcome = None;
        for _ in 0..10 {
            if let Some(o) = arena.tick(16.0, 100.0, 25.0, &mut env, &pool, &mut replay) {
                outcome = Some(o);
                break;
            }
        }
        let outcome = outcome.expect("match should end at the time limit");
        assert!(!outcome.result.aborted);
        assert_eq!(outcome.contenders[0].agent_id, AgentId(1));
        assert_eq!(outcome.result.agent_b.id, AgentId(2));
        assert_eq!(arena.state(), ArenaState::Finished);
        assert_eq!(replay.open_runs(), 0);

        // One prediction plus one terminal step per side
        assert_eq!(replay.len(), 4);
        assert_eq!(terminal_samples(&replay), 2);
    }

    #[test]
    fn test_expiry_twice_records_one_pair_of_terminal_steps() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(100, 0.9);
        let pool = pool();
        let mut arena = Arena::new(0, MatchId(5), contender(1, &env), contender(2, &env));
        arena.tick(16.0, 30.0, 25.0, &mut env, &pool, &mut replay);
        let obs = env.encode_observation(0, Side::A);
        let act = vec![0.0; env.action_dim()];
        arena.on_prediction(AgentId(1), MatchId(5), obs.clone(), act.clone(), &mut replay).unwrap();
        arena.on_prediction(AgentId(2), MatchId(5), obs, act, &mut replay).unwrap();
        arena.scores = [2.0, -1.0];

        let first = arena.tick(16.0, 30.0, 25.0, &mut env, &pool, &mut replay);
        assert!(first.is_some());
        assert_eq!(terminal_samples(&replay), 2);
        let terminal_rewards: Vec<f32> =
            replay.samples().iter().filter(|s| s.terminal).map(|s| s.reward).collect();
        assert_eq!(terminal_rewards, vec![2.0, -1.0]);

        assert!(arena.tick(16.0, 30.0, 25.0, &mut env, &pool, &mut replay).is_none());
        assert!(arena.finish(&pool, &mut replay, false).is_none());
        assert_eq!(terminal_samples(&replay), 2);
        assert_eq!(replay.len(), 4);
    }

    #[test]
    fn test_side_without_predictions_leaves_no_samples() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(100, 0.9);
        let pool = pool();
        let mut arena = Arena::new(0, MatchId(6), contender(1, &env), contender(2, &env));
        arena.tick(16.0, 1000.0, 25.0, &mut env, &pool, &mut replay);
        let obs = env.encode_observation(0, Side::A);
        let act = vec![0.0; env.action_dim()];
        arena.on_prediction(AgentId(1), MatchId(6), obs, act, &mut replay).unwrap();

        assert!(arena.finish(&pool, &mut replay, false).is_some());
        assert_eq!(replay.len(), 2);
        assert_eq!(terminal_samples(&replay), 1);
        assert_eq!(replay.open_runs(), 0);
    }

    #[test]
    fn test_predictions_from_another_match_are_ignored() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(100, 0.9);
        let pool = pool();
        let mut arena = Arena::new(0, MatchId(8), contender(1, &env), contender(2, &env));
        arena.tick(16.0, 1000.0, 25.0, &mut env, &pool, &mut replay);

        let obs = env.encode_observation(0, Side::A);
        let act = vec![0.0; env.action_dim()];
        arena.on_prediction(AgentId(1), MatchId(7), obs, act, &mut replay).unwrap();
        assert_eq!(replay.open_runs(), 0);
        assert!(arena.last_steps[0].is_none());
    }

    #[test]
    fn test_stopped_pool_aborts_instead_of_failing() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(10, 0.9);
        let mut pool = pool();
        pool.stop().unwrap();
        let mut arena = Arena::new(0, MatchId(9), contender(1, &env), contender(2, &env));

        let outcome = arena.tick(16.0, 1000.0, 25.0, &mut env, &pool, &mut replay).unwrap();
        assert!(outcome.result.aborted);
        assert_eq!(outcome.result.agent_a.final_score, 0.0);
        assert_eq!(arena.state(), ArenaState::Finished);
    }

    #[test]
    fn test_collisions_score_only_while_running() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(10, 0.9);
        let pool = pool();
        let scoring = ScoringConfig::default();
        let mut arena = Arena::new(0, MatchId(3), contender(1, &env), contender(2, &env));
        let contact = Contact {
            body: BodyRef::Fighter { side: Side::A, part: 0 },
            target: BodyRef::Fighter { side: Side::B, part: 0 },
            body_velocity: [10.0, 0.0, 0.0],
            target_velocity: [0.0; 3],
        };

        assert_eq!(arena.on_collision(&contact, &env, &scoring), None);
        arena.tick(16.0, 1000.0, 25.0, &mut env, &pool, &mut replay);
        let scores = arena.on_collision(&contact, &env, &scoring).unwrap();
        assert!(scores[0] > 0.0);
        assert_eq!(scores[0], -scores[1]);
    }

    #[test]
    fn test_abort_zeroes_the_faulty_side() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(10, 0.9);
        let pool = pool();
        let mut arena = Arena::new(0, MatchId(4), contender(1, &env), contender(2, &env));
        arena.tick(16.0, 1000.0, 25.0, &mut env, &pool, &mut replay);
        arena.scores = [3.0, 5.0];

        let error = ColosseumError::ObservationEncoding { expected: 6, actual: 2 };
        let outcome = arena.abort(Side::B, &error, &pool, &mut replay).unwrap();
        assert!(outcome.result.aborted);
        assert_eq!(outcome.result.agent_a.final_score, 3.0);
        assert_eq!(outcome.result.agent_b.final_score, 0.0);
        assert!(arena.abort(Side::A, &error, &pool, &mut replay).is_none());
    }
}
