//! Match scheduling
//!
//! Contenders queue in FIFO order and are paired two at a time into free
//! slots. A slot is freed when its match finishes, and every finished
//! match answers each of its two contenders exactly once.

use std::collections::VecDeque;

use super::{
    arena::Arena,
    messages::{Contender, MatchOutcome, MatchResult, ScoreReport},
    scoring::ScoringConfig,
};
use crate::{
    buffer::ReplayStore,
    env::{ArenaEnvironment, Contact},
    error::{ColosseumError, Result},
    inference::{InferencePool, PoolEvent},
    policy::Policy,
    utils::ids::{AgentId, MatchId},
};

/// Accepts contenders for evaluation
pub trait Submit<P> {
    /// Queue a contender; it must carry a reply channel
    fn submit(&mut self, contender: Contender<P>) -> Result<()>;
}

/// Pairs queued contenders into a fixed number of slots
#[derive(Debug)]
pub struct MatchScheduler<P> {
    slots: Vec<Option<Arena<P>>>,
    queue: VecDeque<Contender<P>>,
    time_limit_ms: f64,
    scoring: ScoringConfig,
    next_match: u64,
}

impl<P: Policy> MatchScheduler<P> {
    /// Create a scheduler with `total_arenas` slots
    pub fn new(total_arenas: usize, time_limit_ms: f64, scoring: ScoringConfig) -> Self {
        Self {
            slots: (0..total_arenas).map(|_| None).collect(),
            queue: VecDeque::new(),
            time_limit_ms,
            scoring,
            next_match: 0,
        }
    }

    /// Number of slots
    pub fn total_arenas(&self) -> usize {
        self.slots.len()
    }

    /// Contenders waiting for a slot
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Slots currently holding a match
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The match in `slot`, if any
    pub fn arena(&self, slot: usize) -> Option<&Arena<P>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Fill free slots while at least two contenders are queued
    pub fn try_assign(&mut self) {
        while self.queue.len() >= 2 {
            let Some(slot) = self.slots.iter().position(Option::is_none) else {
                return;
            };
            let (Some(a), Some(b)) = (self.queue.pop_front(), self.queue.pop_front()) else {
                return;
            };
            let match_id = MatchId(self.next_match);
            self.next_match += 1;
            tracing::debug!("Assigned {} and {} to slot {}", a.agent_id, b.agent_id, slot);
            self.slots[slot] = Some(Arena::new(slot, match_id, a, b));
        }
    }

    fn slot_of(&self, agent_id: AgentId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|arena| arena.side_of(agent_id).is_some()))
    }

    /// Advance every running match by `dt_ms`
    ///
    /// Pool events are routed to their matches first. Returns the results
    /// of the matches that finished during this tick; a failure inside one
    /// match aborts that match only.
    pub fn tick<E: ArenaEnvironment>(
        &mut self,
        dt_ms: f64,
        env: &mut E,
        pool: &InferencePool,
        replay: &mut ReplayStore,
    ) -> Vec<MatchResult> {
        let mut finished = Vec::new();
        for event in pool.try_events() {
            finished.extend(self.route(event, pool, replay));
        }

        for arena in self.slots.iter_mut().flatten() {
            let outcome =
                arena.tick(dt_ms, self.time_limit_ms, self.scoring.max_force, env, pool, replay);
            finished.extend(outcome);
        }

        finished.into_iter().map(|outcome| self.on_match_finished(outcome)).collect()
    }

    /// Deliver one pool event; returns the outcome of a match it ended
    ///
    /// Predictions and failures tagged with another match than the one
    /// the agent plays now are stale and dropped.
    fn route(
        &mut self,
        event: PoolEvent,
        pool: &InferencePool,
        replay: &mut ReplayStore,
    ) -> Vec<MatchOutcome<P>> {
        match event {
            PoolEvent::Prediction { agent_id, match_id, observation, action } => {
                let Some(arena) = self.arena_of_mut(agent_id, Some(match_id)) else {
                    return Vec::new();
                };
                match arena.on_prediction(agent_id, match_id, observation, action, replay) {
                    Ok(()) => Vec::new(),
                    Err(error) => arena
                        .side_of(agent_id)
                        .and_then(|side| arena.abort(side, &error, pool, replay))
                        .into_iter()
                        .collect(),
                }
            }
            PoolEvent::Failed { agent_id, match_id, error } => {
                let Some(arena) = self.arena_of_mut(agent_id, match_id) else {
                    tracing::debug!("Dropping stale failure of {}: {}", agent_id, error);
                    return Vec::new();
                };
                arena
                    .side_of(agent_id)
                    .and_then(|side| arena.abort(side, &error, pool, replay))
                    .into_iter()
                    .collect()
            }
            PoolEvent::Evicted { agents } => {
                let mut outcomes = Vec::new();
                for agent_id in agents {
                    let Some(arena) = self.arena_of_mut(agent_id, None) else {
                        continue;
                    };
                    let Some(side) = arena.side_of(agent_id) else {
                        continue;
                    };
                    if let Err(error) = arena.register(side, pool) {
                        outcomes.extend(arena.abort(side, &error, pool, replay));
                    }
                }
                outcomes
            }
            PoolEvent::Cancelled { .. } | PoolEvent::Stopped => Vec::new(),
        }
    }

    /// Arena `agent_id` plays in, if it is `match_id` (when given)
    fn arena_of_mut(
        &mut self,
        agent_id: AgentId,
        match_id: Option<MatchId>,
    ) -> Option<&mut Arena<P>> {
        let slot = self.slot_of(agent_id)?;
        self.slots[slot]
            .as_mut()
            .filter(|arena| match_id.map_or(true, |id| arena.match_id() == id))
    }

    /// Apply a contact reported for `slot`
    ///
    /// Returns the updated scores of that match when they changed.
    pub fn on_collision<E: ArenaEnvironment>(
        &mut self,
        slot: usize,
        contact: &Contact,
        env: &E,
    ) -> Option<[f32; 2]> {
        let arena = self.slots.get_mut(slot)?.as_mut()?;
        arena.on_collision(contact, env, &self.scoring)
    }

    /// Free the slot, answer both contenders and refill
    fn on_match_finished(&mut self, outcome: MatchOutcome<P>) -> MatchResult {
        let MatchOutcome { result, contenders } = outcome;
        if let Some(slot) = self.slots.get_mut(result.slot_index) {
            *slot = None;
        }

        let scores = [result.agent_a.final_score, result.agent_b.final_score];
        for (contender, score) in contenders.into_iter().zip(scores) {
            let Contender { agent_id, generation, policy, reply } = contender;
            let report = ScoreReport { agent_id, generation, score, policy };
            match reply {
                Some(reply) => {
                    if reply.send(report).is_err() {
                        tracing::warn!("Owner of {} is gone, dropping its score", agent_id);
                    }
                }
                None => tracing::warn!("{} has no reply channel", agent_id),
            }
        }

        tracing::info!(
            "{} in slot {}: {} scored {:.3}, {} scored {:.3}",
            result.match_id,
            result.slot_index,
            result.agent_a.id,
            result.agent_a.final_score,
            result.agent_b.id,
            result.agent_b.final_score
        );
        self.try_assign();
        result
    }

    /// Finish every running match and empty the queue
    ///
    /// Running matches report their current scores; queued contenders are
    /// returned unevaluated.
    pub fn drain(&mut self, pool: &InferencePool, replay: &mut ReplayStore) -> Vec<Contender<P>> {
        let queued = self.queue.drain(..).collect();
        let outcomes: Vec<MatchOutcome<P>> = self
            .slots
            .iter_mut()
            .flatten()
            .filter_map(|arena| arena.finish(pool, replay, true))
            .collect();
        for outcome in outcomes {
            self.on_match_finished(outcome);
        }
        queued
    }
}

impl<P: Policy> Submit<P> for MatchScheduler<P> {
    fn submit(&mut self, contender: Contender<P>) -> Result<()> {
        if contender.reply.is_none() {
            return Err(ColosseumError::InvalidAgent(contender.agent_id));
        }
        self.queue.push_back(contender);
        self.try_assign();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{env::duel::DuelEnvironment, inference::PoolConfig, policy::mlp::MlpPolicy};

    fn contender(
        id: u64,
        env: &DuelEnvironment,
    ) -> (Contender<MlpPolicy>, Receiver<ScoreReport<MlpPolicy>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut rng = StdRng::seed_from_u64(id);
        let policy = MlpPolicy::new(env.observation_dim(), env.action_dim(), 1, 8, &mut rng);
        (Contender { agent_id: AgentId(id), generation: 1, policy, reply: Some(tx) }, rx)
    }

    fn pool() -> InferencePool {
        let config = PoolConfig {
            throttle: Duration::from_millis(5),
            idle_eviction: Duration::from_secs(60),
            threads: 1,
        };
        InferencePool::spawn::<MlpPolicy>(config).unwrap()
    }

    #[test]
    fn test_submit_without_reply_is_rejected() {
        let env = DuelEnvironment::new(1, 1);
        let mut scheduler = MatchScheduler::new(1, 100.0, ScoringConfig::default());
        let (mut c, _rx) = contender(1, &env);
        c.reply = None;
        assert!(matches!(scheduler.submit(c), Err(ColosseumError::InvalidAgent(AgentId(1)))));
        assert_eq!(scheduler.queued(), 0);
    }

    #[test]
    fn test_pairs_in_fifo_order_up_to_slot_count() {
        let env = DuelEnvironment::new(2, 1);
        let mut scheduler = MatchScheduler::new(2, 100.0, ScoringConfig::default());
        let mut receivers = Vec::new();

        let (c, rx) = contender(0, &env);
        receivers.push(rx);
        scheduler.submit(c).unwrap();
        assert_eq!(scheduler.active(), 0);
        assert_eq!(scheduler.queued(), 1);

        for id in 1..6 {
            let (c, rx) = contender(id, &env);
            receivers.push(rx);
            scheduler.submit(c).unwrap();
        }
        assert_eq!(scheduler.active(), 2);
        assert_eq!(scheduler.queued(), 2);
        assert_eq!(scheduler.arena(0).unwrap().agents(), [AgentId(0), AgentId(1)]);
        assert_eq!(scheduler.arena(1).unwrap().agents(), [AgentId(2), AgentId(3)]);
    }

    #[test]
    fn test_finished_matches_reply_once_and_refill() {
        let mut env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(100, 0.9);
        let pool = pool();
        let mut scheduler = MatchScheduler::new(1, 50.0, ScoringConfig::default());
        let mut receivers = Vec::new();
        for id in 0..4 {
            let (c, rx) = contender(id, &env);
            receivers.push(rx);
            scheduler.submit(c).unwrap();
        }

        let mut results = Vec::new();
        for _ in 0..20 {
            results.extend(scheduler.tick(16.0, &mut env, &pool, &mut replay));
            if results.len() == 2 {
                break;
            }
        }
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_a.id, AgentId(0));
        assert_eq!(results[1].agent_a.id, AgentId(2));
        assert_eq!(scheduler.active(), 0);

        for (id, rx) in receivers.iter().enumerate() {
            let report = rx.try_recv().unwrap();
            assert_eq!(report.agent_id, AgentId(id as u64));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_failing_arenas_abort_without_losing_finished_matches() {
        let mut env = DuelEnvironment::new(2, 1);
        let mut replay = ReplayStore::new(10, 0.9);
        let mut pool = pool();
        let mut scheduler = MatchScheduler::new(2, 100.0, ScoringConfig::default());
        let mut receivers = Vec::new();
        for id in 0..4 {
            let (c, rx) = contender(id, &env);
            receivers.push(rx);
            scheduler.submit(c).unwrap();
        }
        pool.stop().unwrap();

        let results = scheduler.tick(16.0, &mut env, &pool, &mut replay);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.aborted));
        assert_eq!(scheduler.active(), 0);
        for rx in &receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[test]
    fn test_drain_reports_running_and_returns_queued() {
        let env = DuelEnvironment::new(1, 1);
        let mut replay = ReplayStore::new(10, 0.9);
        let pool = pool();
        let mut scheduler = MatchScheduler::new(1, 1000.0, ScoringConfig::default());
        let mut receivers = Vec::new();
        for id in 0..3 {
            let (c, rx) = contender(id, &env);
            receivers.push(rx);
            scheduler.submit(c).unwrap();
        }

        let queued = scheduler.drain(&pool, &mut replay);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].agent_id, AgentId(2));
        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_ok());
        assert_eq!(scheduler.active(), 0);
    }
}
