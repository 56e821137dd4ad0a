//! Model table: the synchronous core of the inference worker
//!
//! Holds one snapshot per live agent and at most one pending observation
//! per agent. Time is always passed in explicitly so the throttle and the
//! idle eviction can be driven deterministically.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rayon::prelude::*;

use super::messages::PoolEvent;
use crate::{
    error::{ColosseumError, Result},
    policy::Policy,
    utils::ids::{AgentId, MatchId},
};

#[derive(Debug)]
struct ModelSnapshot<P> {
    policy: P,
    /// Refreshed on registration and on every prediction
    last_used: Instant,
    /// Last dispatched prediction; `None` until the first one
    last_inference: Option<Instant>,
}

/// Per-agent model snapshots and pending requests
#[derive(Debug)]
pub struct ModelTable<P> {
    models: HashMap<AgentId, ModelSnapshot<P>>,
    /// Newest observation waiting per agent (older ones are coalesced away)
    pending: HashMap<AgentId, (MatchId, Vec<f32>)>,
    throttle: Duration,
    idle_eviction: Duration,
    dispatched: Arc<AtomicU64>,
}

/// A prediction ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Agent whose model runs
    pub agent_id: AgentId,
    /// Match that asked
    pub match_id: MatchId,
    /// Observation to run it on
    pub observation: Vec<f32>,
}

impl<P: Policy> ModelTable<P> {
    /// Create an empty table
    pub fn new(throttle: Duration, idle_eviction: Duration) -> Self {
        Self {
            models: HashMap::new(),
            pending: HashMap::new(),
            throttle,
            idle_eviction,
            dispatched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of predictions dispatched to a policy
    pub fn dispatched_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dispatched)
    }

    /// Number of live snapshots
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no snapshot is live
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Whether the agent has a live snapshot
    pub fn contains(&self, agent_id: AgentId) -> bool {
        self.models.contains_key(&agent_id)
    }

    /// Number of agents with a pending request
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Store (or replace) an agent's snapshot
    pub fn register(&mut self, agent_id: AgentId, policy: P, now: Instant) {
        let last_inference = self.models.get(&agent_id).and_then(|m| m.last_inference);
        self.models.insert(agent_id, ModelSnapshot { policy, last_used: now, last_inference });
    }

    /// Queue an observation, replacing any older pending one for the agent
    pub fn enqueue(
        &mut self,
        agent_id: AgentId,
        match_id: MatchId,
        observation: Vec<f32>,
    ) -> Result<()> {
        let model = self.models.get(&agent_id).ok_or(ColosseumError::UnknownAgent(agent_id))?;
        let expected = model.policy.input_dim();
        if observation.len() != expected {
            return Err(ColosseumError::ObservationEncoding { expected, actual: observation.len() });
        }
        self.pending.insert(agent_id, (match_id, observation));
        Ok(())
    }

    /// Drop an agent's snapshot and pending request
    pub fn release(&mut self, agent_id: AgentId) -> bool {
        self.pending.remove(&agent_id);
        self.models.remove(&agent_id).is_some()
    }

    fn is_due(&self, agent_id: AgentId, now: Instant) -> bool {
        match self.models.get(&agent_id).and_then(|m| m.last_inference) {
            Some(last) => now.saturating_duration_since(last) >= self.throttle,
            None => true,
        }
    }

    /// Take every pending request whose throttle window has passed
    pub fn take_ready(&mut self, now: Instant) -> Vec<Task> {
        let due: Vec<AgentId> =
            self.pending.keys().copied().filter(|&id| self.is_due(id, now)).collect();
        let mut tasks: Vec<Task> = due
            .into_iter()
            .filter_map(|agent_id| {
                self.pending
                    .remove(&agent_id)
                    .map(|(match_id, observation)| Task { agent_id, match_id, observation })
            })
            .collect();
        tasks.sort_by_key(|task| task.agent_id);
        tasks
    }

    /// Earliest instant at which a pending request becomes due
    pub fn next_due(&self, now: Instant) -> Option<Instant> {
        self.pending
            .keys()
            .filter_map(|id| self.models.get(id))
            .map(|m| m.last_inference.map_or(now, |last| (last + self.throttle).max(now)))
            .min()
    }

    /// Run tasks in parallel and stamp the models that answered
    ///
    /// Uses the ambient rayon pool; the worker installs its own bounded pool
    /// around this call.
    pub fn run(&mut self, tasks: Vec<Task>, now: Instant) -> Vec<PoolEvent> {
        let models = &self.models;
        let dispatched = &self.dispatched;
        let events: Vec<PoolEvent> = tasks
            .into_par_iter()
            .map(|Task { agent_id, match_id, observation }| {
                let Some(model) = models.get(&agent_id) else {
                    return PoolEvent::Failed {
                        agent_id,
                        match_id: Some(match_id),
                        error: ColosseumError::UnknownAgent(agent_id),
                    };
                };
                dispatched.fetch_add(1, Ordering::Relaxed);
                match model.policy.predict(&observation) {
                    Ok(action) => {
                        PoolEvent::Prediction { agent_id, match_id, observation, action }
                    }
                    Err(error) => {
                        PoolEvent::Failed { agent_id, match_id: Some(match_id), error }
                    }
                }
            })
            .collect();

        for event in &events {
            if let PoolEvent::Prediction { agent_id, .. } = event {
                if let Some(model) = self.models.get_mut(agent_id) {
                    model.last_used = now;
                    model.last_inference = Some(now);
                }
            }
        }
        events
    }

    /// Dispose snapshots idle for longer than the eviction window
    ///
    /// Agents with a pending request are not idle.
    pub fn evict_idle(&mut self, now: Instant) -> Vec<AgentId> {
        let mut outdated: Vec<AgentId> = self
            .models
            .iter()
            .filter(|(id, m)| {
                !self.pending.contains_key(id)
                    && now.saturating_duration_since(m.last_used) > self.idle_eviction
            })
            .map(|(id, _)| *id)
            .collect();
        outdated.sort();
        for id in &outdated {
            self.models.remove(id);
        }
        outdated
    }

    /// Dispose everything, returning the agents whose requests were pending
    pub fn drain(&mut self) -> Vec<AgentId> {
        let mut cancelled: Vec<AgentId> = self.pending.drain().map(|(id, _)| id).collect();
        cancelled.sort();
        self.models.clear();
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::policy::mlp::MlpPolicy;

    const THROTTLE: Duration = Duration::from_millis(100);
    const IDLE: Duration = Duration::from_secs(25);
    const M: MatchId = MatchId(9);

    fn table() -> ModelTable<MlpPolicy> {
        ModelTable::new(THROTTLE, IDLE)
    }

    fn policy() -> MlpPolicy {
        MlpPolicy::new(3, 2, 1, 4, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let mut table = table();
        let err = table.enqueue(AgentId(1), M, vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, ColosseumError::UnknownAgent(AgentId(1))));
    }

    #[test]
    fn test_malformed_observation_is_rejected() {
        let mut table = table();
        table.register(AgentId(1), policy(), Instant::now());
        let err = table.enqueue(AgentId(1), M, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, ColosseumError::ObservationEncoding { expected: 3, actual: 5 }));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_requests_within_window_are_coalesced() {
        let mut table = table();
        let t0 = Instant::now();
        table.register(AgentId(1), policy(), t0);

        table.enqueue(AgentId(1), M, vec![0.0; 3]).unwrap();
        let tasks = table.take_ready(t0);
        assert_eq!(tasks.len(), 1);
        table.run(tasks, t0);

        // Two more requests inside the throttle window
        table.enqueue(AgentId(1), M, vec![1.0; 3]).unwrap();
        table.enqueue(AgentId(1), M, vec![2.0; 3]).unwrap();
        assert_eq!(table.pending_len(), 1);
        assert!(table.take_ready(t0 + Duration::from_millis(50)).is_empty());

        let tasks = table.take_ready(t0 + THROTTLE);
        assert_eq!(
            tasks,
            vec![Task { agent_id: AgentId(1), match_id: M, observation: vec![2.0; 3] }]
        );
        table.run(tasks, t0 + THROTTLE);

        assert_eq!(table.dispatched_counter().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_throttle_is_per_agent() {
        let mut table = table();
        let t0 = Instant::now();
        table.register(AgentId(1), policy(), t0);
        table.register(AgentId(2), policy(), t0);

        table.enqueue(AgentId(1), M, vec![0.0; 3]).unwrap();
        let tasks = table.take_ready(t0);
        table.run(tasks, t0);

        table.enqueue(AgentId(1), M, vec![0.0; 3]).unwrap();
        table.enqueue(AgentId(2), M, vec![0.0; 3]).unwrap();
        let ready = table.take_ready(t0 + Duration::from_millis(10));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].agent_id, AgentId(2));
    }

    #[test]
    fn test_run_produces_predictions() {
        let mut table = table();
        let t0 = Instant::now();
        table.register(AgentId(4), policy(), t0);
        table.enqueue(AgentId(4), M, vec![0.5; 3]).unwrap();
        let tasks = table.take_ready(t0);
        let events = table.run(tasks, t0);
        match &events[..] {
            [PoolEvent::Prediction { agent_id, match_id, action, .. }] => {
                assert_eq!(*agent_id, AgentId(4));
                assert_eq!(*match_id, M);
                assert_eq!(action.len(), 2);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_idle_models_are_evicted() {
        let mut table = table();
        let t0 = Instant::now();
        table.register(AgentId(1), policy(), t0);
        table.register(AgentId(2), policy(), t0 + Duration::from_secs(20));

        assert!(table.evict_idle(t0 + Duration::from_secs(10)).is_empty());
        let evicted = table.evict_idle(t0 + Duration::from_secs(26));
        assert_eq!(evicted, vec![AgentId(1)]);
        assert!(!table.contains(AgentId(1)));
        assert!(table.contains(AgentId(2)));
    }

    #[test]
    fn test_drain_reports_pending() {
        let mut table = table();
        let t0 = Instant::now();
        table.register(AgentId(1), policy(), t0);
        table.register(AgentId(2), policy(), t0);
        table.enqueue(AgentId(2), M, vec![0.0; 3]).unwrap();

        assert_eq!(table.drain(), vec![AgentId(2)]);
        assert!(table.is_empty());
        assert_eq!(table.pending_len(), 0);
    }
}
