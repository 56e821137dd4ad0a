//! Rate-limited inference service
//!
//! The pool runs on its own thread and owns every model snapshot. The
//! simulation talks to it only through [`PoolCommand`]s and reads
//! [`PoolEvent`]s back, correlated by [`AgentId`]. Policies cross the
//! boundary in their [`Transferable`](crate::policy::Transferable) form and
//! are rebuilt on the worker side.
//!
//! Each scheduling round takes every request whose per-agent throttle has
//! elapsed and runs them on a dedicated rayon pool of `threads` workers.

pub mod messages;
pub mod table;

pub use messages::{PoolCommand, PoolEvent};
pub use table::ModelTable;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    error::{ColosseumError, Result},
    policy::Policy,
    utils::ids::{AgentId, MatchId},
};

/// Longest the worker sleeps while nothing is pending
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Inference pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Minimum wall time between two predictions of one agent
    pub throttle: Duration,
    /// Idle time after which a snapshot is disposed
    pub idle_eviction: Duration,
    /// Size of the pool's rayon thread pool
    pub threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            idle_eviction: Duration::from_secs(25),
            threads: 2,
        }
    }
}

/// Handle to a running inference worker
#[derive(Debug)]
pub struct InferencePool {
    commands: Sender<PoolCommand>,
    events: Receiver<PoolEvent>,
    dispatched: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl InferencePool {
    /// Start a worker serving policies of type `P`
    pub fn spawn<P: Policy>(config: PoolConfig) -> Result<Self> {
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.max(1))
            .thread_name(|i| format!("inference-{i}"))
            .build()
            .map_err(|e| ColosseumError::InvalidConfig(e.to_string()))?;

        let table = ModelTable::<P>::new(config.throttle, config.idle_eviction);
        let dispatched = table.dispatched_counter();
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let handle = std::thread::Builder::new()
            .name("inference-pool".to_string())
            .spawn(move || worker_loop(table, threads, command_rx, event_tx))?;

        tracing::info!(
            "Inference pool started ({} threads, {:?} throttle)",
            config.threads,
            config.throttle
        );

        Ok(Self { commands: command_tx, events: event_rx, dispatched, handle: Some(handle) })
    }

    fn send(&self, command: PoolCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| ColosseumError::WorkerDisconnected("inference"))
    }

    /// Upload an agent's policy; must precede its first `predict`
    pub fn register<P: Policy>(&self, agent_id: AgentId, policy: &P) -> Result<()> {
        self.send(PoolCommand::Register { agent_id, model: policy.to_transferable() })
    }

    /// Request an action; the answer arrives as a [`PoolEvent`] tagged
    /// with `match_id`
    pub fn predict(
        &self,
        agent_id: AgentId,
        match_id: MatchId,
        observation: Vec<f32>,
    ) -> Result<()> {
        self.send(PoolCommand::Predict { agent_id, match_id, observation })
    }

    /// Dispose an agent's snapshot
    pub fn release(&self, agent_id: AgentId) -> Result<()> {
        self.send(PoolCommand::Release { agent_id })
    }

    /// Every event available right now, without blocking
    pub fn try_events(&self) -> Vec<PoolEvent> {
        self.events.try_iter().collect()
    }

    /// Event stream, for callers that want to block or select
    pub fn events(&self) -> &Receiver<PoolEvent> {
        &self.events
    }

    /// Predictions dispatched to a policy so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Stop the worker and wait for its acknowledgement
    ///
    /// Returns the events that were still in flight, including a
    /// `Cancelled` event for every request that was pending.
    pub fn stop(&mut self) -> Result<Vec<PoolEvent>> {
        let Some(handle) = self.handle.take() else {
            return Ok(Vec::new());
        };
        self.send(PoolCommand::Stop)?;

        let mut remaining = Vec::new();
        loop {
            match self.events.recv() {
                Ok(PoolEvent::Stopped) => break,
                Ok(event) => remaining.push(event),
                Err(_) => return Err(ColosseumError::WorkerDisconnected("inference")),
            }
        }
        handle.join().map_err(|_| ColosseumError::WorkerDisconnected("inference"))?;
        tracing::info!("Inference pool stopped");
        Ok(remaining)
    }
}

impl Drop for InferencePool {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Inference pool did not stop cleanly: {}", e);
            }
        }
    }
}

fn worker_loop<P: Policy>(
    mut table: ModelTable<P>,
    threads: rayon::ThreadPool,
    commands: Receiver<PoolCommand>,
    events: Sender<PoolEvent>,
) {
    loop {
        let now = Instant::now();
        let timeout =
            table.next_due(now).map_or(IDLE_POLL, |due| due.saturating_duration_since(now));

        let first = match commands.recv_timeout(timeout) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                table.drain();
                return;
            }
        };

        for command in first.into_iter().chain(commands.try_iter()) {
            let stop = handle_command(&mut table, command, &events);
            if stop {
                return;
            }
        }

        let now = Instant::now();
        let tasks = table.take_ready(now);
        if !tasks.is_empty() {
            let results = threads.install(|| table.run(tasks, now));
            for event in results {
                if events.send(event).is_err() {
                    return;
                }
            }
        }

        let evicted = table.evict_idle(now);
        if !evicted.is_empty() {
            tracing::debug!("Evicted {} idle models", evicted.len());
            if events.send(PoolEvent::Evicted { agents: evicted }).is_err() {
                return;
            }
        }
    }
}

/// Apply one command; returns true once the worker must exit
fn handle_command<P: Policy>(
    table: &mut ModelTable<P>,
    command: PoolCommand,
    events: &Sender<PoolEvent>,
) -> bool {
    match command {
        PoolCommand::Register { agent_id, model } => match P::from_transferable(&model) {
            Ok(policy) => {
                tracing::debug!("Registered model for {}", agent_id);
                table.register(agent_id, policy, Instant::now());
            }
            Err(error) => {
                let _ = events.send(PoolEvent::Failed { agent_id, match_id: None, error });
            }
        },
        PoolCommand::Predict { agent_id, match_id, observation } => {
            if let Err(error) = table.enqueue(agent_id, match_id, observation) {
                let match_id = Some(match_id);
                let _ = events.send(PoolEvent::Failed { agent_id, match_id, error });
            }
        }
        PoolCommand::Release { agent_id } => {
            table.release(agent_id);
        }
        PoolCommand::Stop => {
            for agent_id in table.drain() {
                let _ = events.send(PoolEvent::Cancelled { agent_id });
            }
            let _ = events.send(PoolEvent::Stopped);
            return true;
        }
    }
    false
}
