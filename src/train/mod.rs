//! Off-policy fine-tuning service
//!
//! The trainer runs on its own thread. It continuously regresses a shared
//! critic on replay samples and, on request, fine-tunes one policy at a
//! time against that critic before handing it back, correlated by
//! [`RequestId`].
//!
//! A disabled trainer spawns no thread: [`Trainer::refine`] hands the
//! policy straight back and [`Trainer::next_epoch`] does nothing.
//!
//! Every queued request is answered exactly once. If the worker dies, the
//! requests it still owed come back as [`TrainerEvent::Failed`].

pub mod critic;
pub mod messages;
pub mod stats;
#[cfg(feature = "training")]
pub mod tch_critic;
pub mod trainer;

pub use critic::{Critic, MlpCritic};
pub use messages::{TrainerCommand, TrainerEvent};
pub use stats::TrainingStats;
pub use trainer::{StepOutcome, TrainerLoop};

use std::{collections::BTreeSet, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::{
    buffer::ReplayStore,
    error::{ColosseumError, Result},
    policy::{Policy, TrainablePolicy},
    utils::ids::RequestId,
};

/// Trainer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    /// Samples per critic or actor update
    pub batch_size: usize,
    /// Actor steps spent on each refined policy
    pub steps_per_agent: usize,
    /// Adam learning rate of the actor
    pub learning_rate: f32,
    /// Soft update rate of the target critic
    pub tau: f32,
    /// Seed of the sampling RNG
    pub seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self { batch_size: 32, steps_per_agent: 100, learning_rate: 1e-4, tau: 0.001, seed: None }
    }
}

/// What happened to a policy handed to [`Trainer::refine`]
#[derive(Debug)]
pub enum Refinement<P> {
    /// Training is disabled; the policy comes back unmodified
    Immediate(P),
    /// The policy is queued; the answer arrives as a [`TrainerEvent`]
    Pending(RequestId),
}

#[derive(Debug)]
struct Worker {
    commands: Sender<TrainerCommand>,
    events: Receiver<TrainerEvent>,
    handle: Option<JoinHandle<()>>,
}

/// Handle to the trainer worker
#[derive(Debug)]
pub struct Trainer {
    worker: Option<Worker>,
    next_request: u64,
    outstanding: BTreeSet<RequestId>,
}

impl Trainer {
    /// A pass-through trainer
    pub fn disabled() -> Self {
        Self { worker: None, next_request: 0, outstanding: BTreeSet::new() }
    }

    /// Start a worker fine-tuning policies of type `P` against `critic`
    pub fn spawn<P, C>(config: TrainerConfig, critic: C) -> Result<Self>
    where
        P: TrainablePolicy,
        C: Critic,
    {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let core = TrainerLoop::<P, C>::new(config, critic);

        let handle = std::thread::Builder::new()
            .name("trainer".to_string())
            .spawn(move || worker_loop(core, command_rx, event_tx))?;

        tracing::info!("Trainer started");
        Ok(Self {
            worker: Some(Worker { commands: command_tx, events: event_rx, handle: Some(handle) }),
            next_request: 0,
            outstanding: BTreeSet::new(),
        })
    }

    /// Whether refinement does real work
    pub fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }

    fn send(&self, command: TrainerCommand) -> Result<()> {
        match &self.worker {
            Some(worker) => {
                worker.commands.send(command).map_err(|_| ColosseumError::WorkerDisconnected("trainer"))
            }
            None => Ok(()),
        }
    }

    /// Hand the worker a fresh copy of the replay data
    pub fn next_epoch(&self, store: &ReplayStore) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.send(TrainerCommand::Dataset(store.snapshot()))
    }

    /// Fine-tune a policy, or hand it straight back when disabled
    pub fn refine<P: Policy>(&mut self, policy: P) -> Result<Refinement<P>> {
        if !self.is_enabled() {
            return Ok(Refinement::Immediate(policy));
        }
        let request_id = RequestId(self.next_request);
        self.next_request += 1;
        self.send(TrainerCommand::Refine { request_id, model: policy.to_transferable() })?;
        self.outstanding.insert(request_id);
        Ok(Refinement::Pending(request_id))
    }

    /// Requests queued and not answered yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Every event available right now, without blocking
    ///
    /// Once the worker has exited, each request it never answered is
    /// reported as failed.
    pub fn try_events(&mut self) -> Vec<TrainerEvent> {
        let Some(worker) = &self.worker else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let disconnected = loop {
            match worker.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        for event in &events {
            if let Some(request_id) = event.request_id() {
                self.outstanding.remove(&request_id);
            }
        }

        if disconnected && !self.outstanding.is_empty() {
            tracing::error!(
                "Trainer worker exited with {} fine-tunes unanswered",
                self.outstanding.len()
            );
            events.extend(std::mem::take(&mut self.outstanding).into_iter().map(|request_id| {
                TrainerEvent::Failed {
                    request_id,
                    error: ColosseumError::WorkerDisconnected("trainer"),
                }
            }));
        }
        events
    }

    /// Event stream of an enabled trainer
    pub fn events(&self) -> Option<&Receiver<TrainerEvent>> {
        self.worker.as_ref().map(|w| &w.events)
    }

    /// Stop the worker and wait for its acknowledgement
    ///
    /// Returns the events still in flight, including `Cancelled` for every
    /// fine-tune that was queued or running.
    pub fn stop(&mut self) -> Result<Vec<TrainerEvent>> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(Vec::new());
        };
        let Some(handle) = worker.handle.take() else {
            return Ok(Vec::new());
        };
        worker
            .commands
            .send(TrainerCommand::Stop)
            .map_err(|_| ColosseumError::WorkerDisconnected("trainer"))?;

        let mut remaining = Vec::new();
        loop {
            match worker.events.recv() {
                Ok(TrainerEvent::Stopped) => break,
                Ok(event) => remaining.push(event),
                Err(_) => return Err(ColosseumError::WorkerDisconnected("trainer")),
            }
        }
        handle.join().map_err(|_| ColosseumError::WorkerDisconnected("trainer"))?;
        self.outstanding.clear();
        tracing::info!("Trainer stopped");
        Ok(remaining)
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        let running = self.worker.as_ref().is_some_and(|w| w.handle.is_some());
        if running {
            if let Err(e) = self.stop() {
                tracing::warn!("Trainer did not stop cleanly: {}", e);
            }
        }
    }
}

fn worker_loop<P: TrainablePolicy, C: Critic>(
    mut core: TrainerLoop<P, C>,
    commands: Receiver<TrainerCommand>,
    events: Sender<TrainerEvent>,
) {
    loop {
        // Block only when there is nothing to train on
        if !core.has_work() {
            match commands.recv() {
                Ok(command) => {
                    if handle_command(&mut core, command, &events) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
        for command in commands.try_iter() {
            if handle_command(&mut core, command, &events) {
                return;
            }
        }

        let event = match core.step() {
            StepOutcome::Refined { request_id, policy, stats } => {
                Some(TrainerEvent::Refined { request_id, model: policy.to_transferable(), stats })
            }
            StepOutcome::Failed { request_id, error } => {
                tracing::warn!("Fine-tune {} failed: {}", request_id, error);
                Some(TrainerEvent::Failed { request_id, error })
            }
            StepOutcome::CriticUpdated { loss } => {
                let updates = core.critic_stats().critic_updates;
                if updates % 1000 == 0 {
                    tracing::debug!("Critic update {} | loss {:.4}", updates, loss);
                }
                None
            }
            StepOutcome::ActorUpdated { .. } | StepOutcome::Idle => None,
        };
        if let Some(event) = event {
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

/// Apply one command; returns true once the worker must exit
fn handle_command<P: TrainablePolicy, C: Critic>(
    core: &mut TrainerLoop<P, C>,
    command: TrainerCommand,
    events: &Sender<TrainerEvent>,
) -> bool {
    match command {
        TrainerCommand::Dataset(snapshot) => core.set_dataset(snapshot),
        TrainerCommand::Refine { request_id, model } => match P::from_transferable(&model) {
            Ok(policy) => core.enqueue(request_id, policy),
            Err(error) => {
                let _ = events.send(TrainerEvent::Failed { request_id, error });
            }
        },
        TrainerCommand::Stop => {
            for request_id in core.drain() {
                let _ = events.send(TrainerEvent::Cancelled { request_id });
            }
            let _ = events.send(TrainerEvent::Stopped);
            return true;
        }
    }
    false
}
