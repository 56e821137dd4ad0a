//! Generational loop
//!
//! The controller owns every agent of the current generation that is not
//! out being evaluated. It submits agents to the scheduler, collects one
//! score report per agent, and once the last one is in, evolves the next
//! generation:
//!
//! 1. rank agents by `max(score, previous_score)` and keep the top
//!    `seeds_n` as survivors; everyone else is dropped
//! 2. re-submit the survivors unchanged
//! 3. breed offspring from the survivors (crossover then mutation), with
//!    optional noisy clones, topped up to `population_size` and padded to
//!    an even count
//! 4. route each offspring through the trainer before submitting it

use std::collections::{BTreeMap, HashMap};

use crossbeam_channel::{Receiver, Sender};
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{
    messages::{Contender, GenerationStats, ScoreReport},
    scheduler::Submit,
};
use crate::{
    buffer::ReplayStore,
    error::{ColosseumError, Result},
    policy::Policy,
    train::{Refinement, Trainer, TrainerEvent},
    utils::ids::{AgentId, IdGenerator, RequestId},
};

/// How offspring parents are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionPolicy {
    /// Every unordered pair of survivors, at every crossover fraction
    #[default]
    AllPairs,
    /// Parents sampled in proportion to their shifted fitness
    FitnessProportional,
}

/// Evolution parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionConfig {
    /// Agents per generation
    pub population_size: usize,
    /// Survivors per generation
    pub seeds_n: usize,
    /// Fraction of parameters touched by offspring mutation
    pub mutation_rate: f32,
    /// Offspring mutation noise
    pub mutation_std: f32,
    /// Noise scattering the first generation
    pub initial_mutation_std: f32,
    /// Noise of the seed clones; 0 disables them
    pub additive_noise_std: f32,
    /// Interpolation fractions per parent pair
    pub crossover_splits: usize,
    /// Parent selection
    pub selection: SelectionPolicy,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 10,
            seeds_n: 3,
            mutation_rate: 0.5,
            mutation_std: 0.1,
            initial_mutation_std: 10.0,
            additive_noise_std: 0.0,
            crossover_splits: 1,
            selection: SelectionPolicy::AllPairs,
        }
    }
}

/// Builds fresh policies for the first generation
pub type PolicyFactory<P> = Box<dyn FnMut(&mut StdRng) -> P + Send>;

/// A member of the current generation
#[derive(Debug)]
pub struct Agent<P> {
    /// Agent identity
    pub id: AgentId,

    /// Score of the current generation, once evaluated
    pub score: Option<f32>,

    /// Best score carried over from earlier generations
    pub previous_score: Option<f32>,

    /// Generation the agent belongs to
    pub generation: usize,

    /// `None` while the policy is out being evaluated
    policy: Option<P>,
}

impl<P> Agent<P> {
    fn new(id: AgentId, generation: usize, policy: P) -> Self {
        Self { id, score: None, previous_score: None, generation, policy: Some(policy) }
    }

    /// `max(score, previous_score)`, with unset values as negative infinity
    pub fn fitness(&self) -> f32 {
        let score = self.score.unwrap_or(f32::NEG_INFINITY);
        score.max(self.previous_score.unwrap_or(f32::NEG_INFINITY))
    }

    /// The policy, when the controller currently holds it
    pub fn policy(&self) -> Option<&P> {
        self.policy.as_ref()
    }
}

/// Selection, crossover and mutation over pairwise match scores
pub struct PopulationController<P> {
    config: EvolutionConfig,
    factory: PolicyFactory<P>,
    rng: StdRng,
    ids: IdGenerator,
    trainer: Trainer,
    reply_tx: Sender<ScoreReport<P>>,
    reply_rx: Receiver<ScoreReport<P>>,
    agents: BTreeMap<AgentId, Agent<P>>,
    awaiting: HashMap<RequestId, AgentId>,
    pending_count: usize,
    epoch: usize,
    best: Option<f32>,
    previous_best: Option<f32>,
    history: Vec<GenerationStats>,
}

impl<P> std::fmt::Debug for PopulationController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulationController")
            .field("config", &self.config)
            .field("epoch", &self.epoch)
            .field("agents", &self.agents.len())
            .field("pending_count", &self.pending_count)
            .field("awaiting", &self.awaiting.len())
            .finish_non_exhaustive()
    }
}

impl<P: Policy> PopulationController<P> {
    /// Create a controller; nothing is submitted until [`start`](Self::start)
    pub fn new(
        config: EvolutionConfig,
        factory: PolicyFactory<P>,
        trainer: Trainer,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            factory,
            rng,
            ids: IdGenerator::new(),
            trainer,
            reply_tx,
            reply_rx,
            agents: BTreeMap::new(),
            awaiting: HashMap::new(),
            pending_count: 0,
            epoch: 0,
            best: None,
            previous_best: None,
            history: Vec::new(),
        }
    }

    /// Current generation, 0 before `start`
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Agents of the current generation not yet scored
    pub fn pending(&self) -> usize {
        self.pending_count
    }

    /// Offspring still with the trainer
    pub fn awaiting_refinement(&self) -> usize {
        self.awaiting.len()
    }

    /// Best score seen so far in the current generation
    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Statistics of every completed generation
    pub fn history(&self) -> &[GenerationStats] {
        &self.history
    }

    /// Members of the current generation, by id
    pub fn agents(&self) -> impl Iterator<Item = &Agent<P>> {
        self.agents.values()
    }

    /// Member of the current generation
    pub fn agent(&self, id: AgentId) -> Option<&Agent<P>> {
        self.agents.get(&id)
    }

    /// The trainer offspring are routed through
    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Mutable access to the trainer
    pub fn trainer_mut(&mut self) -> &mut Trainer {
        &mut self.trainer
    }

    /// Create and submit the first generation
    ///
    /// Fresh policies are mutated with `rate = 1.0` and
    /// `initial_mutation_std` to spread them out. Calling it again does
    /// nothing.
    pub fn start<S: Submit<P>>(&mut self, scheduler: &mut S) -> Result<()> {
        if self.epoch > 0 {
            return Ok(());
        }
        self.epoch = 1;
        for _ in 0..self.config.population_size {
            let mut policy = (self.factory)(&mut self.rng);
            policy.mutate(&mut self.rng, 1.0, self.config.initial_mutation_std);
            let id = self.ids.agent();
            self.agents.insert(id, Agent::new(id, self.epoch, policy));
            self.submit_agent(id, scheduler)?;
        }
        self.pending_count = self.config.population_size;
        tracing::info!("Generation 1 started with {} agents", self.pending_count);
        Ok(())
    }

    fn submit_agent<S: Submit<P>>(&mut self, id: AgentId, scheduler: &mut S) -> Result<()> {
        let Some(agent) = self.agents.get_mut(&id) else {
            return Err(ColosseumError::UnknownAgent(id));
        };
        let Some(policy) = agent.policy.take() else {
            return Err(ColosseumError::DuplicateCompletion(format!("{id} is already submitted")));
        };
        scheduler.submit(Contender {
            agent_id: id,
            generation: agent.generation,
            policy,
            reply: Some(self.reply_tx.clone()),
        })
    }

    /// Record the score of one evaluated agent
    ///
    /// Rejects reports for unknown agents, for another generation, and for
    /// agents already scored.
    pub fn on_agent_scored(&mut self, report: ScoreReport<P>) -> Result<()> {
        let ScoreReport { agent_id, generation, score, policy } = report;
        let Some(agent) = self.agents.get_mut(&agent_id) else {
            return Err(ColosseumError::DuplicateCompletion(format!("{agent_id} is not in play")));
        };
        if generation != self.epoch || agent.score.is_some() || agent.policy.is_some() {
            return Err(ColosseumError::DuplicateCompletion(agent_id.to_string()));
        }
        agent.score = Some(score);
        agent.policy = Some(policy);
        self.pending_count = self.pending_count.saturating_sub(1);
        self.best = Some(self.best.map_or(score, |best| best.max(score)));
        tracing::debug!("{} scored {:.3}, {} pending", agent_id, score, self.pending_count);
        Ok(())
    }

    /// Whether every agent of the generation has been scored
    pub fn generation_complete(&self) -> bool {
        self.epoch > 0 && self.pending_count == 0 && self.awaiting.is_empty()
    }

    /// Collect score reports and trainer answers, evolving when the
    /// generation is complete
    pub fn poll<S: Submit<P>>(
        &mut self,
        scheduler: &mut S,
        replay: &ReplayStore,
    ) -> Result<Option<GenerationStats>> {
        let reports: Vec<ScoreReport<P>> = self.reply_rx.try_iter().collect();
        for report in reports {
            if let Err(e) = self.on_agent_scored(report) {
                tracing::warn!("Rejected score report: {}", e);
            }
        }

        for event in self.trainer.try_events() {
            self.on_trainer_event(event, scheduler)?;
        }

        if self.generation_complete() {
            return self.next_generation(scheduler, replay).map(Some);
        }
        Ok(None)
    }

    /// Submit a refined offspring, or its unrefined copy when training failed
    pub fn on_trainer_event<S: Submit<P>>(
        &mut self,
        event: TrainerEvent,
        scheduler: &mut S,
    ) -> Result<()> {
        let Some(request_id) = event.request_id() else {
            return Ok(());
        };
        let Some(agent_id) = self.awaiting.remove(&request_id) else {
            tracing::warn!("Ignoring duplicate trainer answer for {}", request_id);
            return Ok(());
        };

        match event {
            TrainerEvent::Refined { model, stats, .. } => match P::from_transferable(&model) {
                Ok(policy) => {
                    tracing::debug!(
                        "{} refined (mean actor loss {:.4})",
                        agent_id,
                        stats.mean_actor_loss()
                    );
                    if let Some(agent) = self.agents.get_mut(&agent_id) {
                        agent.policy = Some(policy);
                    }
                }
                Err(e) => tracing::warn!("Refined model of {} unusable: {}", agent_id, e),
            },
            TrainerEvent::Failed { error, .. } => {
                tracing::warn!("Refinement of {} failed: {}", agent_id, error);
            }
            TrainerEvent::Cancelled { .. } => {
                tracing::debug!("Refinement of {} cancelled", agent_id);
            }
            TrainerEvent::Stopped => {}
        }
        self.submit_agent(agent_id, scheduler)
    }

    /// Evolve the scored generation into the next one
    fn next_generation<S: Submit<P>>(
        &mut self,
        scheduler: &mut S,
        replay: &ReplayStore,
    ) -> Result<GenerationStats> {
        let scores: Vec<f32> = self.agents.values().map(|a| a.score.unwrap_or(0.0)).collect();
        let stats = GenerationStats::from_scores(self.epoch, scores, self.previous_best);
        tracing::info!(
            "Generation {} complete: best {:.3}, mean {:.3}",
            stats.epoch,
            stats.best,
            stats.mean
        );
        self.history.push(stats.clone());

        if let Err(e) = self.trainer.next_epoch(replay) {
            tracing::warn!("Trainer did not receive the replay data: {}", e);
        }

        let mut ranked: Vec<Agent<P>> = std::mem::take(&mut self.agents).into_values().collect();
        ranked.sort_by(|a, b| a.fitness().total_cmp(&b.fitness()));
        let seeds_n = self.config.seeds_n.min(ranked.len());
        let mut seeds = ranked.split_off(ranked.len() - seeds_n);
        for eliminated in &ranked {
            tracing::debug!("{} eliminated with fitness {:.3}", eliminated.id, eliminated.fitness());
        }
        drop(ranked);

        self.epoch += 1;
        for seed in &mut seeds {
            seed.previous_score = Some(seed.fitness());
            seed.score = None;
            seed.generation = self.epoch;
        }

        let parents: Vec<(P, f32)> = seeds
            .iter()
            .filter_map(|s| s.policy.as_ref().map(|p| (p.clone(), s.fitness())))
            .collect();
        let offspring = self.breed(&parents);

        self.pending_count = seeds.len() + offspring.len();
        self.previous_best = self.best.take();

        let seed_ids: Vec<AgentId> = seeds.iter().map(|s| s.id).collect();
        self.agents.extend(seeds.into_iter().map(|s| (s.id, s)));
        for id in seed_ids {
            self.submit_agent(id, scheduler)?;
        }

        for child in offspring {
            let id = self.ids.agent();
            let fallback = child.clone();
            match self.trainer.refine(child) {
                Ok(Refinement::Immediate(policy)) => {
                    self.agents.insert(id, Agent::new(id, self.epoch, policy));
                    self.submit_agent(id, scheduler)?;
                }
                Ok(Refinement::Pending(request_id)) => {
                    self.agents.insert(id, Agent::new(id, self.epoch, fallback));
                    self.awaiting.insert(request_id, id);
                }
                Err(e) => {
                    tracing::warn!("Could not refine {}: {}", id, e);
                    self.agents.insert(id, Agent::new(id, self.epoch, fallback));
                    self.submit_agent(id, scheduler)?;
                }
            }
        }

        tracing::info!(
            "Generation {} started with {} agents ({} refining)",
            self.epoch,
            self.pending_count,
            self.awaiting.len()
        );
        Ok(stats)
    }

    /// Offspring of the survivors, padded so survivors plus offspring is
    /// at least `population_size` and even
    fn breed(&mut self, parents: &[(P, f32)]) -> Vec<P> {
        let mut offspring = Vec::new();
        if parents.is_empty() {
            return offspring;
        }
        let splits = self.config.crossover_splits;

        if self.config.selection == SelectionPolicy::AllPairs {
            for i in 0..parents.len() {
                for j in (i + 1)..parents.len() {
                    for k in 1..=splits {
                        let fraction = k as f32 / (splits + 1) as f32;
                        if let Some(child) = self.cross(&parents[i].0, &parents[j].0, fraction) {
                            offspring.push(child);
                        }
                    }
                }
            }
        }

        if self.config.additive_noise_std > 0.0 {
            for (parent, _) in parents {
                let mut clone = parent.clone();
                clone.mutate(&mut self.rng, 1.0, self.config.additive_noise_std);
                offspring.push(clone);
            }
        }

        let weights = shifted_weights(parents);
        let mut round = 0;
        while parents.len() + offspring.len() < self.config.population_size {
            let (a, b) = self.pick_pair(&weights);
            let fraction = (round % splits.max(1) + 1) as f32 / (splits.max(1) + 1) as f32;
            round += 1;
            let child = match self.cross(&parents[a].0, &parents[b].0, fraction) {
                Some(child) => child,
                None => {
                    let mut clone = parents[a].0.clone();
                    clone.mutate(&mut self.rng, self.config.mutation_rate, self.config.mutation_std);
                    clone
                }
            };
            offspring.push(child);
        }

        if (parents.len() + offspring.len()) % 2 == 1 {
            let extra = offspring.last().cloned().unwrap_or_else(|| parents[0].0.clone());
            offspring.push(extra);
        }
        offspring
    }

    fn cross(&mut self, a: &P, b: &P, fraction: f32) -> Option<P> {
        match a.combine(b, fraction) {
            Ok(mut child) => {
                child.mutate(&mut self.rng, self.config.mutation_rate, self.config.mutation_std);
                Some(child)
            }
            Err(e) => {
                tracing::warn!("Crossover failed: {}", e);
                None
            }
        }
    }

    fn pick(&mut self, weights: &[f32]) -> usize {
        match WeightedIndex::new(weights) {
            Ok(index) => index.sample(&mut self.rng),
            Err(_) => self.rng.gen_range(0..weights.len()),
        }
    }

    fn pick_pair(&mut self, weights: &[f32]) -> (usize, usize) {
        let n = weights.len();
        let a = self.pick(weights);
        let mut b = self.pick(weights);
        if b == a && n > 1 {
            b = (a + 1 + self.rng.gen_range(0..n - 1)) % n;
        }
        (a, b)
    }
}

/// Fitness shifted to be non-negative; all zero when every parent ties
fn shifted_weights<P>(parents: &[(P, f32)]) -> Vec<f32> {
    let finite = |f: f32| if f.is_finite() { f } else { 0.0 };
    let min = parents.iter().map(|(_, f)| finite(*f)).fold(f32::INFINITY, f32::min);
    parents.iter().map(|(_, f)| finite(*f) - min).collect()
}
