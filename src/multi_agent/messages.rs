//! Message types for the generational loop
//!
//! Defines what travels between:
//! - PopulationController → MatchScheduler: contenders awaiting a match
//! - MatchScheduler → PopulationController: one score report per contender
//! - PopulationController → reporting layer: per-generation statistics

use crossbeam_channel::Sender;

use crate::utils::ids::{AgentId, MatchId};

/// An agent handed to the scheduler for evaluation
///
/// The contender owns its policy for the duration of the match; the policy
/// comes back inside the [`ScoreReport`] sent on `reply`.
#[derive(Debug)]
pub struct Contender<P> {
    /// Agent identity
    pub agent_id: AgentId,

    /// Generation the agent is evaluated for
    pub generation: usize,

    /// Policy under evaluation
    pub policy: P,

    /// Where the score report goes; required
    pub reply: Option<Sender<ScoreReport<P>>>,
}

/// Completion of one contender's match
#[derive(Debug)]
pub struct ScoreReport<P> {
    /// Agent identity
    pub agent_id: AgentId,

    /// Generation the agent was evaluated for
    pub generation: usize,

    /// Final score of the agent
    pub score: f32,

    /// The agent's policy, returned to its owner
    pub policy: P,
}

/// One side of a finished match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentOutcome {
    /// Agent identity
    pub id: AgentId,

    /// Final score
    pub final_score: f32,
}

/// Result of a finished match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Slot the match ran in
    pub slot_index: usize,

    /// Match identity
    pub match_id: MatchId,

    /// First contender
    pub agent_a: AgentOutcome,

    /// Second contender
    pub agent_b: AgentOutcome,

    /// Whether the match was cut short by a fatal error
    pub aborted: bool,
}

/// A finished match together with the contenders it gives back
#[derive(Debug)]
pub struct MatchOutcome<P> {
    /// The result
    pub result: MatchResult,

    /// Contenders in `[A, B]` order
    pub contenders: [Contender<P>; 2],
}

/// Statistics of one fully scored generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    /// Generation number, starting at 1
    pub epoch: usize,

    /// Scores of the generation, ascending
    pub scores: Vec<f32>,

    /// Highest score of the generation
    pub best: f32,

    /// Mean score of the generation
    pub mean: f32,

    /// Highest score of the previous generation
    pub previous_best: Option<f32>,
}

impl GenerationStats {
    /// Build statistics from unsorted scores
    pub fn from_scores(epoch: usize, mut scores: Vec<f32>, previous_best: Option<f32>) -> Self {
        scores.sort_by(f32::total_cmp);
        let best = scores.last().copied().unwrap_or(f32::NEG_INFINITY);
        let mean = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f32>() / scores.len() as f32
        };
        Self { epoch, scores, best, mean, previous_best }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_stats() {
        let stats = GenerationStats::from_scores(3, vec![2.0, -1.0, 5.0, 0.0], Some(4.0));
        assert_eq!(stats.scores, vec![-1.0, 0.0, 2.0, 5.0]);
        assert_eq!(stats.best, 5.0);
        assert_eq!(stats.mean, 1.5);
        assert_eq!(stats.previous_best, Some(4.0));
    }
}
