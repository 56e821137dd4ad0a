//! Identifiers for agents, matches, trajectory runs and worker requests
//!
//! Every id is drawn from a monotonic counter, so ids never collide no
//! matter how quickly agents are created.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent in the population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

/// Unique identifier for a single match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchId(pub u64);

/// Correlates a worker request with its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// One agent's trajectory within one match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    /// Match the trajectory was recorded in
    pub match_id: MatchId,
    /// Agent that produced it
    pub agent_id: AgentId,
}

impl RunId {
    /// Trajectory of `agent_id` in `match_id`
    pub fn new(match_id: MatchId, agent_id: AgentId) -> Self {
        Self { match_id, agent_id }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "match-{}", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.match_id, self.agent_id)
    }
}

/// Monotonic id source
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Next agent id
    pub fn agent(&self) -> AgentId {
        AgentId(self.next_raw())
    }

    /// Next match id
    pub fn match_id(&self) -> MatchId {
        MatchId(self.next_raw())
    }

    /// Next request id
    pub fn request(&self) -> RequestId {
        RequestId(self.next_raw())
    }
}
