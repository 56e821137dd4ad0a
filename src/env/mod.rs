//! Simulation and reporting boundaries
//!
//! The core never simulates bodies itself. It consumes an
//! [`ArenaEnvironment`] that can encode observations, push per-part forces
//! and answer a few geometric questions, and it is fed [`Contact`]s and
//! ticks from outside. Progress is published through a [`Reporter`].
//!
//! Every call is keyed by the match slot index, which is also the spatial
//! placement of the match inside the simulation.

pub mod duel;

use crate::multi_agent::GenerationStats;

/// One of the two fighters in a match slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// First fighter
    A,
    /// Second fighter
    B,
}

impl Side {
    /// Both sides, `A` first
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    /// The opponent
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// 0 for `A`, 1 for `B`
    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// A body taking part in a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyRef {
    /// A body part of one of the fighters
    Fighter {
        /// Owning fighter
        side: Side,
        /// Part index
        part: usize,
    },
    /// Anything that belongs to no fighter (ground, walls, props)
    Scenery(u64),
}

impl BodyRef {
    /// Owning fighter, if any
    pub fn side(&self) -> Option<Side> {
        match self {
            BodyRef::Fighter { side, .. } => Some(*side),
            BodyRef::Scenery(_) => None,
        }
    }
}

/// Collision event: `body` ran into `target`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Body reporting the collision
    pub body: BodyRef,
    /// Body it collided with
    pub target: BodyRef,
    /// Velocity of `body`
    pub body_velocity: [f32; 3],
    /// Velocity of `target`
    pub target_velocity: [f32; 3],
}

fn norm(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl Contact {
    /// Speed of `body`
    pub fn body_speed(&self) -> f32 {
        norm(self.body_velocity)
    }

    /// Speed of `target`
    pub fn target_speed(&self) -> f32 {
        norm(self.target_velocity)
    }

    /// Magnitude of the velocity difference
    pub fn relative_speed(&self) -> f32 {
        norm([
            self.body_velocity[0] - self.target_velocity[0],
            self.body_velocity[1] - self.target_velocity[1],
            self.body_velocity[2] - self.target_velocity[2],
        ])
    }
}

/// Simulation consumed by running matches
pub trait ArenaEnvironment {
    /// Length of every encoded observation
    fn observation_dim(&self) -> usize;

    /// Number of actuated parts per fighter
    fn action_dim(&self) -> usize;

    /// Fixed-length observation of `side` in `slot`
    fn encode_observation(&self, slot: usize, side: Side) -> Vec<f32>;

    /// Push a force into one part of a fighter
    fn apply_action(&mut self, slot: usize, side: Side, part: usize, force: [f32; 3]);

    /// Distance between the two fighters of a slot, when known
    fn agent_distance(&self, slot: usize) -> Option<f32>;

    /// Height off the ground of a fighter, when known
    fn agent_height(&self, slot: usize, side: Side) -> Option<f32>;

    /// Put both fighters of a slot back at their starting positions
    fn reset_slot(&mut self, slot: usize);
}

/// Progress sink for a UI or logger
pub trait Reporter {
    /// Scores of a running match changed
    fn on_score_update(&mut self, _slot: usize, _score_a: f32, _score_b: f32) {}

    /// A generation has been fully scored
    fn on_generation_stats(&mut self, _stats: &GenerationStats) {}
}

impl Reporter for () {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.index(), 1);
        assert_eq!(BodyRef::Scenery(3).side(), None);
        assert_eq!(BodyRef::Fighter { side: Side::B, part: 0 }.side(), Some(Side::B));
    }

    #[test]
    fn test_contact_speeds() {
        let contact = Contact {
            body: BodyRef::Fighter { side: Side::A, part: 0 },
            target: BodyRef::Fighter { side: Side::B, part: 0 },
            body_velocity: [3.0, 4.0, 0.0],
            target_velocity: [0.0, 0.0, 0.0],
        };
        assert_eq!(contact.body_speed(), 5.0);
        assert_eq!(contact.target_speed(), 0.0);
        assert_eq!(contact.relative_speed(), 5.0);
    }
}
