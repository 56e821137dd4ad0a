//! Collision scoring
//!
//! Only a faster impactor scores. The collision score is the relative speed
//! minus the distance between the two fighters (plain relative speed when
//! the distance is unknown). The hit fighter receives a small reward for
//! its height off the ground and loses the collision score; the impactor
//! gains it. Striking anything that is not the opponent costs the impactor
//! a fixed penalty scaled by `off_target_penalty_fraction`.

use crate::env::Contact;

/// Scoring parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Force applied per unit of action
    pub max_force: f32,
    /// Reward per unit of height of the hit fighter
    pub height_reward_scale: f32,
    /// Penalty for striking scenery
    pub off_target_penalty: f32,
    /// Fraction of the penalty applied
    pub off_target_penalty_fraction: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_force: 25.0,
            height_reward_scale: 0.01,
            off_target_penalty: 20.0,
            off_target_penalty_fraction: 1.0,
        }
    }
}

/// Score change per side (`[A, B]`) caused by one contact
///
/// `None` when the contact does not score: self-collisions, contacts where
/// the impactor is not strictly faster than its target, and contacts
/// between two pieces of scenery.
pub fn score_contact(
    contact: &Contact,
    distance: Option<f32>,
    target_height: Option<f32>,
    config: &ScoringConfig,
) -> Option<[f32; 2]> {
    let body_side = contact.body.side();
    let target_side = contact.target.side();

    if body_side.is_none() && target_side.is_none() {
        return None;
    }
    if body_side.is_some() && body_side == target_side {
        return None;
    }
    if contact.body_speed() <= contact.target_speed() {
        return None;
    }

    let score = contact.relative_speed() - distance.unwrap_or(0.0);
    let mut delta = [0.0; 2];

    if let Some(hit) = target_side {
        let height = target_height.unwrap_or(0.0).max(0.0);
        delta[hit.index()] += height * config.height_reward_scale - score;
    }
    if let Some(hitter) = body_side {
        if target_side.is_some() {
            delta[hitter.index()] += score;
        } else {
            delta[hitter.index()] -= config.off_target_penalty * config.off_target_penalty_fraction;
        }
    }
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{BodyRef, Side};

    fn fighter(side: Side) -> BodyRef {
        BodyRef::Fighter { side, part: 0 }
    }

    fn contact(body: BodyRef, target: BodyRef, vb: f32, vt: f32) -> Contact {
        Contact { body, target, body_velocity: [vb, 0.0, 0.0], target_velocity: [vt, 0.0, 0.0] }
    }

    #[test]
    fn test_slower_impactor_scores_nothing() {
        let c = contact(fighter(Side::A), fighter(Side::B), 1.0, 3.0);
        assert_eq!(score_contact(&c, Some(0.5), Some(0.0), &ScoringConfig::default()), None);
    }

    #[test]
    fn test_equal_speed_scores_nothing() {
        let c = contact(fighter(Side::A), fighter(Side::B), 2.0, -2.0);
        assert_eq!(score_contact(&c, None, None, &ScoringConfig::default()), None);
    }

    #[test]
    fn test_self_collision_is_skipped() {
        let c = contact(fighter(Side::A), BodyRef::Fighter { side: Side::A, part: 2 }, 5.0, 0.0);
        assert_eq!(score_contact(&c, None, None, &ScoringConfig::default()), None);
    }

    #[test]
    fn test_hit_transfers_score() {
        let config = ScoringConfig { height_reward_scale: 0.5, ..ScoringConfig::default() };
        // relative speed 10, distance 1 => score 9; hit fighter at height 2
        let c = contact(fighter(Side::B), fighter(Side::A), -8.0, 2.0);
        let delta = score_contact(&c, Some(1.0), Some(2.0), &config).unwrap();
        assert_eq!(delta, [2.0 * 0.5 - 9.0, 9.0]);
    }

    #[test]
    fn test_negative_height_is_clamped() {
        let c = contact(fighter(Side::A), fighter(Side::B), 4.0, 0.0);
        let delta = score_contact(&c, None, Some(-3.0), &ScoringConfig::default()).unwrap();
        assert_eq!(delta, [4.0, -4.0]);
    }

    #[test]
    fn test_off_target_hit_is_penalized() {
        let config = ScoringConfig {
            off_target_penalty: 20.0,
            off_target_penalty_fraction: 0.25,
            ..ScoringConfig::default()
        };
        let c = contact(fighter(Side::A), BodyRef::Scenery(0), 6.0, 0.0);
        assert_eq!(score_contact(&c, Some(1.0), None, &config), Some([-5.0, 0.0]));
    }

    #[test]
    fn test_scenery_hitting_fighter_only_affects_target() {
        let c = contact(BodyRef::Scenery(1), fighter(Side::B), 3.0, 1.0);
        let delta = score_contact(&c, None, Some(0.0), &ScoringConfig::default()).unwrap();
        assert_eq!(delta, [0.0, -2.0]);
    }
}
