//! Training statistics
//!
//! Aggregated losses of critic regression and actor fine-tuning.

use std::ops::AddAssign;

/// Statistics accumulated over a number of updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingStats {
    /// Sum of critic regression losses
    pub critic_loss: f64,

    /// Sum of actor losses (negated critic value)
    pub actor_loss: f64,

    /// Critic updates performed
    pub critic_updates: usize,

    /// Actor updates performed
    pub actor_updates: usize,
}

impl TrainingStats {
    /// Create zero-initialized statistics
    pub fn zeros() -> Self {
        Self::default()
    }

    /// Record one critic update
    pub fn record_critic(&mut self, loss: f32) {
        self.critic_loss += f64::from(loss);
        self.critic_updates += 1;
    }

    /// Record one actor update
    pub fn record_actor(&mut self, loss: f32) {
        self.actor_loss += f64::from(loss);
        self.actor_updates += 1;
    }

    /// Mean critic loss, 0 when no update was made
    pub fn mean_critic_loss(&self) -> f64 {
        if self.critic_updates == 0 {
            0.0
        } else {
            self.critic_loss / self.critic_updates as f64
        }
    }

    /// Mean actor loss, 0 when no update was made
    pub fn mean_actor_loss(&self) -> f64 {
        if self.actor_updates == 0 {
            0.0
        } else {
            self.actor_loss / self.actor_updates as f64
        }
    }
}

impl AddAssign<&TrainingStats> for TrainingStats {
    fn add_assign(&mut self, other: &TrainingStats) {
        self.critic_loss += other.critic_loss;
        self.actor_loss += other.actor_loss;
        self.critic_updates += other.critic_updates;
        self.actor_updates += other.actor_updates;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_means() {
        let mut stats = TrainingStats::zeros();
        assert_eq!(stats.mean_actor_loss(), 0.0);
        stats.record_actor(-1.0);
        stats.record_actor(-3.0);
        stats.record_critic(0.5);
        assert_eq!(stats.mean_actor_loss(), -2.0);
        assert_eq!(stats.mean_critic_loss(), 0.5);
    }

    #[test]
    fn test_add_assign() {
        let mut a = TrainingStats::zeros();
        a.record_critic(1.0);
        let mut b = TrainingStats::zeros();
        b.record_critic(2.0);
        b.record_actor(1.0);
        a += &b;
        assert_eq!(a.critic_updates, 2);
        assert_eq!(a.actor_updates, 1);
        assert_eq!(a.critic_loss, 3.0);
    }
}
