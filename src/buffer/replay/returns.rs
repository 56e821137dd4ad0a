//! Score-to-return conversion

/// Per-step rewards from cumulative scores
///
/// `reward[0] = 0`, `reward[i] = score[i] - score[i - 1]`.
pub fn score_deltas(scores: &[f32]) -> Vec<f32> {
    let mut rewards = Vec::with_capacity(scores.len());
    if scores.is_empty() {
        return rewards;
    }
    rewards.push(0.0);
    rewards.extend(scores.windows(2).map(|w| w[1] - w[0]));
    rewards
}

/// Discounted returns by backward recursion `G[i] = r[i] + discount * G[i + 1]`
pub fn discounted_returns(rewards: &[f32], discount: f32) -> Vec<f32> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running = 0.0;
    for (ret, &reward) in returns.iter_mut().zip(rewards).rev() {
        running = reward + discount * running;
        *ret = running;
    }
    returns
}
