//! Tests for replay store functionality

use rand::{rngs::StdRng, SeedableRng};

use super::*;
use crate::utils::ids::{AgentId, MatchId};

fn run(n: u64) -> RunId {
    RunId::new(MatchId(n), AgentId(n))
}

fn step(run_id: RunId, t: f64, score: f32) -> TrajectoryStep {
    TrajectoryStep {
        run_id,
        state: Some(vec![t as f32]),
        action: Some(vec![score]),
        score,
        timestamp: t,
        done: false,
    }
}

#[test]
fn test_score_deltas() {
    assert_eq!(score_deltas(&[]), Vec::<f32>::new());
    assert_eq!(score_deltas(&[5.0]), vec![0.0]);
    assert_eq!(score_deltas(&[1.0, 3.0, 2.0]), vec![0.0, 2.0, -1.0]);
}

#[test]
fn test_discounted_returns() {
    let returns = discounted_returns(&[0.0, 2.0, -1.0], 0.5);
    // G2 = -1, G1 = 2 + 0.5 * -1 = 1.5, G0 = 0 + 0.5 * 1.5 = 0.75
    assert_eq!(returns, vec![0.75, 1.5, -1.0]);
}

#[test]
fn test_mark_complete_emits_one_sample_per_step() {
    let mut store = ReplayStore::new(100, 0.9);
    let id = run(1);
    for (i, score) in [0.0, 1.0, 4.0, 4.5].iter().enumerate() {
        store.record(step(id, i as f64 * 16.0, *score)).unwrap();
    }

    let emitted = store.mark_complete(id, 4.5);
    assert_eq!(emitted, 4);
    assert_eq!(store.len(), 4);
    assert_eq!(store.open_runs(), 0);

    let last = &store.samples()[3];
    assert!(last.terminal);
    assert_eq!(last.next_state, last.state);
    assert_eq!(last.next_action, last.action);
    // Terminal return equals its own reward
    assert!((last.reward - 0.5).abs() < 1e-6);

    let first = &store.samples()[0];
    assert!(!first.terminal);
    assert_eq!(first.next_state, store.samples()[1].state);
}

#[test]
fn test_steps_sorted_by_timestamp() {
    let mut store = ReplayStore::new(10, 1.0);
    let id = run(2);
    store.record(step(id, 32.0, 3.0)).unwrap();
    store.record(step(id, 0.0, 0.0)).unwrap();
    store.record(step(id, 16.0, 1.0)).unwrap();
    store.mark_complete(id, 3.0);

    let states: Vec<f32> = store.samples().iter().map(|s| s.state[0]).collect();
    assert_eq!(states, vec![0.0, 16.0, 32.0]);
    // rewards [0, 1, 2], discount 1 => returns [3, 3, 2]
    let rewards: Vec<f32> = store.samples().iter().map(|s| s.reward).collect();
    assert_eq!(rewards, vec![3.0, 3.0, 2.0]);
}

#[test]
fn test_terminal_score_overrides_latest_step() {
    let mut store = ReplayStore::new(10, 1.0);
    let id = run(3);
    store.record(step(id, 0.0, 0.0)).unwrap();
    store.record(step(id, 16.0, 1.0)).unwrap();
    store.mark_complete(id, 10.0);
    assert!((store.samples()[1].reward - 10.0).abs() < 1e-6);
}

#[test]
fn test_missing_state_rejected_unless_done() {
    let mut store = ReplayStore::new(10, 0.99);
    let id = run(4);
    let mut bad = step(id, 0.0, 0.0);
    bad.state = None;
    assert!(matches!(store.record(bad.clone()), Err(ColosseumError::InvalidStep { .. })));

    store.record(step(id, 0.0, 0.0)).unwrap();
    store.record(step(id, 16.0, 2.0)).unwrap();
    bad.done = true;
    bad.timestamp = 32.0;
    assert_eq!(store.record(bad).unwrap(), 2);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_run_without_steps_contributes_nothing() {
    let mut store = ReplayStore::new(10, 0.99);
    assert_eq!(store.mark_complete(run(5), 1.0), 0);

    let mut done = step(run(6), 0.0, 0.0);
    done.action = None;
    done.done = true;
    assert_eq!(store.record(done).unwrap(), 0);
    assert!(store.is_empty());
}

#[test]
fn test_done_without_action_closes_run_with_buffered_steps() {
    let mut store = ReplayStore::new(10, 1.0);
    let id = run(8);
    store.record(step(id, 0.0, 0.0)).unwrap();
    store.record(step(id, 16.0, 1.0)).unwrap();

    let mut done = step(id, 32.0, 9.0);
    done.action = None;
    done.done = true;
    assert_eq!(store.record(done).unwrap(), 2);
    assert_eq!(store.open_runs(), 0);

    // The incomplete record is not stored and its score is not applied
    let last = &store.samples()[1];
    assert!(last.terminal);
    assert_eq!(last.state, vec![16.0]);
    assert!((last.reward - 1.0).abs() < 1e-6);

    // Later steps of the same run open a fresh trajectory
    store.record(step(id, 48.0, 2.0)).unwrap();
    assert_eq!(store.open_runs(), 1);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_done_step_completes_run() {
    let mut store = ReplayStore::new(10, 0.99);
    let id = run(7);
    store.record(step(id, 0.0, 0.0)).unwrap();
    let mut last = step(id, 16.0, 1.0);
    last.done = true;
    assert_eq!(store.record(last).unwrap(), 2);
    assert!(store.samples()[1].terminal);
}

#[test]
fn test_circular_overwrite_keeps_newest() {
    let mut store = ReplayStore::new(3, 1.0);
    for r in 0..5 {
        let id = run(10 + r);
        store.record(step(id, r as f64, 0.0)).unwrap();
        store.mark_complete(id, 0.0);
    }
    assert_eq!(store.len(), 3);

    let snapshot = store.snapshot();
    let order: Vec<f32> = snapshot.buffer.iter().map(|s| s.state[0]).collect();
    assert_eq!(order, vec![2.0, 3.0, 4.0]);
    assert_eq!(snapshot.capacity, 3);

    let rebuilt = ReplayStore::from_snapshot(snapshot.clone());
    assert_eq!(rebuilt.snapshot(), snapshot);
}

#[test]
fn test_sample_with_replacement() {
    let mut store = ReplayStore::new(10, 0.99);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(store.sample(4, &mut rng).is_none());

    let id = run(20);
    store.record(step(id, 0.0, 0.0)).unwrap();
    store.mark_complete(id, 1.0);

    let batch = store.sample(5, &mut rng).unwrap();
    assert_eq!(batch.len(), 5);
    assert_eq!(batch.states.len(), 5);
    assert!(batch.terminals.iter().all(|&t| t));
}

#[test]
fn test_snapshot_serializes_camel_case() {
    let mut store = ReplayStore::new(4, 0.5);
    let id = run(30);
    store.record(step(id, 0.0, 0.0)).unwrap();
    store.mark_complete(id, 0.0);
    let json = serde_json::to_value(store.snapshot()).unwrap();
    assert!(json["buffer"][0].get("nextState").is_some());
    assert_eq!(json["discount"], 0.5);
}
