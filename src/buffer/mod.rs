//! Trajectory storage
//!
//! Matches stream per-step records into the replay store. Finished runs are
//! turned into discounted-return samples that the trainer draws from.

pub mod replay;

pub use replay::{ReplaySnapshot, ReplayStore, SampleBatch, TrainingSample, TrajectoryStep};
