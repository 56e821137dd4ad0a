//! Utility types shared across components

pub mod ids;
