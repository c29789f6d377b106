//! Core estimation pipeline for the beacon tracker.
//!
//! This module contains:
//! - Bounded reading windows per anchor
//! - The path-loss model and least-squares position solver
//! - The post-fix cooldown gate

pub mod buffer;
pub mod cooldown;
pub mod estimator;
pub mod types;

// Re-export commonly used types
pub use buffer::{ReadingBuffer, ReadingWindow, DEFAULT_WINDOW_SIZE};
pub use cooldown::{CooldownGate, CooldownPhase, DEFAULT_COOLDOWN};
pub use estimator::{
    rssi_to_distance, PathLossModel, PositionEstimator, Solution, SolverConfig, MIN_ANCHORS,
};
pub use types::{AggregatedSample, Position, PositionEstimate, Reading, DEFAULT_TAG_ID};
