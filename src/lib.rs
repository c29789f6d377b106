//! Beacon Tracker - real-time RSSI multilateration.
//!
//! This library estimates the 2-D position of a tag from signal-strength
//! readings reported by fixed anchors and streams every fix to live observers.
//!
//! # Pipeline
//!
//! - **Buffering**: the last 5 readings per anchor are kept, oldest evicted first
//! - **Aggregation**: every 5 seconds, anchors with a full window are averaged
//! - **Estimation**: averaged RSSI → distance (log-distance path loss), then a
//!   Levenberg-Marquardt solve from the anchors' centroid
//! - **Cooldown**: after a fix, input is ignored for 5 seconds and the buffer is reset
//! - **Broadcast**: fixes are pushed to every subscriber; new subscribers first
//!   receive the anchor layout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Beacon Tracker                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Reading   │──▶│ Aggregation │──▶│  Position   │       │
//! │  │   Buffer    │   │  Scheduler  │◀──│  Estimator  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         ▲                 │                                  │
//! │         │                 ▼                                  │
//! │  ┌─────────────┐   ┌─────────────┐                         │
//! │  │  Cooldown   │◀──│  Broadcast  │──▶ subscribers           │
//! │  │    Gate     │   │     Hub     │                         │
//! │  └─────────────┘   └─────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use beacon_tracker::{AggregationScheduler, AnchorRegistry, BroadcastHub, PipelineConfig, Reading};
//!
//! # async fn demo() {
//! let registry = Arc::new(AnchorRegistry::from_points([
//!     ("A1", 0.0, 0.0),
//!     ("A2", 10.0, 0.0),
//!     ("A3", 5.0, 10.0),
//! ]));
//! let hub = Arc::new(BroadcastHub::new(&registry));
//! let scheduler = AggregationScheduler::new(PipelineConfig::default(), registry, hub.clone());
//!
//! let mut subscription = hub.subscribe().await;
//! scheduler.ingest(Reading::new("A1", -78)).await;
//! scheduler.tick().await;
//! # }
//! ```

pub mod anchors;
pub mod broadcast;
pub mod command;
pub mod config;
pub mod core;
pub mod scheduler;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use anchors::{AnchorDescriptor, AnchorError, AnchorRegistry};
pub use broadcast::{BroadcastHub, BroadcastReport, ServerMessage, SubscriberId, Subscription};
pub use command::{CommandDispatcher, CommandError, LoggingDispatcher, TagAction, TagCommand};
pub use config::{Config, ConfigError};
pub use core::{
    rssi_to_distance, AggregatedSample, CooldownGate, CooldownPhase, PathLossModel, Position,
    PositionEstimate, PositionEstimator, Reading, ReadingBuffer,
};
pub use scheduler::{AggregationScheduler, IngestOutcome, PipelineConfig, TickOutcome};
pub use stats::{PipelineStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
