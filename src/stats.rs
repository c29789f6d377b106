//! Pipeline counters.
//!
//! Lock-free counters describing what the pipeline has done since startup.
//! They are exposed on the health endpoint and summarised at shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals for one pipeline instance.
#[derive(Debug)]
pub struct PipelineStats {
    /// Readings added to the buffer
    readings_accepted: AtomicU64,
    /// Readings dropped because the gate was cooling
    readings_discarded: AtomicU64,
    /// Aggregation ticks run
    ticks: AtomicU64,
    /// Position fixes published
    fixes_published: AtomicU64,
    /// Individual subscriber deliveries
    updates_delivered: AtomicU64,
    /// Subscribers dropped after a failed delivery
    subscribers_pruned: AtomicU64,
    started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            readings_accepted: AtomicU64::new(0),
            readings_discarded: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            fixes_published: AtomicU64::new(0),
            updates_delivered: AtomicU64::new(0),
            subscribers_pruned: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_reading(&self, accepted: bool) {
        if accepted {
            self.readings_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.readings_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one published fix and how its fan-out went.
    pub fn record_fix(&self, delivered: usize, pruned: usize) {
        self.fixes_published.fetch_add(1, Ordering::Relaxed);
        self.updates_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.subscribers_pruned
            .fetch_add(pruned as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_discarded: self.readings_discarded.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            fixes_published: self.fixes_published.load(Ordering::Relaxed),
            updates_delivered: self.updates_delivered.load(Ordering::Relaxed),
            subscribers_pruned: self.subscribers_pruned.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable block for logs and the CLI.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Readings accepted: {}\n\
             - Readings discarded (cooldown): {}\n\
             - Aggregation ticks: {}\n\
             - Fixes published: {}\n\
             - Updates delivered: {}\n\
             - Subscribers pruned: {}\n\
             - Uptime: {} seconds",
            stats.readings_accepted,
            stats.readings_discarded,
            stats.ticks,
            stats.fixes_published,
            stats.updates_delivered,
            stats.subscribers_pruned,
            stats.uptime_secs
        )
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub readings_accepted: u64,
    pub readings_discarded: u64,
    pub ticks: u64,
    pub fixes_published: u64,
    pub updates_delivered: u64,
    pub subscribers_pruned: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Shared handle to the counters.
pub type SharedStats = Arc<PipelineStats>;
