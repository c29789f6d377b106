//! Periodic aggregation.
//!
//! The scheduler owns the reading buffer and the cooldown gate behind a single
//! lock. Ingestion, the gate check and the tick's buffer snapshot all happen
//! under that lock, so a reading that lands before a tick is always seen by it
//! and the gate can never reopen halfway through a tick.
//!
//! Lock order is pipeline state, then the hub's subscriber set: a tick
//! broadcasts while holding the state lock. The hub must never call back into
//! the scheduler, and its fan-out only uses `try_send`.
//!
//! Each tick:
//! 1. does nothing while the gate is cooling;
//! 2. averages every full window of each tag;
//! 3. solves for every tag with at least [`MIN_ANCHORS`] full windows;
//! 4. publishes the fixes, closes the gate and clears the buffer.

use crate::anchors::AnchorRegistry;
use crate::broadcast::BroadcastHub;
use crate::core::buffer::{ReadingBuffer, DEFAULT_WINDOW_SIZE};
use crate::core::cooldown::{CooldownGate, CooldownPhase, DEFAULT_COOLDOWN};
use crate::core::estimator::{PositionEstimator, MIN_ANCHORS};
use crate::core::types::{PositionEstimate, Reading};
use crate::stats::{PipelineStats, SharedStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};

/// Default period between aggregation ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Samples averaged per anchor
    pub window_size: usize,
    /// Period between aggregation ticks
    pub tick_interval: Duration,
    /// Dwell after a published fix
    pub cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// What happened to an ingested reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Added to its window with this arrival number
    Buffered { seq: u64 },
    /// Dropped because the gate is cooling
    Discarded,
}

impl IngestOutcome {
    pub fn is_buffered(&self) -> bool {
        matches!(self, IngestOutcome::Buffered { .. })
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Gate closed; nothing examined
    Cooling { remaining: Duration },
    /// No tag had enough full windows
    InsufficientAnchors { full: usize },
    /// Enough windows, but too few of them belong to known anchors
    NoEstimate,
    /// Fixes were broadcast and the gate closed
    Published { fixes: Vec<PositionEstimate> },
}

struct PipelineState {
    buffer: ReadingBuffer,
    gate: CooldownGate,
}

/// Drives buffer → estimator → hub and owns the cooldown gate.
pub struct AggregationScheduler {
    state: Mutex<PipelineState>,
    registry: Arc<AnchorRegistry>,
    estimator: PositionEstimator,
    hub: Arc<BroadcastHub>,
    stats: SharedStats,
    tick_interval: Duration,
}

impl AggregationScheduler {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<AnchorRegistry>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self::with_stats(config, registry, hub, Arc::new(PipelineStats::new()))
    }

    pub fn with_stats(
        config: PipelineConfig,
        registry: Arc<AnchorRegistry>,
        hub: Arc<BroadcastHub>,
        stats: SharedStats,
    ) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                buffer: ReadingBuffer::new(config.window_size),
                gate: CooldownGate::new(config.cooldown),
            }),
            registry,
            estimator: PositionEstimator::default(),
            hub,
            stats,
            tick_interval: config.tick_interval,
        }
    }

    /// Use a custom estimator calibration.
    pub fn with_estimator(mut self, estimator: PositionEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<AnchorRegistry> {
        &self.registry
    }

    /// Buffer a reading unless the gate is cooling.
    ///
    /// The caller is acknowledged either way.
    pub async fn ingest(&self, reading: Reading) -> IngestOutcome {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if !state.gate.is_open(now) {
            self.stats.record_reading(false);
            tracing::debug!(
                anchor = %reading.anchor_id,
                rssi = reading.rssi,
                "Cooling down, reading discarded"
            );
            return IngestOutcome::Discarded;
        }

        let tag = reading.tag_id.clone();
        let anchor = reading.anchor_id.clone();
        let seq = state.buffer.ingest(reading);
        self.stats.record_reading(true);

        tracing::debug!(
            tag = %tag,
            anchor = %anchor,
            buffered = state.buffer.window(&tag, &anchor).map(|w| w.len()).unwrap_or(0),
            "Reading buffered"
        );

        IngestOutcome::Buffered { seq }
    }

    /// Run one aggregation cycle.
    pub async fn tick(&self) -> TickOutcome {
        self.stats.record_tick();
        let mut state = self.state.lock().await;

        let now = Instant::now();
        if !state.gate.is_open(now) {
            return TickOutcome::Cooling {
                remaining: state.gate.remaining(now),
            };
        }

        let tags: Vec<String> = state.buffer.tags().map(str::to_string).collect();
        let mut most_full = 0;
        let mut fixes = Vec::new();

        for tag in &tags {
            let samples = state.buffer.aggregate(tag);
            most_full = most_full.max(samples.len());

            tracing::debug!(
                tag = %tag,
                full_anchors = ?samples.iter().map(|s| s.anchor_id.as_str()).collect::<Vec<_>>(),
                "Aggregation tick"
            );

            if samples.len() < MIN_ANCHORS {
                continue;
            }

            match self.estimator.estimate_for(tag, &self.registry, &samples) {
                Some(estimate) => fixes.push(estimate),
                None => tracing::debug!(tag = %tag, "Full windows but no estimate, retrying next tick"),
            }
        }

        if fixes.is_empty() {
            return if most_full < MIN_ANCHORS {
                TickOutcome::InsufficientAnchors { full: most_full }
            } else {
                TickOutcome::NoEstimate
            };
        }

        for fix in &fixes {
            let report = self.hub.broadcast(fix).await;
            self.stats.record_fix(report.delivered, report.pruned);
            tracing::info!(
                tag = %fix.id,
                x = fix.pos.x,
                y = fix.pos.y,
                delivered = report.delivered,
                "Position published"
            );
        }

        state.gate.engage(Instant::now());
        // Every window is dropped, including full ones from anchors or tags
        // that did not contribute to this fix. Open product question: partial
        // retention would keep that fresher evidence.
        state.buffer.clear();

        TickOutcome::Published { fixes }
    }

    /// Current gate phase.
    pub async fn phase(&self) -> CooldownPhase {
        self.state.lock().await.gate.poll(Instant::now())
    }

    /// Number of readings currently buffered.
    pub async fn buffered_readings(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Tick at the configured period until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            period_secs = self.tick_interval.as_secs_f64(),
            anchors = self.registry.len(),
            "Aggregation scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        TickOutcome::Published { fixes } => {
                            tracing::debug!(fixes = fixes.len(), "Tick published");
                        }
                        outcome => tracing::trace!(?outcome, "Tick idle"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Aggregation scheduler stopped");
    }
}
