//! Post-fix cooldown gate.
//!
//! After a fix is published the gate closes for a fixed dwell interval. While
//! closed, new readings are dropped and aggregation ticks do nothing, so the
//! next fix is computed from evidence gathered entirely after the last one.
//!
//! The gate is a plain state machine over a monotonic deadline: every query
//! takes the current instant and reopens the gate if the deadline has passed.
//! Callers that share it (ingestion and the scheduler tick) hold the same lock
//! around the query and whatever they do next.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Default dwell interval after a fix.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Externally visible gate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPhase {
    Open,
    Cooling,
}

impl std::fmt::Display for CooldownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CooldownPhase::Open => write!(f, "open"),
            CooldownPhase::Cooling => write!(f, "cooling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Cooling { until: Instant },
}

/// Two-state OPEN/COOLING gate.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    dwell: Duration,
    state: State,
    /// Wall-clock time of the last transition
    changed_at: DateTime<Utc>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownGate {
    /// Create an open gate with the given dwell interval.
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            state: State::Open,
            changed_at: Utc::now(),
        }
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Current phase at `now`, reopening the gate if the dwell has elapsed.
    pub fn poll(&mut self, now: Instant) -> CooldownPhase {
        if let State::Cooling { until } = self.state {
            if now >= until {
                self.state = State::Open;
                self.changed_at = Utc::now();
                tracing::info!("Cooldown finished, accepting readings again");
            }
        }
        self.phase()
    }

    /// Whether the gate is open at `now`.
    pub fn is_open(&mut self, now: Instant) -> bool {
        self.poll(now) == CooldownPhase::Open
    }

    /// Close the gate for one dwell interval starting at `now`.
    ///
    /// Only valid from the open state; returns `false` and leaves the deadline
    /// alone if the gate is already cooling.
    pub fn engage(&mut self, now: Instant) -> bool {
        if !self.is_open(now) {
            return false;
        }
        self.state = State::Cooling {
            until: now + self.dwell,
        };
        self.changed_at = Utc::now();
        tracing::info!(dwell_secs = self.dwell.as_secs_f64(), "Cooldown started");
        true
    }

    /// Phase as of the last poll, without advancing the state machine.
    pub fn phase(&self) -> CooldownPhase {
        match self.state {
            State::Open => CooldownPhase::Open,
            State::Cooling { .. } => CooldownPhase::Cooling,
        }
    }

    /// Time left in the current cooldown, zero when open.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.state {
            State::Open => Duration::ZERO,
            State::Cooling { until } => until.saturating_duration_since(now),
        }
    }

    /// Wall-clock time of the last transition.
    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_open() {
        let mut gate = CooldownGate::default();
        assert_eq!(gate.phase(), CooldownPhase::Open);
        assert!(gate.is_open(Instant::now()));
    }

    #[test]
    fn test_engage_then_reopen_after_dwell() {
        let mut gate = CooldownGate::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(gate.engage(t0));
        assert_eq!(gate.poll(t0), CooldownPhase::Cooling);
        assert_eq!(gate.poll(t0 + Duration::from_millis(4_999)), CooldownPhase::Cooling);
        assert_eq!(gate.poll(t0 + Duration::from_secs(5)), CooldownPhase::Open);
    }

    #[test]
    fn test_engage_while_cooling_keeps_deadline() {
        let mut gate = CooldownGate::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(gate.engage(t0));
        assert!(!gate.engage(t0 + Duration::from_secs(3)));
        assert!(gate.is_open(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_remaining() {
        let mut gate = CooldownGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert_eq!(gate.remaining(t0), Duration::ZERO);

        gate.engage(t0);
        assert_eq!(gate.remaining(t0 + Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(gate.remaining(t0 + Duration::from_secs(9)), Duration::ZERO);
    }

    #[test]
    fn test_transition_timestamp_moves() {
        let mut gate = CooldownGate::new(Duration::from_secs(1));
        let before = gate.changed_at();
        gate.engage(Instant::now());
        assert!(gate.changed_at() >= before);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(CooldownPhase::Open.to_string(), "open");
        assert_eq!(CooldownPhase::Cooling.to_string(), "cooling");
    }
}
