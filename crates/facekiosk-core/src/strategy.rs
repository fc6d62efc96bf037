//! Capture strategies: when should the sequencer freeze a still?
//!
//! [`PoseGatedStrategy`] fills one slot per pose bucket once the face is in
//! position. [`TimedStrategy`] fires on a countdown and ignores the face
//! entirely, for kiosks running without a landmark model.

use crate::config::ConfigError;
use crate::types::{CaptureSet, CaptureSlot, PoseBucket, PositionResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// One detection tick as seen by a strategy.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub at: Instant,
    /// `None` when the provider produced no face this tick.
    pub position: Option<PositionResult>,
}

impl Tick {
    pub fn new(at: Instant, position: PositionResult) -> Self {
        Self {
            at,
            position: Some(position),
        }
    }

    pub fn empty(at: Instant) -> Self {
        Self { at, position: None }
    }
}

/// Which validity flags must hold before a pose is honoured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatePolicy {
    /// Centred, at capture distance and level.
    #[default]
    AllFlags,
    /// Any confidently classified pose.
    ConfidenceOnly,
}

impl GatePolicy {
    pub fn admits(&self, position: &PositionResult) -> bool {
        match self {
            GatePolicy::AllFlags => position.all_valid(),
            GatePolicy::ConfidenceOnly => true,
        }
    }
}

impl FromStr for GatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all-flags" | "all" => Ok(GatePolicy::AllFlags),
            "confidence-only" | "confidence" => Ok(GatePolicy::ConfidenceOnly),
            other => Err(ConfigError::UnknownValue {
                field: "gate policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Decides, tick by tick, which capture slot (if any) to fill next.
pub trait CaptureStrategy: Send {
    /// Short name for logs and status reports.
    fn name(&self) -> &'static str;

    /// Number of stills that make a complete session.
    fn target(&self) -> usize;

    /// Slot to capture on this tick, or `None` to keep waiting.
    fn select(&mut self, tick: &Tick, captured: &CaptureSet) -> Option<CaptureSlot>;

    /// Called after a still for `slot` was stored.
    fn captured(&mut self, _slot: CaptureSlot, _at: Instant) {}

    /// Forget any per-session state.
    fn reset(&mut self) {}

    /// Time left before the next automatic shot, for strategies that count down.
    fn countdown(&self, _now: Instant) -> Option<Duration> {
        None
    }
}

/// One still per configured pose bucket.
#[derive(Debug, Clone)]
pub struct PoseGatedStrategy {
    buckets: Vec<PoseBucket>,
    gate: GatePolicy,
}

impl PoseGatedStrategy {
    pub fn new(buckets: Vec<PoseBucket>, gate: GatePolicy) -> Self {
        let mut unique = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if !unique.contains(&bucket) {
                unique.push(bucket);
            }
        }
        Self {
            buckets: unique,
            gate,
        }
    }

    /// Three buckets (center, left, right) or all five.
    pub fn with_bucket_count(count: usize, gate: GatePolicy) -> Option<Self> {
        match count {
            3 => Some(Self::new(PoseBucket::PRIMARY.to_vec(), gate)),
            5 => Some(Self::new(PoseBucket::ALL.to_vec(), gate)),
            _ => None,
        }
    }

    pub fn buckets(&self) -> &[PoseBucket] {
        &self.buckets
    }
}

impl CaptureStrategy for PoseGatedStrategy {
    fn name(&self) -> &'static str {
        "pose-gated"
    }

    fn target(&self) -> usize {
        self.buckets.len()
    }

    fn select(&mut self, tick: &Tick, captured: &CaptureSet) -> Option<CaptureSlot> {
        let position = tick.position?;
        let pose = position.pose?;
        if !self.gate.admits(&position) {
            tracing::trace!(%pose, ?position, "pose seen but face not in position");
            return None;
        }
        if !self.buckets.contains(&pose) {
            return None;
        }
        let slot = CaptureSlot::Pose(pose);
        (!captured.contains(slot)).then_some(slot)
    }
}

/// Countdown shots, independent of face position.
#[derive(Debug, Clone)]
pub struct TimedStrategy {
    delay: Duration,
    shots: usize,
    armed_at: Option<Instant>,
}

impl TimedStrategy {
    /// Shots are indexed with a `u8`.
    pub const MAX_SHOTS: usize = u8::MAX as usize;

    pub fn new(delay: Duration, shots: usize) -> Self {
        Self {
            delay,
            shots: shots.min(Self::MAX_SHOTS),
            armed_at: None,
        }
    }
}

impl CaptureStrategy for TimedStrategy {
    fn name(&self) -> &'static str {
        "timed"
    }

    fn target(&self) -> usize {
        self.shots
    }

    fn select(&mut self, tick: &Tick, captured: &CaptureSet) -> Option<CaptureSlot> {
        let armed_at = *self.armed_at.get_or_insert(tick.at);
        if captured.len() >= self.shots {
            return None;
        }
        if tick.at.saturating_duration_since(armed_at) < self.delay {
            return None;
        }
        let slot = CaptureSlot::Shot(captured.len() as u8);
        (!captured.contains(slot)).then_some(slot)
    }

    fn captured(&mut self, _slot: CaptureSlot, at: Instant) {
        self.armed_at = Some(at);
    }

    fn reset(&mut self) {
        self.armed_at = None;
    }

    fn countdown(&self, now: Instant) -> Option<Duration> {
        let armed_at = self.armed_at?;
        Some(self.delay.saturating_sub(now.saturating_duration_since(armed_at)))
    }
}
