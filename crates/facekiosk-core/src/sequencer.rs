//! Capture sequencer: the per-session state machine.
//!
//! Consumes one [`Tick`] per detection cycle, asks its strategy whether a slot
//! should be filled, freezes a still through a [`StillSource`] and stores it.
//! Once the strategy's target is reached the sequencer is `Complete` and
//! ignores further ticks until [`CaptureSequencer::reset`].

use crate::strategy::{CaptureStrategy, Tick};
use crate::types::{CaptureSet, CaptureSlot, CapturedImage};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrabError {
    #[error("no frame available")]
    NoFrame,
    #[error("still encoding failed: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera or landmark provider not ready")]
    ProviderUnavailable,
    #[error("capture failed for {slot}: {source}")]
    CaptureFailure {
        slot: CaptureSlot,
        #[source]
        source: GrabError,
    },
}

/// Freezes the current video frame into encoded still bytes.
pub trait StillSource {
    fn grab(&mut self) -> Result<Vec<u8>, GrabError>;
}

impl<F> StillSource for F
where
    F: FnMut() -> Result<Vec<u8>, GrabError>,
{
    fn grab(&mut self) -> Result<Vec<u8>, GrabError> {
        self()
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session already complete; tick ignored.
    Idle,
    /// Nothing to capture this tick.
    Waiting,
    /// A still was stored for this slot.
    Captured(CaptureSlot),
    /// A still was stored and the session is now complete.
    Completed(CaptureSlot),
}

/// Stills of a finished session, in capture order, ready for upload.
#[derive(Debug)]
pub struct CompletedSession {
    pub slots: Vec<CaptureSlot>,
    pub images: Vec<CapturedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    Complete,
}

pub struct CaptureSequencer {
    strategy: Box<dyn CaptureStrategy>,
    state: State,
    set: CaptureSet,
    /// Slots captured this session, kept after the images are handed off.
    captured: Vec<CaptureSlot>,
}

impl CaptureSequencer {
    pub fn new(strategy: Box<dyn CaptureStrategy>) -> Self {
        Self {
            strategy,
            state: State::Collecting,
            set: CaptureSet::new(),
            captured: Vec::new(),
        }
    }

    /// Feed one detection tick.
    ///
    /// A failed grab is returned as [`CaptureError::CaptureFailure`] and
    /// leaves the captured set unchanged.
    pub fn on_tick(
        &mut self,
        tick: &Tick,
        still: &mut dyn StillSource,
    ) -> Result<TickOutcome, CaptureError> {
        if self.state == State::Complete {
            return Ok(TickOutcome::Idle);
        }

        let Some(slot) = self.strategy.select(tick, &self.set) else {
            return Ok(TickOutcome::Waiting);
        };
        if self.set.contains(slot) {
            tracing::debug!(%slot, "strategy selected an already captured slot");
            return Ok(TickOutcome::Waiting);
        }

        let bytes = still.grab().map_err(|source| {
            tracing::warn!(%slot, error = %source, "still capture failed");
            CaptureError::CaptureFailure { slot, source }
        })?;

        let image = CapturedImage::new(self.set.len(), bytes);
        tracing::info!(
            %slot,
            file = %image.file_name,
            captured = self.set.len() + 1,
            target = self.strategy.target(),
            "still captured"
        );
        self.set.insert(slot, image);
        self.captured.push(slot);
        self.strategy.captured(slot, tick.at);

        if self.set.len() >= self.strategy.target() {
            self.state = State::Complete;
            tracing::info!(strategy = self.strategy.name(), "capture set complete");
            return Ok(TickOutcome::Completed(slot));
        }
        Ok(TickOutcome::Captured(slot))
    }

    /// Move the finished stills out. Returns `None` while collecting and on
    /// every call after the first.
    pub fn take_completed(&mut self) -> Option<CompletedSession> {
        if self.state != State::Complete || self.set.is_empty() {
            return None;
        }
        let (slots, images) = std::mem::take(&mut self.set).into_ordered().into_iter().unzip();
        Some(CompletedSession { slots, images })
    }

    /// Discard captured slots and any partial stills; start collecting again.
    pub fn reset(&mut self) {
        self.state = State::Collecting;
        self.set.clear();
        self.captured.clear();
        self.strategy.reset();
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Slots captured this session, in capture order.
    pub fn captured_slots(&self) -> &[CaptureSlot] {
        &self.captured
    }

    /// `(captured, target)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.captured.len(), self.strategy.target())
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn countdown(&self, now: Instant) -> Option<Duration> {
        match self.state {
            State::Collecting => self.strategy.countdown(now),
            State::Complete => None,
        }
    }
}
