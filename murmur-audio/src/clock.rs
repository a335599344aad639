//! Maps audio-relative offsets to wall-clock deadlines for one utterance.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    anchor: Option<Instant>,
    lead: Duration,
}

impl PlaybackClock {
    /// `lead_sec` is the output latency before the first sample is audible
    pub fn new(lead_sec: f64) -> Self {
        Self {
            anchor: None,
            lead: duration_from_ms(lead_sec * 1000.0),
        }
    }

    pub fn lead(&self) -> Duration {
        self.lead
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn anchor_instant(&self) -> Option<Instant> {
        self.anchor
    }

    /// Set the anchor to `now + lead`. Only the first call has any effect.
    /// Returns true when this call set the anchor.
    pub fn anchor(&mut self, now: Instant) -> bool {
        if self.anchor.is_some() {
            return false;
        }
        self.anchor = Some(now + self.lead);
        true
    }

    /// Wall-clock instant at which `offset_ms` of audio becomes audible
    pub fn deadline_for(&self, offset_ms: f64) -> Option<Instant> {
        self.anchor
            .map(|anchor| anchor + duration_from_ms(offset_ms))
    }
}

/// Rounded to the nanosecond. Negative and non-finite values map to zero.
pub(crate) fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_nanos((ms * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}
