//! Decode cadence control.
//!
//! Cameras deliver frames far faster than decoding needs them. [`DecodeGate`]
//! lets at most one decode attempt through per cooldown window, and
//! [`FrameThrottle`] caps how often a frame may trigger any work at all.

use std::time::{Duration, Instant};

/// Debounce for decode attempts.
#[derive(Debug, Clone)]
pub struct DecodeGate {
    cooldown: Duration,
    last_attempt: Option<Instant>,
}

impl DecodeGate {
    /// Gate with the given minimum spacing between attempts.
    #[must_use]
    pub const fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_attempt: None,
        }
    }

    /// Whether an attempt may start at `now`.
    #[must_use]
    pub fn should_attempt(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= self.cooldown)
    }

    /// Record that an attempt started at `now`.
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Forget the last attempt so the next frame is tried immediately.
    pub fn reset(&mut self) {
        self.last_attempt = None;
    }

    /// Change the cooldown; the last attempt is kept.
    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    /// Current cooldown.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Minimum spacing between frames that are allowed to trigger work.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    last_admitted: Option<Instant>,
}

impl FrameThrottle {
    /// Throttle admitting at most one frame per `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_admitted: None,
        }
    }

    /// Admit the frame arriving at `now`, or reject it if it is too close to
    /// the previously admitted one.
    pub fn admit(&mut self, now: Instant) -> bool {
        let admitted = self
            .last_admitted
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if admitted {
            self.last_admitted = Some(now);
        }
        admitted
    }

    /// Change the interval.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}
