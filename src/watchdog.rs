//! Frame-source liveness supervision.
//!
//! The watchdog is armed whenever a source starts. If the grace period passes
//! without a single frame, it asks for one recovery (restart the source with a
//! default configuration). If the recovered source is silent too, the camera
//! is reported unavailable and the watchdog disarms. Once any frame arrives the
//! watchdog stays quiet for the rest of that source's life.

use std::time::{Duration, Instant};

/// Default time allowed for the first frame.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(2_000);

/// What the engine should do after a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Nothing to do.
    Idle,
    /// No frames in the grace period: restart the source once.
    Recover,
    /// Still no frames after the recovery: give up.
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
struct WatchdogState {
    armed_at: Instant,
    last_frame_at: Option<Instant>,
    recovery_attempted: bool,
}

/// Liveness monitor for one frame source.
#[derive(Debug, Clone)]
pub struct Watchdog {
    grace: Duration,
    state: Option<WatchdogState>,
}

impl Watchdog {
    /// Disarmed watchdog with the given grace period.
    #[must_use]
    pub const fn new(grace: Duration) -> Self {
        Self { grace, state: None }
    }

    /// Arm for a freshly started source.
    pub fn arm(&mut self, now: Instant) {
        self.state = Some(WatchdogState {
            armed_at: now,
            last_frame_at: None,
            recovery_attempted: false,
        });
    }

    /// Arm for the source created by a recovery. A second silence is final.
    pub fn arm_after_recovery(&mut self, now: Instant) {
        self.state = Some(WatchdogState {
            armed_at: now,
            last_frame_at: None,
            recovery_attempted: true,
        });
    }

    /// Stop supervising.
    pub fn disarm(&mut self) {
        self.state = None;
    }

    /// Whether the watchdog is armed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.state.is_some()
    }

    /// Whether the current source has delivered a frame.
    #[must_use]
    pub fn frame_received(&self) -> bool {
        self.state.is_some_and(|state| state.last_frame_at.is_some())
    }

    /// Instant the last frame arrived.
    #[must_use]
    pub fn last_frame_at(&self) -> Option<Instant> {
        self.state.and_then(|state| state.last_frame_at)
    }

    /// Change the grace period for subsequent checks.
    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Record a frame arrival.
    pub fn on_frame(&mut self, now: Instant) {
        if let Some(state) = self.state.as_mut() {
            state.last_frame_at = Some(now);
        }
    }

    /// When the next check is due, if one is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            Some(state) if state.last_frame_at.is_none() => Some(state.armed_at + self.grace),
            _ => None,
        }
    }

    /// Evaluate liveness at `now`.
    pub fn check(&mut self, now: Instant) -> WatchdogAction {
        let Some(state) = self.state else {
            return WatchdogAction::Idle;
        };
        if state.last_frame_at.is_some()
            || now.saturating_duration_since(state.armed_at) < self.grace
        {
            return WatchdogAction::Idle;
        }

        if state.recovery_attempted {
            self.state = None;
            WatchdogAction::Unavailable
        } else {
            // Stays armed until the engine re-arms it for the new source
            self.state = Some(WatchdogState {
                recovery_attempted: true,
                ..state
            });
            WatchdogAction::Recover
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}
