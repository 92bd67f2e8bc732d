//! Scan session state machine.
//!
//! A session runs `Idle -> Scanning -> {Succeeded | TimedOut}`. Its timeout is
//! a sliding window capped by an absolute ceiling: every decode attempt earns
//! up to `base_timeout` more time, but the session never outlives
//! `absolute_timeout` measured from `start`.
//!
//! All methods take the current instant explicitly. The engine passes
//! `Instant::now()`; tests drive simulated time.

use std::time::{Duration, Instant};

use thiserror::Error;

/// Shortest sliding window; a zero base timeout would re-arm the timer forever.
pub const MIN_WINDOW: Duration = Duration::from_millis(10);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started, or it was stopped.
    Idle,
    /// Waiting for a successful decode.
    Scanning,
    /// Last session produced a read.
    Succeeded,
    /// Last session exhausted its absolute budget.
    TimedOut,
}

/// Timeout policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Length of one sliding window.
    pub base_timeout: Duration,
    /// Hard ceiling measured from `start`.
    pub absolute_timeout: Duration,
    /// After a success, refuse new sessions for this long.
    pub success_cooloff: Duration,
}

impl SessionTiming {
    /// Timing from a scan configuration.
    #[must_use]
    pub const fn from_config(config: &crate::config::ScanConfig) -> Self {
        Self {
            base_timeout: config.base_timeout,
            absolute_timeout: config.absolute_timeout,
            success_cooloff: config.success_cooloff,
        }
    }

    fn window(&self) -> Duration {
        self.base_timeout.max(MIN_WINDOW)
    }
}

/// Reason a `start` request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejected {
    /// A session is already running.
    #[error("a scan session is already running")]
    AlreadyScanning,
    /// A read just succeeded; the same symbol is probably still in view.
    #[error("cooling off after a successful read ({remaining:?} left)")]
    CoolingDown {
        /// Time until a new session is accepted.
        remaining: Duration,
    },
}

/// Result of a timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// No session is running; nothing happened.
    Inactive,
    /// The deadline has not been reached yet.
    Pending,
    /// Budget remains; the timer was re-armed for `next`.
    Extended {
        /// Interval until the next timer.
        next: Duration,
    },
    /// The session ended without a read.
    TimedOut {
        /// Number of timeouts since the last success.
        consecutive: u32,
    },
}

/// The single active scan session of an engine.
///
/// The consecutive-timeout counter and the full-frame fallback flag live
/// across sessions: a timeout makes the *next* session skip ROI narrowing, and
/// only a success clears them.
#[derive(Debug, Clone)]
pub struct ScanSession {
    timing: SessionTiming,
    state: SessionState,
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    succeeded_at: Option<Instant>,
    consecutive_timeouts: u32,
    fallback_full_frame: bool,
}

impl ScanSession {
    /// Idle session with the given timing.
    #[must_use]
    pub const fn new(timing: SessionTiming) -> Self {
        Self {
            timing,
            state: SessionState::Idle,
            started_at: None,
            deadline: None,
            succeeded_at: None,
            consecutive_timeouts: 0,
            fallback_full_frame: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.state == SessionState::Scanning
    }

    /// Timeouts since the last success.
    #[must_use]
    pub const fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Whether ROI narrowing should be bypassed.
    #[must_use]
    pub const fn fallback_full_frame(&self) -> bool {
        self.fallback_full_frame
    }

    /// Instant the pending timer fires, if a session is running.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Instant the running session started.
    #[must_use]
    pub const fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Timing used by the next `start`.
    #[must_use]
    pub const fn timing(&self) -> SessionTiming {
        self.timing
    }

    /// Replace the timing. A running session keeps its start instant but its
    /// next timer evaluation uses the new values.
    pub fn set_timing(&mut self, timing: SessionTiming) {
        self.timing = timing;
    }

    /// Start a session at `now` and return the first timer interval.
    pub fn start(&mut self, now: Instant) -> Result<Duration, StartRejected> {
        if self.state == SessionState::Scanning {
            return Err(StartRejected::AlreadyScanning);
        }
        if let Some(remaining) = self.cooloff_remaining(now) {
            return Err(StartRejected::CoolingDown { remaining });
        }

        let interval = self.timing.window().min(self.timing.absolute_timeout);
        self.state = SessionState::Scanning;
        self.started_at = Some(now);
        self.deadline = Some(now + interval);
        Ok(interval)
    }

    fn cooloff_remaining(&self, now: Instant) -> Option<Duration> {
        let succeeded_at = self.succeeded_at?;
        let elapsed = now.saturating_duration_since(succeeded_at);
        self.timing
            .success_cooloff
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }

    fn remaining_budget(&self, now: Instant) -> Duration {
        let elapsed = self
            .started_at
            .map_or(Duration::ZERO, |started| now.saturating_duration_since(started));
        self.timing.absolute_timeout.saturating_sub(elapsed)
    }

    /// Slide the window after a decode attempt. Returns the new interval, or
    /// `None` when no session runs or the absolute budget is spent (the
    /// pending timer then finalises the timeout).
    pub fn reset_timeout(&mut self, now: Instant) -> Option<Duration> {
        if !self.is_scanning() {
            return None;
        }
        let remaining = self.remaining_budget(now);
        if remaining.is_zero() {
            return None;
        }
        let interval = remaining.min(self.timing.window());
        self.deadline = Some(now + interval);
        Some(interval)
    }

    /// Handle the timer at `now`.
    pub fn on_timer(&mut self, now: Instant) -> TimerOutcome {
        if !self.is_scanning() {
            return TimerOutcome::Inactive;
        }
        match self.deadline {
            Some(deadline) if now < deadline => return TimerOutcome::Pending,
            _ => {}
        }

        let remaining = self.remaining_budget(now);
        if !remaining.is_zero() {
            let next = remaining.min(self.timing.window());
            self.deadline = Some(now + next);
            return TimerOutcome::Extended { next };
        }

        self.state = SessionState::TimedOut;
        self.deadline = None;
        self.started_at = None;
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        if self.consecutive_timeouts >= 1 {
            self.fallback_full_frame = true;
        }
        TimerOutcome::TimedOut {
            consecutive: self.consecutive_timeouts,
        }
    }

    /// Record a successful read. Returns `false` (and changes nothing) when no
    /// session was running, in which case the result must be discarded.
    pub fn succeed(&mut self, now: Instant) -> bool {
        if !self.is_scanning() {
            return false;
        }
        self.state = SessionState::Succeeded;
        self.deadline = None;
        self.started_at = None;
        self.succeeded_at = Some(now);
        self.consecutive_timeouts = 0;
        self.fallback_full_frame = false;
        true
    }

    /// Abandon the running session. Idempotent.
    pub fn stop(&mut self) {
        if self.is_scanning() {
            self.state = SessionState::Idle;
        }
        self.deadline = None;
        self.started_at = None;
    }
}
