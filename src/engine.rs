//! The scan engine: one coordination thread that owns every piece of scan
//! state and reacts to commands, frames, source errors and timers.
//!
//! Frames arrive on a bounded(1) channel fed with `try_send`, so while a frame
//! is being decoded newer frames are dropped at the source. Timer handling and
//! frame handling run on the same thread and therefore never overlap.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::candidate::{self, SurfaceOptimizations, Variant};
use crate::config::ScanConfig;
use crate::decoder::{DecodePolicy, Decoder};
use crate::format::BarcodeFormat;
use crate::gate::{DecodeGate, FrameThrottle};
use crate::imaging;
use crate::roi::{self, Point, Region};
use crate::session::{ScanSession, SessionTiming, TimerOutcome};
use crate::source::{FrameSink, FrameSource, SourceRequest};
use crate::traits::{Format, FourCC, Frame};
use crate::watchdog::{Watchdog, WatchdogAction};

/// Longest the coordinator sleeps when no deadline is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// A successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Sanitised decoded text.
    pub text: String,
    /// Symbology.
    pub format: BarcodeFormat,
    /// Symbol geometry in frame coordinates.
    pub points: Vec<Point>,
    /// Region of the winning candidate.
    pub region: Region,
    /// Scale of the winning candidate.
    pub scale: f32,
    /// Preprocessing of the winning candidate.
    pub variant: Variant,
    /// Dimensions of the frame the symbol was read from.
    pub frame_size: (u32, u32),
}

/// Everything a listener can be told, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A session ended with a read.
    Succeeded(ScanResult),
    /// A session ended without a read.
    TimedOut {
        /// Timeouts since the last success.
        consecutive: u32,
    },
    /// The camera produced no frames even after a recovery.
    CameraUnavailable(String),
    /// The camera reported an error; scanning continues.
    CameraError(String),
}

/// Receives the outcome of scan sessions. Called on the engine thread.
pub trait ScanListener: Send + 'static {
    /// A session succeeded. Fires at most once per session.
    fn on_scan_succeeded(&mut self, result: &ScanResult);

    /// A session timed out.
    fn on_scan_timed_out(&mut self, consecutive: u32);

    /// The camera is considered unavailable.
    fn on_camera_unavailable(&mut self, reason: &str);

    /// A non-fatal camera error.
    fn on_camera_error(&mut self, _reason: &str) {}
}

impl ScanListener for Sender<ScanEvent> {
    fn on_scan_succeeded(&mut self, result: &ScanResult) {
        forward(self, ScanEvent::Succeeded(result.clone()));
    }

    fn on_scan_timed_out(&mut self, consecutive: u32) {
        forward(self, ScanEvent::TimedOut { consecutive });
    }

    fn on_camera_unavailable(&mut self, reason: &str) {
        forward(self, ScanEvent::CameraUnavailable(reason.to_owned()));
    }

    fn on_camera_error(&mut self, reason: &str) {
        forward(self, ScanEvent::CameraError(reason.to_owned()));
    }
}

fn forward(sender: &Sender<ScanEvent>, event: ScanEvent) {
    if sender.send(event).is_err() {
        debug!("Scan event receiver dropped");
    }
}

/// Creates a fresh frame source. Called for the first start and for every
/// watchdog recovery.
pub type SourceFactory = Box<dyn FnMut() -> Box<dyn FrameSource> + Send>;

/// Errors from spawning or talking to the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The coordination thread could not be spawned.
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The engine has shut down.
    #[error("engine is shut down")]
    Closed,
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    SetNearOptimization(bool),
    ReloadConfig(Box<ScanConfig>),
    Shutdown,
}

/// Handle to a running engine. Dropping it shuts the engine down.
pub struct ScanEngine {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl ScanEngine {
    /// Spawn the coordination thread. No source is created until the first
    /// [`ScanEngine::request_start`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the thread cannot be created.
    pub fn spawn<L: ScanListener>(
        config: ScanConfig,
        factory: SourceFactory,
        decoder: Box<dyn Decoder>,
        listener: L,
    ) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = unbounded();
        let (frame_tx, frame_rx) = bounded(1);
        let (error_tx, error_rx) = unbounded();

        let coordinator = Coordinator::new(
            config,
            factory,
            decoder,
            listener,
            (frame_tx, frame_rx.clone()),
            error_tx,
        );
        let worker = thread::Builder::new()
            .name("scan-engine".into())
            .spawn(move || coordinator.run(&command_rx, &frame_rx, &error_rx))?;

        Ok(Self {
            commands: command_tx,
            worker: Some(worker),
        })
    }

    /// Begin a scan session. Ignored while scanning or during the cool-off
    /// after a success.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] after shutdown.
    pub fn request_start(&self) -> Result<(), EngineError> {
        self.send(Command::Start)
    }

    /// Abandon the running session and stop the camera. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] after shutdown.
    pub fn request_stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    /// Toggle the close-up band and extra zoom.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] after shutdown.
    pub fn set_near_optimization(&self, enabled: bool) -> Result<(), EngineError> {
        self.send(Command::SetNearOptimization(enabled))
    }

    /// Replace the configuration snapshot. Takes effect for the next frame;
    /// session timing changes apply to the next timer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] after shutdown.
    pub fn reload_config(&self, config: ScanConfig) -> Result<(), EngineError> {
        self.send(Command::ReloadConfig(Box::new(config)))
    }

    /// Stop everything and join the engine thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Already gone if the thread exited on its own
        let _ = self.commands.send(Command::Shutdown);
        if worker.join().is_err() {
            error!("Engine thread panicked");
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Closed)
    }
}

impl Drop for ScanEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the engine thread.
struct Coordinator<L> {
    config: ScanConfig,
    policy: DecodePolicy,
    surfaces: SurfaceOptimizations,
    near_optimization: bool,
    session: ScanSession,
    watchdog: Watchdog,
    gate: DecodeGate,
    throttle: FrameThrottle,
    factory: SourceFactory,
    source: Option<Box<dyn FrameSource>>,
    decoder: Box<dyn Decoder>,
    listener: L,
    frame_tx: Sender<Frame>,
    frame_rx: Receiver<Frame>,
    error_tx: Sender<String>,
}

impl<L: ScanListener> Coordinator<L> {
    fn new(
        config: ScanConfig,
        factory: SourceFactory,
        decoder: Box<dyn Decoder>,
        listener: L,
        (frame_tx, frame_rx): (Sender<Frame>, Receiver<Frame>),
        error_tx: Sender<String>,
    ) -> Self {
        Self {
            policy: DecodePolicy::from_config(&config),
            surfaces: SurfaceOptimizations::from_config(&config),
            near_optimization: config.near_optimization,
            session: ScanSession::new(SessionTiming::from_config(&config)),
            watchdog: Watchdog::new(config.watchdog_grace),
            gate: DecodeGate::new(config.decode_cooldown),
            throttle: FrameThrottle::new(config.frame_throttle),
            config,
            factory,
            source: None,
            decoder,
            listener,
            frame_tx,
            frame_rx,
            error_tx,
        }
    }

    fn run(mut self, commands: &Receiver<Command>, frames: &Receiver<Frame>, errors: &Receiver<String>) {
        debug!("Scan engine started");

        loop {
            let wait = self
                .next_deadline()
                .map_or(IDLE_WAIT, |deadline| {
                    deadline.saturating_duration_since(Instant::now())
                })
                .min(IDLE_WAIT);

            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(frames) -> frame => {
                    if let Ok(frame) = frame {
                        self.handle_frame(&frame);
                    }
                },
                recv(errors) -> reason => {
                    if let Ok(reason) = reason {
                        warn!(%reason, "Camera error");
                        self.listener.on_camera_error(&reason);
                    }
                },
                default(wait) => {},
            }

            self.handle_timers(Instant::now());
        }

        self.session.stop();
        self.stop_source();
        debug!("Scan engine stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.session.deadline(), self.watchdog.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start_session(),
            Command::Stop => {
                self.session.stop();
                self.stop_source();
                info!("Scanning stopped");
            }
            Command::SetNearOptimization(enabled) => {
                debug!(enabled, "Near optimization changed");
                self.near_optimization = enabled;
            }
            Command::ReloadConfig(config) => self.apply_config(*config),
            Command::Shutdown => {}
        }
    }

    fn apply_config(&mut self, config: ScanConfig) {
        self.policy = DecodePolicy::from_config(&config);
        self.surfaces = SurfaceOptimizations::from_config(&config);
        self.near_optimization = config.near_optimization;
        self.session.set_timing(SessionTiming::from_config(&config));
        self.watchdog.set_grace(config.watchdog_grace);
        self.gate.set_cooldown(config.decode_cooldown);
        self.throttle.set_interval(config.frame_throttle);
        info!(formats = %config.allowed_formats(), "Configuration reloaded");
        self.config = config;
    }

    fn start_session(&mut self) {
        let now = Instant::now();
        match self.session.start(now) {
            Ok(interval) => {
                self.gate.reset();
                info!(
                    timeout_ms = interval.as_millis(),
                    fallback_full_frame = self.session.fallback_full_frame(),
                    "Scan session started"
                );
            }
            Err(reason) => {
                debug!(%reason, "Start request ignored");
                return;
            }
        }

        if !self.source.as_ref().is_some_and(|source| source.is_running()) {
            let request = self.preferred_request();
            self.start_source(&request, false);
        }
    }

    fn preferred_request(&self) -> SourceRequest {
        SourceRequest {
            preferred: self
                .config
                .preferred_resolution
                .map(|(width, height)| Format::new(width, height, FourCC::YUYV)),
            ..SourceRequest::default()
        }
    }

    /// Replace the current source with a new one from the factory. Returns
    /// whether it started.
    fn start_source(&mut self, request: &SourceRequest, recovery: bool) -> bool {
        self.stop_source();

        let now = Instant::now();
        let mut source = (self.factory)();
        let sink = FrameSink::new(self.frame_tx.clone(), self.error_tx.clone());
        let started = match source.start(request, sink) {
            Ok(()) => {
                info!(recovery, preferred = ?request.preferred, "Camera started");
                true
            }
            Err(err) => {
                warn!(%err, recovery, "Camera failed to start");
                self.listener.on_camera_error(&err.to_string());
                false
            }
        };
        self.source = Some(source);

        // A failed first start is still supervised so that it gets a recovery
        if recovery {
            self.watchdog.arm_after_recovery(now);
        } else {
            self.watchdog.arm(now);
        }
        started
    }

    fn stop_source(&mut self) {
        self.watchdog.disarm();
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        // A queued frame from the old source must not feed the next watchdog
        let stale = self.frame_rx.try_iter().count();
        if stale > 0 {
            trace!(stale, "Dropped frames from the stopped source");
        }
    }

    fn handle_frame(&mut self, frame: &Frame) {
        let now = Instant::now();
        self.watchdog.on_frame(now);

        if !self.session.is_scanning() || !self.gate.should_attempt(now) {
            return;
        }
        if !self.throttle.admit(now) {
            return;
        }
        self.gate.record_attempt(now);
        self.session.reset_timeout(now);

        let luma = match imaging::frame_to_luma(frame) {
            Ok(luma) => luma,
            Err(err) => {
                warn!(%err, sequence = frame.metadata.sequence, "Frame conversion failed");
                return;
            }
        };

        let (width, height) = luma.dimensions();
        let region = roi::plan(
            width,
            height,
            &self.config,
            self.near_optimization,
            self.session.fallback_full_frame(),
        );
        let plan = candidate::build(
            width,
            height,
            region,
            &self.config,
            self.near_optimization,
            self.surfaces,
        );

        let Some(hit) = self.policy.decode_frame(&mut *self.decoder, &luma, &plan) else {
            trace!(candidates = plan.len(), "No symbol in frame");
            return;
        };
        let (Some(text), Some(format)) = (hit.result.text, hit.result.format) else {
            return;
        };

        if !self.session.succeed(Instant::now()) {
            debug!("Session ended while decoding; discarding result");
            return;
        }

        let result = ScanResult {
            text,
            format,
            points: hit.result.points,
            region: hit.candidate.region,
            scale: hit.candidate.scale,
            variant: hit.candidate.variant,
            frame_size: (width, height),
        };
        info!(
            format = %result.format,
            candidates_tried = hit.candidates_tried,
            scale = result.scale,
            "Barcode read"
        );
        self.listener.on_scan_succeeded(&result);
    }

    fn handle_timers(&mut self, now: Instant) {
        match self.session.on_timer(now) {
            TimerOutcome::TimedOut { consecutive } => {
                info!(consecutive, "Scan session timed out");
                self.listener.on_scan_timed_out(consecutive);
            }
            TimerOutcome::Extended { next } => {
                debug!(next_ms = next.as_millis(), "Scan timeout extended");
            }
            TimerOutcome::Inactive | TimerOutcome::Pending => {}
        }

        match self.watchdog.check(now) {
            WatchdogAction::Idle => {}
            WatchdogAction::Recover => {
                warn!("No frames from camera; restarting with default configuration");
                if !self.start_source(&SourceRequest::default(), true) {
                    self.give_up("camera failed to restart");
                }
            }
            WatchdogAction::Unavailable => {
                self.give_up("no frames received after camera restart");
            }
        }
    }

    fn give_up(&mut self, reason: &str) {
        error!(reason, "Camera unavailable");
        self.session.stop();
        self.stop_source();
        self.listener.on_camera_unavailable(reason);
    }
}
