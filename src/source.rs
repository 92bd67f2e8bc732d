//! Push-based frame sources.
//!
//! [`CameraDevice`] and [`CaptureStream`] are pull APIs. The engine wants
//! frames pushed at it instead, so [`CaptureSource`] owns a capture thread
//! that pulls from a device and forwards frames through a [`FrameSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::traits::{CameraDevice, CameraError, CaptureStream, Format, Frame, Result};

/// Pause after a stream error before pulling again.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);
/// Default number of driver buffers.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// How a source should be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    /// Format to ask the driver for; `None` keeps the device default.
    pub preferred: Option<Format>,
    /// Number of driver buffers.
    pub buffer_count: u32,
}

impl Default for SourceRequest {
    /// No preferred format: whatever the device already produces.
    fn default() -> Self {
        Self {
            preferred: None,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

/// Result of handing a frame to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The engine took the frame.
    Delivered,
    /// The engine was busy; the frame was dropped.
    Dropped,
    /// The engine is gone; the source should stop.
    Closed,
}

/// Where a source delivers frames and error reports.
#[derive(Debug, Clone)]
pub struct FrameSink {
    frames: Sender<Frame>,
    errors: Sender<String>,
}

impl FrameSink {
    /// Sink over the engine's frame and error channels. The frame channel
    /// should be bounded so that a busy engine drops frames.
    #[must_use]
    pub const fn new(frames: Sender<Frame>, errors: Sender<String>) -> Self {
        Self { frames, errors }
    }

    /// Offer a frame without blocking.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        match self.frames.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }

    /// Report a hardware error. Returns `false` if the engine is gone.
    pub fn report_error(&self, err: &CameraError) -> bool {
        self.errors.send(err.to_string()).is_ok()
    }
}

/// A camera that pushes frames once started.
pub trait FrameSource: Send {
    /// Start delivering frames into `sink`.
    fn start(&mut self, request: &SourceRequest, sink: FrameSink) -> Result<()>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);

    /// Whether the source is currently started.
    fn is_running(&self) -> bool;
}

/// [`FrameSource`] driving any [`CameraDevice`] on a dedicated thread.
///
/// The device is opened inside the capture thread by `open`, so it never has
/// to cross threads.
pub struct CaptureSource<F> {
    open: Arc<F>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<F, D> CaptureSource<F>
where
    F: Fn() -> Result<D> + Send + Sync + 'static,
    D: CameraDevice,
{
    /// Source that opens its device with `open` on every start.
    pub fn new(open: F) -> Self {
        Self {
            open: Arc::new(open),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl<F, D> FrameSource for CaptureSource<F>
where
    F: Fn() -> Result<D> + Send + Sync + 'static,
    D: CameraDevice,
{
    fn start(&mut self, request: &SourceRequest, sink: FrameSink) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.reap_worker();

        // Each start gets its own flag so a detached old thread cannot be revived
        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);
        let open = Arc::clone(&self.open);
        let request = request.clone();

        let worker = thread::Builder::new()
            .name("scan-capture".into())
            .spawn(move || {
                if let Err(err) = run_capture(open.as_ref(), &request, &sink, &running) {
                    warn!(%err, "Capture thread stopped");
                    sink.report_error(&err);
                }
                running.store(false, Ordering::SeqCst);
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reap_worker();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl<F> CaptureSource<F> {
    /// Join a finished worker; a worker blocked inside the driver is detached
    /// and exits on its next frame or error.
    fn reap_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.is_finished() {
            if worker.join().is_err() {
                warn!("Capture thread panicked");
            }
        } else {
            debug!("Detaching capture thread still blocked in the driver");
        }
    }
}

impl<F> Drop for CaptureSource<F> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.reap_worker();
    }
}

fn run_capture<F, D>(
    open: &F,
    request: &SourceRequest,
    sink: &FrameSink,
    running: &AtomicBool,
) -> Result<()>
where
    F: Fn() -> Result<D>,
    D: CameraDevice,
{
    let mut device = open()?;
    info!(
        card = %device.capabilities().card,
        driver = %device.capabilities().driver,
        "Camera opened"
    );

    if let Some(preferred) = &request.preferred {
        let actual = device.set_format(preferred)?;
        info!(
            width = actual.width,
            height = actual.height,
            fourcc = %actual.fourcc,
            "Capture format negotiated"
        );
    }

    let mut stream = device.create_stream(request.buffer_count.max(1))?;
    let mut dropped: u64 = 0;

    while running.load(Ordering::Relaxed) {
        match stream.next_frame() {
            // A stop can land while the driver call blocks
            Ok(_) if !running.load(Ordering::Relaxed) => break,
            Ok(frame) => match sink.deliver(frame) {
                Delivery::Delivered => {}
                Delivery::Dropped => {
                    dropped += 1;
                    if dropped % 100 == 0 {
                        debug!(dropped, "Frames dropped while the engine was busy");
                    }
                }
                Delivery::Closed => break,
            },
            Err(err) => {
                warn!(%err, "Frame capture failed");
                if !sink.report_error(&err) {
                    break;
                }
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    Ok(())
}
