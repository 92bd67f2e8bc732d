//! Mock devices, sources and decoders for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::GrayImage;

use crate::decoder::{DecodeError, DecodeOptions, DecodedSymbol, Decoder};
use crate::format::{BarcodeFormat, FormatSet};
use crate::roi::Point;
use crate::source::{FrameSink, FrameSource, SourceRequest};
use crate::traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, Format, FourCC, Frame,
    FrameMetadata, Result,
};

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    frame_count: u32,
    frame_interval: Duration,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            frame_count: 0,
            frame_interval: Duration::ZERO,
        }
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Pace `next_frame` like a real camera.
    #[must_use]
    pub const fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

impl CameraDevice for MockDevice {
    type Stream<'a> = MockStream<'a>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Result<Format> {
        Ok(self.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        if format.fourcc.bytes_per_pixel().is_none() {
            return Err(CameraError::FormatNotSupported(format.clone()));
        }
        self.format = Format::new(format.width, format.height, format.fourcc);
        Ok(self.format.clone())
    }

    fn create_stream(&mut self, _buffer_count: u32) -> Result<Self::Stream<'_>> {
        Ok(MockStream {
            device: self,
            pattern: TestPattern::ColorBars,
        })
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mock capture stream for testing.
pub struct MockStream<'a> {
    device: &'a mut MockDevice,
    pattern: TestPattern,
}

impl MockStream<'_> {
    /// Set the test pattern for frame generation.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }
}

impl CaptureStream for MockStream<'_> {
    fn next_frame(&mut self) -> Result<Frame> {
        if !self.device.frame_interval.is_zero() {
            std::thread::sleep(self.device.frame_interval);
        }

        let format = self.device.format.clone();
        let data = generate_test_frame(&format, self.pattern);

        let seq = self.device.frame_count;
        self.device.frame_count += 1;

        Ok(Frame {
            data,
            metadata: FrameMetadata {
                sequence: seq,
                timestamp: Duration::from_millis(u64::from(seq) * 33), // ~30fps
                bytes_used: format.size,
            },
            format,
        })
    }
}

/// Generate YUYV test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    let bar_width = (width / 8).max(1);

    for (y, row) in data.chunks_exact_mut(width as usize * 2).enumerate() {
        if y >= height as usize {
            break;
        }
        for (pair, px) in row.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = pair as u32 * 2;
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars.get(bar_idx).copied().unwrap_or((16, 128, 128));
            px.copy_from_slice(&[y_val, u_val, y_val, v_val]);
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, _height: u32) {
    for row in data.chunks_exact_mut(width as usize * 2) {
        for (pair, px) in row.chunks_exact_mut(4).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let x = pair as u32 * 2;
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            px.copy_from_slice(&[y_val, 128, y_val, 128]);
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&[y, u, y, v]);
    }
}

/// Source whose `start` succeeds but that never produces a frame, like a
/// camera that enumerates but delivers nothing.
#[derive(Debug, Default)]
pub struct SilentSource {
    running: bool,
}

impl FrameSource for SilentSource {
    fn start(&mut self, _request: &SourceRequest, _sink: FrameSink) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Source whose `start` always fails.
#[derive(Debug, Default)]
pub struct FailingSource;

impl FrameSource for FailingSource {
    fn start(&mut self, _request: &SourceRequest, _sink: FrameSink) -> Result<()> {
        Err(CameraError::DeviceOpenFailed("mock device unplugged".to_owned()))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

/// Counts how many sources a factory created and which requests they got.
#[derive(Debug, Clone, Default)]
pub struct SourceLog {
    created: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SourceRequest>>>,
}

impl SourceLog {
    /// Number of sources created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Record a creation and return its zero-based index.
    pub fn record_creation(&self) -> usize {
        self.created.fetch_add(1, Ordering::SeqCst)
    }

    /// Requests passed to `start`, in order.
    pub fn requests(&self) -> Vec<SourceRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record_request(&self, request: &SourceRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }
}

/// Wraps a source and records the requests it is started with.
pub struct LoggedSource<S> {
    inner: S,
    log: SourceLog,
}

impl<S: FrameSource> LoggedSource<S> {
    /// Wrap `inner`.
    pub const fn new(inner: S, log: SourceLog) -> Self {
        Self { inner, log }
    }
}

impl<S: FrameSource> FrameSource for LoggedSource<S> {
    fn start(&mut self, request: &SourceRequest, sink: FrameSink) -> Result<()> {
        self.log.record_request(request);
        self.inner.start(request, sink)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

/// One recorded decoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeCall {
    /// Image dimensions.
    pub size: (u32, u32),
    /// Allow-list passed.
    pub formats: FormatSet,
    /// Options passed.
    pub options: DecodeOptions,
}

#[derive(Debug, Clone)]
enum Script {
    Never,
    Always,
    OnCall(usize),
    WhenSize(u32, u32),
    Fail,
}

/// Decoder stub with a fixed script that records every call.
///
/// Clones share the call log, so a test can keep one clone while the engine
/// owns another.
#[derive(Debug, Clone)]
pub struct ScriptedDecoder {
    script: Script,
    text: String,
    format: BarcodeFormat,
    points: Vec<Point>,
    calls: Arc<Mutex<Vec<DecodeCall>>>,
    enabled: Arc<AtomicBool>,
}

impl ScriptedDecoder {
    fn with_script(script: Script, text: &str, format: BarcodeFormat) -> Self {
        Self {
            script,
            text: text.to_owned(),
            format,
            points: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Never finds anything.
    pub fn never() -> Self {
        Self::with_script(Script::Never, "", BarcodeFormat::QrCode)
    }

    /// Finds `text` on every call.
    pub fn always(text: &str, format: BarcodeFormat) -> Self {
        Self::with_script(Script::Always, text, format)
    }

    /// Finds `text` on the `n`-th call (1-based) only.
    pub fn on_call(n: usize, text: &str, format: BarcodeFormat) -> Self {
        Self::with_script(Script::OnCall(n), text, format)
    }

    /// Finds `text` whenever the image is exactly `width` x `height`.
    pub fn when_size(width: u32, height: u32, text: &str, format: BarcodeFormat) -> Self {
        Self::with_script(Script::WhenSize(width, height), text, format)
    }

    /// Fails on every call.
    pub fn failing() -> Self {
        Self::with_script(Script::Fail, "", BarcodeFormat::QrCode)
    }

    /// Geometry reported with each hit.
    #[must_use]
    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }

    /// Start out finding nothing until [`ScriptedDecoder::resume`].
    #[must_use]
    pub fn paused(self) -> Self {
        self.enabled.store(false, Ordering::SeqCst);
        self
    }

    /// Follow the script again, on every clone.
    pub fn resume(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Calls made so far, across all clones.
    pub fn calls(&self) -> Vec<DecodeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(
        &mut self,
        image: &GrayImage,
        formats: &FormatSet,
        options: DecodeOptions,
    ) -> std::result::Result<Option<DecodedSymbol>, DecodeError> {
        let call_number = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| DecodeError::Backend("call log poisoned".to_owned()))?;
            calls.push(DecodeCall {
                size: image.dimensions(),
                formats: formats.clone(),
                options,
            });
            calls.len()
        };

        let hit = self.enabled.load(Ordering::SeqCst)
            && match self.script {
                Script::Never => false,
                Script::Always => true,
                Script::OnCall(n) => call_number == n,
                Script::WhenSize(width, height) => image.dimensions() == (width, height),
                Script::Fail => return Err(DecodeError::Backend("scripted failure".to_owned())),
            };

        Ok(hit.then(|| DecodedSymbol {
            text: self.text.clone(),
            format: self.format,
            points: self.points.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let new_format = Format::new(1280, 720, FourCC::YUYV);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);

        let mjpg = Format::new(1280, 720, FourCC::MJPG);
        assert!(device.set_format(&mjpg).is_err());
    }

    #[test]
    fn test_mock_stream_capture() {
        let mut device = MockDevice::new();
        let mut stream = device.create_stream(4).expect("create_stream should succeed");

        let frame1 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame1.metadata.sequence, 0);
        assert_eq!(frame1.data.len(), 640 * 480 * 2);
        assert_eq!(frame1.width(), 640);

        let frame2 = stream.next_frame().expect("next_frame should succeed");
        assert_eq!(frame2.metadata.sequence, 1);
    }

    #[test]
    fn test_patterns() {
        let format = Format::new(640, 480, FourCC::YUYV);

        let bars = generate_test_frame(&format, TestPattern::ColorBars);
        assert_eq!(bars.first(), Some(&235));

        let gradient = generate_test_frame(&format, TestPattern::Gradient);
        assert!(gradient.first().is_some_and(|&y| y < 10));
        let last_row_start = (479 * 640 * 2) as usize;
        assert!(gradient.get(last_row_start + 638 * 2).is_some_and(|&y| y > 200));

        let solid = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(solid.get(..4), Some(&[128, 64, 128, 192][..]));
    }

    #[test]
    fn test_scripted_decoder_shares_log_between_clones() {
        let decoder = ScriptedDecoder::on_call(2, "X", BarcodeFormat::Code39);
        let mut owned = decoder.clone();
        let image = GrayImage::new(4, 4);
        let formats = FormatSet::single(BarcodeFormat::Code39);

        let first = owned
            .decode(&image, &formats, DecodeOptions::default())
            .expect("scripted decode");
        let second = owned
            .decode(&image, &formats, DecodeOptions::default())
            .expect("scripted decode");
        assert!(first.is_none());
        assert_eq!(second.map(|s| s.text).as_deref(), Some("X"));
        assert_eq!(decoder.calls().len(), 2);
    }
}
