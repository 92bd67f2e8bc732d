//! Scan-Engine: a live barcode scan-session engine over V4L2 cameras
//!
//! Frames pushed by a [`FrameSource`] are narrowed to a region of interest,
//! expanded into an ordered list of decode candidates (region, scale,
//! preprocessing) and handed to a pluggable [`Decoder`] until one reads a
//! symbol. A [`ScanEngine`] owns the session lifecycle around that: decode
//! debouncing, a sliding session timeout with a hard ceiling, full-frame
//! fallback after timeouts, and a camera watchdog.
//!
//! Hardware is abstracted by [`CameraDevice`] and [`CaptureStream`], so the
//! whole pipeline runs against mock devices in tests.

pub mod candidate;
pub mod config;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod format;
pub mod gate;
pub mod imaging;
pub mod mapper;
pub mod qr;
pub mod roi;
pub mod session;
pub mod source;
pub mod traits;
pub mod watchdog;

#[cfg(test)]
pub mod mock;

pub use config::{ConfigSource, MapConfig, ScanConfig};
pub use decoder::{DecodeOptions, DecodedSymbol, Decoder};
pub use device::V4L2Device;
pub use engine::{EngineError, ScanEngine, ScanEvent, ScanListener, ScanResult, SourceFactory};
pub use format::{BarcodeFormat, FormatSet};
pub use qr::QrDecoder;
pub use source::{CaptureSource, FrameSink, FrameSource, SourceRequest};
pub use traits::{
    CameraDevice, CameraError, CaptureStream, DeviceCapabilities, Format, FourCC, Frame,
    FrameMetadata,
};
