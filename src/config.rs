//! Scan tunables and the string-keyed configuration layer they are read from.
//!
//! Every tunable is parsed in exactly one place, [`ScanConfig::from_source`].
//! A missing key silently takes its default; a malformed value is logged and
//! also takes its default, so configuration can never stop a scan.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::format::{BarcodeFormat, FormatSet};

/// Configuration keys understood by [`ScanConfig::from_source`].
pub mod keys {
    /// Comma separated allow-list, e.g. `EAN_13,CODE_128,QR_CODE`.
    pub const FORMATS: &str = "scan.formats";
    /// Restrict decoding to one symbology (`none` disables the override).
    pub const SINGLE_FORMAT: &str = "scan.single_format";
    /// Whether ROI narrowing is used at all.
    pub const ROI_ENABLED: &str = "scan.roi.enabled";
    /// ROI top edge, fraction of frame height (or percent if > 1).
    pub const ROI_TOP: &str = "scan.roi.top";
    /// ROI height, fraction of frame height (or percent if > 1).
    pub const ROI_HEIGHT: &str = "scan.roi.height";
    /// ROI left edge, fraction of frame width (or percent if > 1).
    pub const ROI_LEFT: &str = "scan.roi.left";
    /// ROI width, fraction of frame width (or percent if > 1).
    pub const ROI_WIDTH: &str = "scan.roi.width";
    /// Minimum milliseconds between decode attempts.
    pub const DECODE_COOLDOWN_MS: &str = "scan.decode.cooldown_ms";
    /// Upscale factor applied to the second candidate of each region.
    pub const DECODE_SCALE: &str = "scan.decode.scale";
    /// Exhaustive search in the decoder.
    pub const TRY_HARDER: &str = "scan.decode.try_harder";
    /// Also look for light-on-dark symbols.
    pub const TRY_INVERTED: &str = "scan.decode.try_inverted";
    /// Sliding session timeout in milliseconds.
    pub const BASE_TIMEOUT_MS: &str = "scan.timeout.base_ms";
    /// Hard session ceiling in milliseconds.
    pub const ABSOLUTE_TIMEOUT_MS: &str = "scan.timeout.absolute_ms";
    /// Glare mitigation for glossy packaging.
    pub const GLOSSY_SURFACE: &str = "scan.surface.glossy";
    /// Local contrast and sharpening for matte packaging.
    pub const MATTE_SURFACE: &str = "scan.surface.matte";
    /// Close-up mode: narrow centred band, more zoom.
    pub const NEAR_OPTIMIZATION: &str = "scan.near_optimization";
    /// Cool-off after a successful read before a new session may start.
    pub const SUCCESS_COOLOFF_MS: &str = "scan.success_cooloff_ms";
    /// Minimum milliseconds between frames that trigger decode work.
    pub const FRAME_THROTTLE_MS: &str = "scan.frame_throttle_ms";
    /// Time allowed for the first frame after a camera start.
    pub const WATCHDOG_GRACE_MS: &str = "camera.watchdog_grace_ms";
    /// Preferred capture width in pixels.
    pub const CAMERA_WIDTH: &str = "camera.width";
    /// Preferred capture height in pixels.
    pub const CAMERA_HEIGHT: &str = "camera.height";
}

/// Read-only, string-keyed configuration store.
pub trait ConfigSource {
    /// Raw value for `key`, if present.
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Error loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON.
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    /// The top level of the document is not an object.
    #[error("config root must be a JSON object")]
    NotAnObject,
}

/// In-memory [`ConfigSource`].
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// Create an empty store; every tunable takes its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with<V: ToString>(mut self, key: &str, value: V) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert<V: ToString>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_owned(), value.to_string());
    }

    /// Parse a JSON document. Nested objects become dotted keys and arrays
    /// become comma separated lists, so `{"scan": {"formats": ["EAN_13"]}}`
    /// yields `scan.formats = "EAN_13"`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(json)?;
        let Value::Object(map) = root else {
            return Err(ConfigError::NotAnObject);
        };

        let mut config = Self::new();
        for (key, value) in &map {
            flatten_into(&mut config.values, key, value);
        }
        Ok(config)
    }

    /// Read and parse a JSON file, see [`MapConfig::from_json_str`].
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

fn flatten_into(out: &mut HashMap<String, String>, key: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (child, value) in map {
                flatten_into(out, &format!("{key}.{child}"), value);
            }
        }
        Value::Array(items) => {
            let joined: Vec<String> = items.iter().map(scalar_to_string).collect();
            out.insert(key.to_owned(), joined.join(","));
        }
        Value::Null => {}
        scalar => {
            out.insert(key.to_owned(), scalar_to_string(scalar));
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// ROI placement as fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiPercent {
    /// Top edge.
    pub top: f32,
    /// Band height.
    pub height: f32,
    /// Left edge.
    pub left: f32,
    /// Band width.
    pub width: f32,
}

impl Default for RoiPercent {
    fn default() -> Self {
        Self {
            top: 0.25,
            height: 0.5,
            left: 0.05,
            width: 0.9,
        }
    }
}

/// Snapshot of every scan tunable, read once per session or on reload.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Allowed symbologies in priority order.
    pub formats: FormatSet,
    /// When set, decode only this symbology.
    pub single_format: Option<BarcodeFormat>,
    /// Whether ROI narrowing is used.
    pub use_roi: bool,
    /// Configured ROI.
    pub roi: RoiPercent,
    /// Minimum time between decode attempts.
    pub decode_cooldown: Duration,
    /// Upscale factor for the second candidate of each region.
    pub decode_scale: f32,
    /// Sliding session timeout.
    pub base_timeout: Duration,
    /// Hard session ceiling.
    pub absolute_timeout: Duration,
    /// Exhaustive decoder search.
    pub try_harder: bool,
    /// Look for inverted (light-on-dark) symbols.
    pub try_inverted: bool,
    /// Glare mitigation variant.
    pub glossy_surface: bool,
    /// Local contrast and sharpening variant.
    pub matte_surface: bool,
    /// Close-up band and extra zoom.
    pub near_optimization: bool,
    /// Time after a success during which new sessions are refused.
    pub success_cooloff: Duration,
    /// Minimum spacing of frames that trigger decode work.
    pub frame_throttle: Duration,
    /// Time allowed for the first frame after a camera start.
    pub watchdog_grace: Duration,
    /// Preferred capture resolution.
    pub preferred_resolution: Option<(u32, u32)>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            formats: FormatSet::default(),
            single_format: None,
            use_roi: true,
            roi: RoiPercent::default(),
            decode_cooldown: Duration::from_millis(300),
            decode_scale: 1.5,
            base_timeout: Duration::from_millis(8_000),
            absolute_timeout: Duration::from_millis(20_000),
            try_harder: true,
            try_inverted: false,
            glossy_surface: false,
            matte_surface: false,
            near_optimization: false,
            success_cooloff: Duration::from_millis(1_000),
            frame_throttle: Duration::from_millis(20),
            watchdog_grace: Duration::from_millis(2_000),
            preferred_resolution: None,
        }
    }
}

impl ScanConfig {
    /// Build a snapshot from `source`, falling back to the default of each
    /// key that is missing or malformed.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        let reader = Reader { source };

        let roi = RoiPercent {
            top: reader.f32(keys::ROI_TOP, defaults.roi.top),
            height: reader.f32(keys::ROI_HEIGHT, defaults.roi.height),
            left: reader.f32(keys::ROI_LEFT, defaults.roi.left),
            width: reader.f32(keys::ROI_WIDTH, defaults.roi.width),
        };

        let preferred_resolution = match (
            reader.u32_opt(keys::CAMERA_WIDTH),
            reader.u32_opt(keys::CAMERA_HEIGHT),
        ) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some((width, height)),
            _ => defaults.preferred_resolution,
        };

        let decode_scale = reader.f32(keys::DECODE_SCALE, defaults.decode_scale);
        let decode_scale = if decode_scale.is_finite() && decode_scale > 0.0 {
            decode_scale
        } else {
            warn!(key = keys::DECODE_SCALE, decode_scale, "Non-positive decode scale; using default");
            defaults.decode_scale
        };

        Self {
            formats: reader.formats(keys::FORMATS, defaults.formats),
            single_format: reader.single_format(keys::SINGLE_FORMAT),
            use_roi: reader.bool(keys::ROI_ENABLED, defaults.use_roi),
            roi,
            decode_cooldown: reader.millis(keys::DECODE_COOLDOWN_MS, defaults.decode_cooldown),
            decode_scale,
            base_timeout: reader.positive_millis(keys::BASE_TIMEOUT_MS, defaults.base_timeout),
            absolute_timeout: reader
                .positive_millis(keys::ABSOLUTE_TIMEOUT_MS, defaults.absolute_timeout),
            try_harder: reader.bool(keys::TRY_HARDER, defaults.try_harder),
            try_inverted: reader.bool(keys::TRY_INVERTED, defaults.try_inverted),
            glossy_surface: reader.bool(keys::GLOSSY_SURFACE, defaults.glossy_surface),
            matte_surface: reader.bool(keys::MATTE_SURFACE, defaults.matte_surface),
            near_optimization: reader.bool(keys::NEAR_OPTIMIZATION, defaults.near_optimization),
            success_cooloff: reader.millis(keys::SUCCESS_COOLOFF_MS, defaults.success_cooloff),
            frame_throttle: reader.millis(keys::FRAME_THROTTLE_MS, defaults.frame_throttle),
            watchdog_grace: reader
                .positive_millis(keys::WATCHDOG_GRACE_MS, defaults.watchdog_grace),
            preferred_resolution,
        }
    }

    /// The symbologies a decode attempt may report, honouring the
    /// single-format override.
    #[must_use]
    pub fn allowed_formats(&self) -> FormatSet {
        self.single_format
            .map_or_else(|| self.formats.clone(), FormatSet::single)
    }
}

struct Reader<'a> {
    source: &'a dyn ConfigSource,
}

impl Reader<'_> {
    fn raw(&self, key: &str) -> Option<String> {
        self.source
            .get(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                warn!(key, value = %raw, default, "Malformed boolean; using default");
                default
            }
        }
    }

    fn f32(&self, key: &str, default: f32) -> f32 {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.parse::<f32>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                warn!(key, value = %raw, default, "Malformed number; using default");
                default
            }
        }
    }

    fn u32_opt(&self, key: &str) -> Option<u32> {
        let raw = self.raw(key)?;
        raw.parse::<u32>()
            .map_err(|err| warn!(key, value = %raw, %err, "Malformed integer; ignoring"))
            .ok()
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(err) => {
                warn!(key, value = %raw, %err, default_ms = default.as_millis(), "Malformed duration; using default");
                default
            }
        }
    }

    /// Like [`Reader::millis`], but zero is malformed.
    fn positive_millis(&self, key: &str, default: Duration) -> Duration {
        let value = self.millis(key, default);
        if value.is_zero() {
            warn!(key, default_ms = default.as_millis(), "Zero duration; using default");
            default
        } else {
            value
        }
    }

    fn formats(&self, key: &str, default: FormatSet) -> FormatSet {
        let Some(raw) = self.raw(key) else {
            return default;
        };

        let formats: FormatSet = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| {
                name.parse::<BarcodeFormat>()
                    .map_err(|err| warn!(key, %err, "Skipping unknown format"))
                    .ok()
            })
            .collect();

        if formats.is_empty() {
            warn!(key, value = %raw, "No usable formats; using default allow-list");
            default
        } else {
            formats
        }
    }

    fn single_format(&self, key: &str) -> Option<BarcodeFormat> {
        let raw = self.raw(key)?;
        if matches!(raw.to_ascii_lowercase().as_str(), "none" | "auto" | "all") {
            return None;
        }
        raw.parse::<BarcodeFormat>()
            .map_err(|err| warn!(key, %err, "Ignoring single-format override"))
            .ok()
    }
}
