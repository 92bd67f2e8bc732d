//! Region-of-interest planning.
//!
//! [`plan`] picks the pixel rectangle of a frame that decoding starts from.
//! It is a pure function of its inputs; everything stateful (the near-distance
//! toggle, the full-frame fallback after timeouts) is passed in by the engine.

use crate::config::ScanConfig;

/// Vertical band used in near-distance mode, as fractions of frame height.
pub const NEAR_BAND_TOP: f32 = 0.325;
/// Height of the near-distance band.
pub const NEAR_BAND_HEIGHT: f32 = 0.35;
/// Thinnest configured band that is still allowed.
pub const MIN_HEIGHT_PERCENT: f32 = 0.3;

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Region {
    /// The whole `width` x `height` frame.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            width,
            height,
        }
    }

    /// Whether this region covers the entire frame.
    #[must_use]
    pub const fn is_full(&self, frame_width: u32, frame_height: u32) -> bool {
        self.left == 0 && self.top == 0 && self.width == frame_width && self.height == frame_height
    }

    /// Whether the region lies within `[0, width) x [0, height)`.
    #[must_use]
    pub const fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.left as u64 + self.width as u64 <= frame_width as u64
            && self.top as u64 + self.height as u64 <= frame_height as u64
    }

    /// Whether the region has no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Values above 1 are taken as percentages; the result is always in `[0, 1]`.
fn normalize(value: f32) -> f32 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    fraction.min(1.0)
}

/// Map a `[start, start + extent)` fraction span onto `0..total` pixels.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn span(start: f32, extent: f32, total: u32) -> (u32, u32) {
    if total == 0 {
        return (0, 0);
    }
    let total_f = total as f32;
    let offset = ((start * total_f).round() as u32).min(total - 1);
    let length = ((extent * total_f).round() as u32).clamp(1, total - offset);
    (offset, length)
}

/// Compute the region to decode for a `width` x `height` frame.
///
/// Precedence: ROI disabled or `fallback_full_frame` gives the full frame,
/// then the near-distance band, then the configured percentages.
#[must_use]
pub fn plan(
    width: u32,
    height: u32,
    config: &ScanConfig,
    near_optimization: bool,
    fallback_full_frame: bool,
) -> Region {
    if !config.use_roi || fallback_full_frame {
        return Region::full(width, height);
    }

    let (top, band) = if near_optimization {
        (NEAR_BAND_TOP, NEAR_BAND_HEIGHT)
    } else {
        (
            normalize(config.roi.top),
            normalize(config.roi.height).max(MIN_HEIGHT_PERCENT),
        )
    };

    let (left_px, width_px) = span(
        normalize(config.roi.left),
        normalize(config.roi.width),
        width,
    );
    let (top_px, height_px) = span(top, band, height);

    Region {
        left: left_px,
        top: top_px,
        width: width_px,
        height: height_px,
    }
}
