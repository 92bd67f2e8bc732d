//! Image-space to display-space mapping for detection outlines.

use crate::roi::Point;

/// Width and height in (possibly fractional) units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    /// Horizontal extent.
    pub width: f32,
    /// Vertical extent.
    pub height: f32,
}

impl Size {
    /// Create a size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_degenerate(self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
}

/// Device scale factors applied after layout (e.g. `HiDPI`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScale {
    /// Horizontal factor.
    pub x: f32,
    /// Vertical factor.
    pub y: f32,
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Map a frame point onto a display that shows the frame aspect-fitted
/// (letterboxed) and scaled by `scale`. The result is clamped to the visible
/// video rectangle.
#[must_use]
pub fn map_point(point: Point, frame: Size, display: Size, scale: DisplayScale) -> Point {
    if frame.is_degenerate() || display.is_degenerate() {
        return Point::new(0.0, 0.0);
    }

    let fit = (display.width / frame.width).min(display.height / frame.height);
    let offset_x = frame.width.mul_add(-fit, display.width) / 2.0;
    let offset_y = frame.height.mul_add(-fit, display.height) / 2.0;

    let x = point.x.clamp(0.0, frame.width).mul_add(fit, offset_x);
    let y = point.y.clamp(0.0, frame.height).mul_add(fit, offset_y);

    Point::new(x * scale.x, y * scale.y)
}

/// Map every point of an outline, see [`map_point`].
#[must_use]
pub fn map_outline(points: &[Point], frame: Size, display: Size, scale: DisplayScale) -> Vec<Point> {
    points
        .iter()
        .map(|&point| map_point(point, frame, display, scale))
        .collect()
}
