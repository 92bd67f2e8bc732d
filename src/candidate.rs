//! Decode candidate planning.
//!
//! A [`CandidatePlan`] describes, in priority order, every (region, scale,
//! preprocessing) combination worth trying on one frame. It holds no pixel
//! data; buffers are built by [`crate::imaging`] only when the decoder stage
//! actually reaches a candidate.

use crate::config::ScanConfig;
use crate::format::FormatSet;
use crate::roi::{Point, Region};

/// Extra zoom applied on top of the decode scale in near-distance mode.
const NEAR_EXTRA_ZOOM: f32 = 1.6;
/// Extra zoom applied on top of the decode scale otherwise.
const DEFAULT_EXTRA_ZOOM: f32 = 1.25;
/// Lower bound for the extra-zoom candidate.
const MIN_EXTRA_ZOOM: f32 = 1.1;
/// Scales closer than this are considered the same candidate.
const SCALE_EPSILON: f32 = 1e-3;
/// Longest edge a scaled candidate buffer may have.
pub const MAX_CANDIDATE_EDGE: u32 = 4096;

/// Preprocessing applied to a candidate buffer before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Plain luma.
    None,
    /// Glare mitigation for glossy surfaces.
    Glossy,
    /// Local contrast and sharpening for matte surfaces.
    Matte,
}

/// Which surface-specific variants to try.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceOptimizations {
    /// Try the glossy variant (first).
    pub glossy: bool,
    /// Try the matte variant (after glossy).
    pub matte: bool,
}

impl SurfaceOptimizations {
    /// Surface toggles from configuration.
    #[must_use]
    pub const fn from_config(config: &ScanConfig) -> Self {
        Self {
            glossy: config.glossy_surface,
            matte: config.matte_surface,
        }
    }

    fn variants(self) -> Vec<Variant> {
        let mut variants = Vec::with_capacity(3);
        if self.glossy {
            variants.push(Variant::Glossy);
        }
        if self.matte {
            variants.push(Variant::Matte);
        }
        variants.push(Variant::None);
        variants
    }
}

/// One concrete decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeCandidate {
    /// Frame pixels to decode.
    pub region: Region,
    /// Resize factor applied to the region.
    pub scale: f32,
    /// Preprocessing to apply.
    pub variant: Variant,
    /// Symbologies the decoder may report.
    pub formats: FormatSet,
}

impl DecodeCandidate {
    /// Size of the buffer handed to the decoder, with the longest edge
    /// capped at [`MAX_CANDIDATE_EDGE`].
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn output_size(&self) -> (u32, u32) {
        let scale = |len: u32| ((len as f32 * self.scale).round() as u32).max(1);
        capped_size((scale(self.region.width), scale(self.region.height)))
    }

    /// Convert a point in candidate-buffer coordinates back to the frame.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_frame_point(&self, point: Point) -> Point {
        let (out_w, out_h) = self.output_size();
        let sx = out_w as f32 / self.region.width.max(1) as f32;
        let sy = out_h as f32 / self.region.height.max(1) as f32;
        Point::new(
            point.x / sx + self.region.left as f32,
            point.y / sy + self.region.top as f32,
        )
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn capped_size((width, height): (u32, u32)) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= MAX_CANDIDATE_EDGE {
        return (width, height);
    }
    let ratio = MAX_CANDIDATE_EDGE as f32 / longest as f32;
    (
        ((width as f32 * ratio).round() as u32).max(1),
        ((height as f32 * ratio).round() as u32).max(1),
    )
}

/// Lazily enumerated, restartable sequence of [`DecodeCandidate`]s.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    regions: Vec<Region>,
    scales: Vec<f32>,
    variants: Vec<Variant>,
    formats: FormatSet,
}

impl CandidatePlan {
    /// Total number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len() * self.scales.len() * self.variants.len()
    }

    /// Whether the plan has no candidates (only for empty frames).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`-th candidate in priority order.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<DecodeCandidate> {
        let per_region = self.scales.len() * self.variants.len();
        if per_region == 0 {
            return None;
        }
        let region = *self.regions.get(index / per_region)?;
        let scale = *self.scales.get((index / self.variants.len()) % self.scales.len())?;
        let variant = *self.variants.get(index % self.variants.len())?;
        Some(DecodeCandidate {
            region,
            scale,
            variant,
            formats: self.formats.clone(),
        })
    }

    /// Iterate the candidates from the start.
    #[must_use]
    pub const fn iter(&self) -> Candidates<'_> {
        Candidates {
            plan: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a CandidatePlan {
    type Item = DecodeCandidate;
    type IntoIter = Candidates<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`CandidatePlan`].
#[derive(Debug, Clone)]
pub struct Candidates<'a> {
    plan: &'a CandidatePlan,
    next: usize,
}

impl Iterator for Candidates<'_> {
    type Item = DecodeCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        let candidate = self.plan.get(self.next)?;
        self.next += 1;
        Some(candidate)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Candidates<'_> {}

fn push_scale(scales: &mut Vec<f32>, scale: f32) {
    if !scales.iter().any(|s| (s - scale).abs() < SCALE_EPSILON) {
        scales.push(scale);
    }
}

/// Plan the decode candidates for a `frame_width` x `frame_height` frame.
///
/// Order: the ROI at base, decode and extra-zoom scale, then the full frame
/// at the same three scales. Each (region, scale) pair expands into the
/// enabled surface variants followed by the plain buffer.
#[must_use]
pub fn build(
    frame_width: u32,
    frame_height: u32,
    region: Region,
    config: &ScanConfig,
    near_optimization: bool,
    surfaces: SurfaceOptimizations,
) -> CandidatePlan {
    let full = Region::full(frame_width, frame_height);
    let mut regions = Vec::with_capacity(2);
    if !region.is_empty() {
        regions.push(region);
    }
    if !full.is_empty() && region != full {
        regions.push(full);
    }

    let extra = if near_optimization {
        NEAR_EXTRA_ZOOM
    } else {
        DEFAULT_EXTRA_ZOOM
    };
    let mut scales = Vec::with_capacity(3);
    push_scale(&mut scales, 1.0);
    push_scale(&mut scales, config.decode_scale);
    push_scale(&mut scales, (config.decode_scale * extra).max(MIN_EXTRA_ZOOM));

    CandidatePlan {
        regions,
        scales,
        variants: surfaces.variants(),
        formats: config.allowed_formats(),
    }
}
