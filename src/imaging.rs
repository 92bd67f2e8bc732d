//! Frame to luma conversion and per-candidate buffer preparation.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma};

use crate::candidate::{DecodeCandidate, Variant};
use crate::traits::{CameraError, FourCC, Frame, Result};

/// Pixels brighter than this are treated as glare by the glossy variant.
const GLARE_KNEE: f32 = 200.0;
/// Slope applied above the knee.
const GLARE_SLOPE: f32 = 0.35;
/// Share of pixels ignored at each end when stretching contrast.
const STRETCH_CLIP: f32 = 0.01;
/// Contrast boost of the matte variant, in percent.
const MATTE_CONTRAST: f32 = 30.0;
/// Unsharp-mask radius of the matte variant.
const MATTE_SHARPEN_SIGMA: f32 = 1.2;
/// Unsharp-mask threshold of the matte variant.
const MATTE_SHARPEN_THRESHOLD: i32 = 4;

/// Convert a captured frame to an 8-bit luma image.
pub fn frame_to_luma(frame: &Frame) -> Result<GrayImage> {
    let format = &frame.format;
    if format.width == 0 || format.height == 0 {
        return Err(CameraError::InvalidFrame(format!(
            "empty {}x{} frame",
            format.width, format.height
        )));
    }

    if format.fourcc == FourCC::MJPG {
        return decode_mjpg(frame);
    }

    let Some(bpp) = format.fourcc.bytes_per_pixel() else {
        return Err(CameraError::InvalidFrame(format!(
            "unsupported pixel format {}",
            format.fourcc
        )));
    };

    let row_bytes = format.width as usize * bpp as usize;
    let stride = (format.stride as usize).max(row_bytes);
    let needed = stride * (format.height as usize - 1) + row_bytes;
    if frame.data.len() < needed {
        return Err(CameraError::InvalidFrame(format!(
            "{} bytes is too small for {}x{} {} (need {needed})",
            frame.data.len(),
            format.width,
            format.height,
            format.fourcc
        )));
    }

    let mut luma = Vec::with_capacity(format.width as usize * format.height as usize);
    for row in frame.data.chunks(stride).take(format.height as usize) {
        let pixels = row.get(..row_bytes).unwrap_or(row);
        match &format.fourcc.0 {
            // Y0 U Y1 V: every even byte is luma
            b"YUYV" => luma.extend(pixels.iter().step_by(2)),
            b"RGB3" => luma.extend(pixels.chunks_exact(3).map(rgb_luma)),
            _ => luma.extend_from_slice(pixels),
        }
    }

    GrayImage::from_raw(format.width, format.height, luma)
        .ok_or_else(|| CameraError::InvalidFrame("luma buffer size mismatch".to_owned()))
}

fn decode_mjpg(frame: &Frame) -> Result<GrayImage> {
    let image = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
        .map_err(|err| CameraError::InvalidFrame(format!("MJPG decode failed: {err}")))?;
    Ok(image.to_luma8())
}

/// ITU-R BT.601 luma from an RGB triple.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn rgb_luma(rgb: &[u8]) -> u8 {
    let [r, g, b] = [0, 1, 2].map(|i| f32::from(rgb.get(i).copied().unwrap_or(0)));
    0.114f32
        .mul_add(b, 0.587f32.mul_add(g, 0.299 * r))
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Build the buffer the decoder sees for `candidate`: crop, resize, then the
/// candidate's preprocessing variant.
///
/// The returned image is owned by the caller and dropped after the attempt.
pub fn render_candidate(luma: &GrayImage, candidate: &DecodeCandidate) -> GrayImage {
    let region = candidate.region;
    let cropped = if region.width == luma.width() && region.height == luma.height() {
        luma.clone()
    } else {
        imageops::crop_imm(luma, region.left, region.top, region.width, region.height).to_image()
    };

    let (width, height) = candidate.output_size();
    let scaled = if (width, height) == cropped.dimensions() {
        cropped
    } else {
        imageops::resize(&cropped, width, height, FilterType::Triangle)
    };

    match candidate.variant {
        Variant::None => scaled,
        Variant::Glossy => glossy(&scaled),
        Variant::Matte => matte(&scaled),
    }
}

/// Glare mitigation: compress highlights, then stretch the remaining range.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn glossy(image: &GrayImage) -> GrayImage {
    let compressed = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let Luma([v]) = *image.get_pixel(x, y);
        let v = f32::from(v);
        let out = if v > GLARE_KNEE {
            (v - GLARE_KNEE).mul_add(GLARE_SLOPE, GLARE_KNEE)
        } else {
            v
        };
        Luma([out.round() as u8])
    });
    stretch_contrast(&compressed)
}

/// Matte surfaces: contrast boost followed by an unsharp mask.
pub fn matte(image: &GrayImage) -> GrayImage {
    let boosted = imageops::contrast(image, MATTE_CONTRAST);
    imageops::unsharpen(&boosted, MATTE_SHARPEN_SIGMA, MATTE_SHARPEN_THRESHOLD)
}

/// Linear stretch between the 1st and 99th percentile.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn stretch_contrast(image: &GrayImage) -> GrayImage {
    let mut histogram = [0usize; 256];
    for Luma([v]) in image.pixels() {
        if let Some(bin) = histogram.get_mut(usize::from(*v)) {
            *bin += 1;
        }
    }

    let total = image.pixels().len();
    let clip = (total as f32 * STRETCH_CLIP) as usize;
    let low = percentile(&histogram, clip);
    let high = percentile(&histogram, total.saturating_sub(clip + 1));
    if high <= low {
        return image.clone();
    }

    let range = f32::from(high - low);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let Luma([v]) = *image.get_pixel(x, y);
        let v = f32::from(v.clamp(low, high) - low);
        Luma([(v * 255.0 / range).round() as u8])
    })
}

/// Smallest value whose cumulative count exceeds `rank`.
fn percentile(histogram: &[usize; 256], rank: usize) -> u8 {
    let mut seen = 0;
    for (value, count) in (0u8..=255).zip(histogram.iter()) {
        seen += count;
        if seen > rank {
            return value;
        }
    }
    u8::MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatSet;
    use crate::mock::{generate_test_frame, TestPattern};
    use crate::roi::Region;
    use crate::traits::{Format, FrameMetadata};
    use std::time::Duration;

    fn frame(format: Format, data: Vec<u8>) -> Frame {
        Frame {
            data,
            format,
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 0,
            },
        }
    }

    #[test]
    fn test_yuyv_luma_takes_even_bytes() {
        let format = Format::new(4, 2, FourCC::YUYV);
        let data = vec![10, 128, 20, 128, 30, 128, 40, 128, 50, 1, 60, 2, 70, 3, 80, 4];
        let luma = frame_to_luma(&frame(format, data)).expect("valid frame");
        assert_eq!(luma.dimensions(), (4, 2));
        assert_eq!(luma.as_raw(), &vec![10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn test_grey_respects_stride_padding() {
        let mut format = Format::new(3, 2, FourCC::GREY);
        format.stride = 4;
        let data = vec![1, 2, 3, 99, 4, 5, 6];
        let luma = frame_to_luma(&frame(format, data)).expect("valid frame");
        assert_eq!(luma.as_raw(), &vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_rgb_luma() {
        let format = Format::new(2, 1, FourCC::RGB3);
        let data = vec![255, 255, 255, 0, 0, 0];
        let luma = frame_to_luma(&frame(format, data)).expect("valid frame");
        assert_eq!(luma.as_raw(), &vec![255, 0]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let result = frame_to_luma(&frame(format, vec![0; 100]));
        assert!(matches!(result, Err(CameraError::InvalidFrame(_))));
    }

    #[test]
    fn test_garbage_mjpg_is_rejected() {
        let format = Format::new(640, 480, FourCC::MJPG);
        let result = frame_to_luma(&frame(format, vec![0xFF, 0xD8, 0x00]));
        assert!(matches!(result, Err(CameraError::InvalidFrame(_))));
    }

    #[test]
    fn test_mock_frame_converts() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        let luma = frame_to_luma(&frame(format, data)).expect("valid frame");
        assert_eq!(luma.dimensions(), (640, 480));
        // First bar is white
        assert_eq!(luma.get_pixel(10, 10).0, [235]);
    }

    #[test]
    fn test_render_candidate_crops_and_scales() {
        let luma = GrayImage::from_fn(100, 80, |x, _| Luma([u8::try_from(x).unwrap_or(0)]));
        let candidate = DecodeCandidate {
            region: Region {
                left: 10,
                top: 20,
                width: 40,
                height: 30,
            },
            scale: 2.0,
            variant: Variant::None,
            formats: FormatSet::default(),
        };

        let rendered = render_candidate(&luma, &candidate);
        assert_eq!(rendered.dimensions(), (80, 60));

        let unscaled = DecodeCandidate {
            scale: 1.0,
            ..candidate
        };
        let rendered = render_candidate(&luma, &unscaled);
        assert_eq!(rendered.dimensions(), (40, 30));
        assert_eq!(rendered.get_pixel(0, 0).0, [10]);
    }

    #[test]
    fn test_oversized_candidate_renders_at_capped_size() {
        let luma = GrayImage::from_pixel(3000, 100, Luma([128]));
        let candidate = DecodeCandidate {
            region: Region::full(3000, 100),
            scale: 2.0,
            variant: Variant::None,
            formats: FormatSet::default(),
        };
        let rendered = render_candidate(&luma, &candidate);
        assert_eq!(rendered.dimensions(), candidate.output_size());
        assert_eq!(rendered.width(), crate::candidate::MAX_CANDIDATE_EDGE);
    }

    #[test]
    fn test_glossy_compresses_glare_and_stretches() {
        let image = GrayImage::from_fn(100, 1, |x, _| {
            Luma([if x < 50 { 60 } else { 250 }])
        });
        let out = glossy(&image);
        assert_eq!(out.get_pixel(0, 0).0, [0]);
        assert_eq!(out.get_pixel(99, 0).0, [255]);
    }

    #[test]
    fn test_flat_image_survives_preprocessing() {
        let image = GrayImage::from_pixel(16, 16, Luma([128]));
        assert_eq!(glossy(&image).dimensions(), (16, 16));
        assert_eq!(matte(&image).dimensions(), (16, 16));
    }
}
