//! The opaque decode capability and the policy for invoking it.
//!
//! [`Decoder`] is whatever actually recognises symbols. [`DecodePolicy`]
//! decides how it is called: two passes per candidate (matrix formats first),
//! the single-format fast path, text sanitisation, and short-circuiting a
//! frame's candidate sequence at the first hit.

use image::GrayImage;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::candidate::{CandidatePlan, DecodeCandidate};
use crate::config::ScanConfig;
use crate::format::{BarcodeFormat, FormatSet};
use crate::imaging;
use crate::roi::Point;

/// Per-call decoder options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Spend more time looking for a symbol.
    pub try_harder: bool,
    /// Also look for light-on-dark symbols.
    pub try_inverted: bool,
}

/// A symbol found by a [`Decoder`], in the coordinates of the image it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSymbol {
    /// Raw decoded text.
    pub text: String,
    /// Symbology.
    pub format: BarcodeFormat,
    /// Outline or finder points.
    pub points: Vec<Point>,
}

/// Failure inside a decoder backend. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The backend rejected the input or failed internally.
    #[error("decoder backend failed: {0}")]
    Backend(String),
}

/// Symbol recognition capability.
pub trait Decoder: Send {
    /// Look for one symbol of an allowed format in `image`.
    fn decode(
        &mut self,
        image: &GrayImage,
        formats: &FormatSet,
        options: DecodeOptions,
    ) -> Result<Option<DecodedSymbol>, DecodeError>;
}

impl<D: Decoder + ?Sized> Decoder for Box<D> {
    fn decode(
        &mut self,
        image: &GrayImage,
        formats: &FormatSet,
        options: DecodeOptions,
    ) -> Result<Option<DecodedSymbol>, DecodeError> {
        (**self).decode(image, formats, options)
    }
}

/// Outcome of decoding one candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeAttemptResult {
    /// Sanitised text, present on success.
    pub text: Option<String>,
    /// Symbology, present on success.
    pub format: Option<BarcodeFormat>,
    /// Geometry in frame coordinates.
    pub points: Vec<Point>,
    /// Whether a non-empty value was read.
    pub success: bool,
}

impl DecodeAttemptResult {
    /// An attempt that found nothing.
    #[must_use]
    pub fn miss() -> Self {
        Self::default()
    }
}

/// A successful decode together with the candidate that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHit {
    /// The winning candidate.
    pub candidate: DecodeCandidate,
    /// Its result.
    pub result: DecodeAttemptResult,
    /// How many candidates were tried, including the winner.
    pub candidates_tried: usize,
}

/// Strip control characters and surrounding whitespace.
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_owned()
}

/// How decode attempts are made for a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodePolicy {
    options: DecodeOptions,
    single_format: Option<BarcodeFormat>,
}

impl DecodePolicy {
    /// Policy for a configuration snapshot.
    #[must_use]
    pub const fn from_config(config: &ScanConfig) -> Self {
        Self {
            options: DecodeOptions {
                try_harder: config.try_harder,
                try_inverted: config.try_inverted,
            },
            single_format: config.single_format,
        }
    }

    /// Options actually used for one call. A single-format override turns
    /// `try_harder` off for that call only; the stored options are unchanged.
    #[must_use]
    pub const fn call_options(&self) -> DecodeOptions {
        if self.single_format.is_some() {
            DecodeOptions {
                try_harder: false,
                ..self.options
            }
        } else {
            self.options
        }
    }

    /// Decode one prepared candidate buffer.
    pub fn try_decode(
        &self,
        decoder: &mut dyn Decoder,
        image: &GrayImage,
        candidate: &DecodeCandidate,
    ) -> DecodeAttemptResult {
        let options = self.call_options();
        let matrix = candidate.formats.two_dimensional();

        let mut passes: Vec<&FormatSet> = Vec::with_capacity(2);
        if !matrix.is_empty() && matrix != candidate.formats {
            passes.push(&matrix);
        }
        passes.push(&candidate.formats);

        for formats in passes {
            let symbol = match decoder.decode(image, formats, options) {
                Ok(Some(symbol)) => symbol,
                Ok(None) => continue,
                Err(err) => {
                    warn!(%err, formats = %formats, "Decoder failed; treating as a miss");
                    continue;
                }
            };

            if !formats.contains(symbol.format) {
                warn!(
                    format = %symbol.format,
                    allowed = %formats,
                    "Decoder reported a format outside the allow-list"
                );
                continue;
            }

            let text = sanitize(&symbol.text);
            if text.is_empty() {
                trace!(format = %symbol.format, "Discarding empty decode result");
                continue;
            }

            return DecodeAttemptResult {
                text: Some(text),
                format: Some(symbol.format),
                points: symbol
                    .points
                    .into_iter()
                    .map(|point| candidate.to_frame_point(point))
                    .collect(),
                success: true,
            };
        }

        DecodeAttemptResult::miss()
    }

    /// Walk `plan` in order and stop at the first successful candidate.
    /// Candidate buffers are built one at a time and dropped after use.
    pub fn decode_frame(
        &self,
        decoder: &mut dyn Decoder,
        luma: &GrayImage,
        plan: &CandidatePlan,
    ) -> Option<FrameHit> {
        for (index, candidate) in plan.iter().enumerate() {
            let buffer = imaging::render_candidate(luma, &candidate);
            let result = self.try_decode(decoder, &buffer, &candidate);
            if result.success {
                debug!(
                    index,
                    scale = candidate.scale,
                    variant = ?candidate.variant,
                    "Candidate decoded"
                );
                return Some(FrameHit {
                    candidate,
                    result,
                    candidates_tried: index + 1,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{self, SurfaceOptimizations, Variant};
    use crate::mock::ScriptedDecoder;
    use crate::roi::Region;
    use image::Luma;

    fn linear_config() -> ScanConfig {
        ScanConfig {
            formats: [BarcodeFormat::Ean13, BarcodeFormat::Code128]
                .into_iter()
                .collect(),
            ..ScanConfig::default()
        }
    }

    fn candidate(formats: FormatSet) -> DecodeCandidate {
        DecodeCandidate {
            region: Region::full(64, 48),
            scale: 1.0,
            variant: Variant::None,
            formats,
        }
    }

    fn blank() -> GrayImage {
        GrayImage::from_pixel(64, 48, Luma([255]))
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  4006381333931\r\n"), "4006381333931");
        assert_eq!(sanitize("\u{1d}0101234\u{0}567"), "0101234567");
        assert_eq!(sanitize(" \t\n"), "");
    }

    #[test]
    fn test_matrix_pass_runs_first() {
        let mut decoder = ScriptedDecoder::never();
        let policy = DecodePolicy::from_config(&ScanConfig::default());
        let result = policy.try_decode(&mut decoder, &blank(), &candidate(FormatSet::default()));

        assert!(!result.success);
        let calls = decoder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].formats, FormatSet::default().two_dimensional());
        assert_eq!(calls[1].formats, FormatSet::default());
    }

    #[test]
    fn test_linear_only_allow_list_is_one_pass() {
        let mut decoder = ScriptedDecoder::never();
        let config = linear_config();
        let policy = DecodePolicy::from_config(&config);
        policy.try_decode(&mut decoder, &blank(), &candidate(config.formats.clone()));
        assert_eq!(decoder.calls().len(), 1);
    }

    #[test]
    fn test_single_format_disables_try_harder_per_call() {
        let config = ScanConfig {
            single_format: Some(BarcodeFormat::QrCode),
            try_harder: true,
            ..ScanConfig::default()
        };
        let policy = DecodePolicy::from_config(&config);
        let mut decoder = ScriptedDecoder::never();

        policy.try_decode(&mut decoder, &blank(), &candidate(config.allowed_formats()));
        let calls = decoder.calls();
        // The 2D subset equals the allow-list, so only one pass
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].options.try_harder);

        // Restored for the next call: the policy itself never changes
        assert_eq!(policy, DecodePolicy::from_config(&config));
        let unrestricted = DecodePolicy::from_config(&ScanConfig::default());
        assert!(unrestricted.call_options().try_harder);
    }

    #[test]
    fn test_empty_text_is_not_a_result() {
        let mut decoder = ScriptedDecoder::always(" \r\n", BarcodeFormat::Ean13);
        let config = linear_config();
        let policy = DecodePolicy::from_config(&config);
        let result = policy.try_decode(&mut decoder, &blank(), &candidate(config.formats.clone()));
        assert_eq!(result, DecodeAttemptResult::miss());
    }

    #[test]
    fn test_disallowed_format_is_not_a_result() {
        let mut decoder = ScriptedDecoder::always("https://example.com", BarcodeFormat::QrCode);
        let config = linear_config();
        let policy = DecodePolicy::from_config(&config);
        let result = policy.try_decode(&mut decoder, &blank(), &candidate(config.formats.clone()));
        assert_eq!(result, DecodeAttemptResult::miss());
        assert_eq!(decoder.calls().len(), 1);
    }

    #[test]
    fn test_matrix_pass_only_accepts_matrix_formats() {
        // Reported as linear during the 2D pass, accepted on the full pass
        let mut decoder = ScriptedDecoder::always("4006381333931", BarcodeFormat::Ean13);
        let policy = DecodePolicy::from_config(&ScanConfig::default());
        let result = policy.try_decode(&mut decoder, &blank(), &candidate(FormatSet::default()));
        assert!(result.success);
        assert_eq!(decoder.calls().len(), 2);
    }

    #[test]
    fn test_backend_error_is_a_miss() {
        let mut decoder = ScriptedDecoder::failing();
        let policy = DecodePolicy::from_config(&ScanConfig::default());
        let result = policy.try_decode(&mut decoder, &blank(), &candidate(FormatSet::default()));
        assert!(!result.success);
    }

    #[test]
    fn test_points_are_mapped_to_frame_space() {
        let mut decoder = ScriptedDecoder::always("ABC", BarcodeFormat::Code128)
            .with_points(vec![Point::new(20.0, 10.0)]);
        let config = linear_config();
        let policy = DecodePolicy::from_config(&config);
        let scaled = DecodeCandidate {
            region: Region {
                left: 8,
                top: 4,
                width: 32,
                height: 24,
            },
            scale: 2.0,
            variant: Variant::None,
            formats: config.formats.clone(),
        };
        let result = policy.try_decode(&mut decoder, &blank(), &scaled);
        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("ABC"));
        assert_eq!(result.points, vec![Point::new(18.0, 9.0)]);
    }

    #[test]
    fn test_short_circuit_on_nth_candidate() {
        let config = linear_config();
        let region = Region {
            left: 8,
            top: 30,
            width: 144,
            height: 60,
        };
        let plan = candidate::build(160, 120, region, &config, false, SurfaceOptimizations::default());
        assert_eq!(plan.len(), 6);
        let luma = GrayImage::from_pixel(160, 120, Luma([200]));
        let policy = DecodePolicy::from_config(&config);

        for n in 1..=plan.len() {
            let mut decoder = ScriptedDecoder::on_call(n, "12345", BarcodeFormat::Code128);
            let hit = policy
                .decode_frame(&mut decoder, &luma, &plan)
                .expect("decoder succeeds on a planned candidate");
            assert_eq!(decoder.calls().len(), n);
            assert_eq!(hit.candidates_tried, n);
            assert_eq!(plan.get(n - 1).as_ref(), Some(&hit.candidate));
        }

        let mut decoder = ScriptedDecoder::never();
        assert!(policy.decode_frame(&mut decoder, &luma, &plan).is_none());
        assert_eq!(decoder.calls().len(), plan.len());
    }
}
