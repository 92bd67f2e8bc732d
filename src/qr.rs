//! QR-only [`Decoder`] backed by `rqrr`.

use image::{GrayImage, Luma};
use tracing::debug;

use crate::decoder::{DecodeError, DecodeOptions, DecodedSymbol, Decoder};
use crate::format::{BarcodeFormat, FormatSet};
use crate::roi::Point;

/// Reference decoder for QR codes.
///
/// Without `try_harder` only the first detected grid is decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrDecoder;

impl QrDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn scan(image: &GrayImage, try_harder: bool, inverted: bool) -> Option<DecodedSymbol> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| {
                #[allow(clippy::cast_possible_truncation)]
                let Luma([v]) = *image.get_pixel(x as u32, y as u32);
                if inverted {
                    u8::MAX - v
                } else {
                    v
                }
            },
        );

        let grids = prepared.detect_grids();
        let limit = if try_harder { grids.len() } else { 1 };
        debug!(found = grids.len(), inverted, "QR grids detected");

        grids.iter().take(limit).find_map(|grid| {
            let (_, text) = grid
                .decode()
                .map_err(|err| debug!(?err, "QR grid did not decode"))
                .ok()?;
            #[allow(clippy::cast_precision_loss)]
            let points = grid
                .bounds
                .iter()
                .map(|p| Point::new(p.x as f32, p.y as f32))
                .collect();
            Some(DecodedSymbol {
                text,
                format: BarcodeFormat::QrCode,
                points,
            })
        })
    }
}

impl Decoder for QrDecoder {
    fn decode(
        &mut self,
        image: &GrayImage,
        formats: &FormatSet,
        options: DecodeOptions,
    ) -> Result<Option<DecodedSymbol>, DecodeError> {
        if !formats.contains(BarcodeFormat::QrCode) || image.width() == 0 || image.height() == 0 {
            return Ok(None);
        }

        let mut found = Self::scan(image, options.try_harder, false);
        if found.is_none() && options.try_inverted {
            found = Self::scan(image, options.try_harder, true);
        }
        Ok(found)
    }
}
