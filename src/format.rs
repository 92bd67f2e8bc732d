//! Barcode symbologies and ordered allow-lists.

use std::fmt;
use std::str::FromStr;

/// A barcode symbology the scan engine can ask a decoder for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarcodeFormat {
    /// EAN-13 / GTIN-13.
    Ean13,
    /// EAN-8.
    Ean8,
    /// UPC-A.
    UpcA,
    /// UPC-E.
    UpcE,
    /// Code 128.
    Code128,
    /// Code 39.
    Code39,
    /// Code 93.
    Code93,
    /// Codabar.
    Codabar,
    /// Interleaved 2 of 5.
    Itf,
    /// QR Code.
    QrCode,
    /// Data Matrix.
    DataMatrix,
    /// Aztec.
    Aztec,
    /// PDF417.
    Pdf417,
}

impl BarcodeFormat {
    /// Every known symbology, linear formats first.
    pub const ALL: [Self; 13] = [
        Self::Ean13,
        Self::Ean8,
        Self::UpcA,
        Self::UpcE,
        Self::Code128,
        Self::Code39,
        Self::Code93,
        Self::Codabar,
        Self::Itf,
        Self::QrCode,
        Self::DataMatrix,
        Self::Aztec,
        Self::Pdf417,
    ];

    /// Whether this is a matrix (2D) symbology.
    #[must_use]
    pub const fn is_two_dimensional(self) -> bool {
        matches!(
            self,
            Self::QrCode | Self::DataMatrix | Self::Aztec | Self::Pdf417
        )
    }

    /// Canonical upper-case name, as used in configuration values.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ean13 => "EAN_13",
            Self::Ean8 => "EAN_8",
            Self::UpcA => "UPC_A",
            Self::UpcE => "UPC_E",
            Self::Code128 => "CODE_128",
            Self::Code39 => "CODE_39",
            Self::Code93 => "CODE_93",
            Self::Codabar => "CODABAR",
            Self::Itf => "ITF",
            Self::QrCode => "QR_CODE",
            Self::DataMatrix => "DATA_MATRIX",
            Self::Aztec => "AZTEC",
            Self::Pdf417 => "PDF_417",
        }
    }
}

impl fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a symbology name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown barcode format: {0:?}")]
pub struct UnknownFormat(pub String);

impl FromStr for BarcodeFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "ean-13", "EAN_13", "Ean 13" all compare equal
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let format = match key.as_str() {
            "ean13" | "gtin13" => Self::Ean13,
            "ean8" => Self::Ean8,
            "upca" => Self::UpcA,
            "upce" => Self::UpcE,
            "code128" => Self::Code128,
            "code39" => Self::Code39,
            "code93" => Self::Code93,
            "codabar" => Self::Codabar,
            "itf" | "i25" | "interleaved2of5" => Self::Itf,
            "qr" | "qrcode" => Self::QrCode,
            "datamatrix" => Self::DataMatrix,
            "aztec" => Self::Aztec,
            "pdf417" => Self::Pdf417,
            _ => return Err(UnknownFormat(s.trim().to_owned())),
        };
        Ok(format)
    }
}

/// Ordered, duplicate-free set of symbologies.
///
/// Order is the caller's priority order and is preserved when subsets are taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSet(Vec<BarcodeFormat>);

impl FormatSet {
    /// A set holding exactly one format.
    #[must_use]
    pub fn single(format: BarcodeFormat) -> Self {
        Self(vec![format])
    }

    /// Formats in priority order.
    pub fn iter(&self) -> impl Iterator<Item = BarcodeFormat> + '_ {
        self.0.iter().copied()
    }

    /// Whether `format` is allowed.
    #[must_use]
    pub fn contains(&self, format: BarcodeFormat) -> bool {
        self.0.contains(&format)
    }

    /// Number of formats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The matrix (2D) formats of this set, in the same order.
    #[must_use]
    pub fn two_dimensional(&self) -> Self {
        self.iter().filter(|f| f.is_two_dimensional()).collect()
    }
}

impl Default for FormatSet {
    /// Retail defaults: product codes plus the common 2D symbologies.
    fn default() -> Self {
        [
            BarcodeFormat::Ean13,
            BarcodeFormat::Ean8,
            BarcodeFormat::UpcA,
            BarcodeFormat::UpcE,
            BarcodeFormat::Code128,
            BarcodeFormat::Code39,
            BarcodeFormat::QrCode,
            BarcodeFormat::DataMatrix,
        ]
        .into_iter()
        .collect()
    }
}

impl FromIterator<BarcodeFormat> for FormatSet {
    fn from_iter<T: IntoIterator<Item = BarcodeFormat>>(iter: T) -> Self {
        let mut formats = Vec::new();
        for format in iter {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Self(formats)
    }
}

impl fmt::Display for FormatSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, format) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{format}")?;
        }
        Ok(())
    }
}
