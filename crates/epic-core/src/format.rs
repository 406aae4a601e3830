//! Sample encodings carried by ring spans.
//!
//! A span is a flat byte region; the sequence header names the element
//! encoding and the axes. The encodings in play:
//!
//! - [`SampleFormat::Cf64`] - `complex64`, two little-endian f32
//! - [`SampleFormat::Ci8`] - two signed bytes, real then imaginary
//! - [`SampleFormat::Ci4`] - one byte, real nibble high / imaginary nibble
//!   low, both two's-complement 4-bit
//! - [`SampleFormat::I8`] - one signed byte, real only

/// Element encoding of a span.
///
/// # Example
///
/// ```rust
/// use epic_core::SampleFormat;
///
/// let fmt = SampleFormat::from_header(4, true).unwrap();
/// assert_eq!(fmt, SampleFormat::Ci4);
/// assert_eq!(fmt.bytes_per_element(), 1);
/// assert!(fmt.is_complex());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Two 32-bit floats (real, imaginary).
    Cf64,
    /// Two signed 8-bit components (real, imaginary).
    Ci8,
    /// Packed signed 4-bit complex: real in the high nibble.
    Ci4,
    /// Signed 8-bit real samples.
    I8,
}

impl SampleFormat {
    /// Bits per component.
    #[inline]
    pub const fn nbit(&self) -> u32 {
        match self {
            Self::Cf64 => 32,
            Self::Ci8 | Self::I8 => 8,
            Self::Ci4 => 4,
        }
    }

    /// Whether the format carries an imaginary component.
    #[inline]
    pub const fn is_complex(&self) -> bool {
        !matches!(self, Self::I8)
    }

    /// Bytes per element (both components for complex formats).
    #[inline]
    pub const fn bytes_per_element(&self) -> usize {
        match self {
            Self::Cf64 => 8,
            Self::Ci8 => 2,
            Self::Ci4 | Self::I8 => 1,
        }
    }

    /// Resolves a format from header fields.
    pub const fn from_header(nbit: u32, complex: bool) -> Option<Self> {
        match (nbit, complex) {
            (32, true) => Some(Self::Cf64),
            (8, true) => Some(Self::Ci8),
            (4, true) => Some(Self::Ci4),
            (8, false) => Some(Self::I8),
            _ => None,
        }
    }
}
