//! Sequence headers.
//!
//! Every ring sequence carries a JSON header that is immutable for the life
//! of the sequence. The JSON form is the interoperability surface (it ends
//! up verbatim in output archives); stages keep the parsed record alongside
//! the raw bytes so headers are decoded once per sequence, not per gulp.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::format::SampleFormat;

/// The per-sequence metadata record.
///
/// Capture stages populate the observation fields; the imager extends its
/// output header with the grid and provenance fields, which stay `None`
/// everywhere upstream.
///
/// # Example
///
/// ```rust
/// use epic_core::SequenceHeader;
///
/// let json = br#"{
///     "time_tag": 7840000, "seq0": 0, "chan0": 1840, "nchan": 4,
///     "cfreq": 46.2e6, "bw": 100e3, "nstand": 256, "npol": 2,
///     "nbit": 4, "complex": true, "axes": "time,chan,stand,pol"
/// }"#;
/// let hdr = SequenceHeader::from_json(json).unwrap();
/// assert_eq!(hdr.axis_names(), ["time", "chan", "stand", "pol"]);
/// // ci4 packs one complex sample per byte.
/// assert_eq!(hdr.gulp_bytes(2500).unwrap(), 2500 * 4 * 256 * 2);
/// assert!(hdr.check_span(2500 * 4 * 256 * 2, 2500).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceHeader {
    /// Sample ticks since the epoch at the ADC rate (`FS`).
    pub time_tag: i64,
    /// First sequence index of this sequence.
    pub seq0: i64,
    /// First channel index.
    pub chan0: i64,
    /// Number of channels.
    pub nchan: usize,
    /// Center frequency, Hz.
    pub cfreq: f64,
    /// Bandwidth, Hz.
    pub bw: f64,
    /// Number of stands (antenna mounts).
    pub nstand: usize,
    /// Polarizations per stand (1 or 2).
    pub npol: usize,
    /// Bits per sample component.
    pub nbit: u32,
    /// Whether samples carry an imaginary component.
    pub complex: bool,
    /// Ordered axis names, e.g. `"time,chan,pol,stand"`.
    pub axes: String,

    /// Image grid width (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size_x: Option<usize>,
    /// Image grid height (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size_y: Option<usize>,
    /// UV sample spacing along x (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_length_x: Option<f64>,
    /// UV sample spacing along y (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_length_y: Option<f64>,
    /// Integration window in milliseconds (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulation_time: Option<u64>,
    /// ADC sample rate, Hz (imager output only).
    #[serde(rename = "FS", skip_serializing_if = "Option::is_none")]
    pub fs: Option<f64>,
    /// Telescope latitude, degrees (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Telescope longitude, degrees (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Telescope name (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telescope: Option<String>,
    /// Calibration state of the emitted data (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_units: Option<String>,
    /// Polarization product labels (imager output only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pols: Option<Vec<String>>,
}

impl SequenceHeader {
    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses the JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The element encoding declared by `nbit`/`complex`.
    pub fn sample_format(&self) -> Result<SampleFormat> {
        SampleFormat::from_header(self.nbit, self.complex).ok_or_else(|| {
            CoreError::config(format!(
                "no sample format for nbit={} complex={}",
                self.nbit, self.complex
            ))
        })
    }

    /// Bytes in a gulp of `ntime` time samples of this sequence.
    pub fn gulp_bytes(&self, ntime: usize) -> Result<usize> {
        let fmt = self.sample_format()?;
        Ok(ntime * self.nchan * self.nstand * self.npol * fmt.bytes_per_element())
    }

    /// Checks a span size against the declared shape.
    pub fn check_span(&self, span_bytes: usize, ntime: usize) -> Result<()> {
        let expected = self.gulp_bytes(ntime)?;
        if span_bytes != expected {
            return Err(CoreError::ShapeMismatch {
                expected,
                got: span_bytes,
            });
        }
        Ok(())
    }

    /// Axis names in order.
    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.split(',').collect()
    }
}
