//! Raw voltage-stream files.
//!
//! Layout:
//!
//! ```text
//! dimensions: antpol, time, reim(2), scalar(1)
//! variables:  voltages (antpol, time, reim)  f32
//!             freq1 (scalar)                 f64   center frequency, Hz
//!             sample_rate (scalar)           f64   Hz
//!             time_tag0 (scalar)             i64   first-sample tick
//! ```
//!
//! `antpol` interleaves polarizations within a stand: row `2s + p` holds
//! stand `s`, polarization `p`.

use std::path::Path;

use ndarray::{Array2, ArrayView2, ArrayView3};

use epic_core::Complex32;

use crate::error::{IoError, Result};

fn scalar_f64(file: &netcdf::File, name: &str) -> Result<f64> {
    let var = file
        .variable(name)
        .ok_or_else(|| IoError::MissingVariable(name.into()))?;
    let values = var.get_values::<f64, _>(..)?;
    values
        .first()
        .copied()
        .ok_or_else(|| IoError::shape(format!("variable '{name}' is empty")))
}

fn scalar_i64(file: &netcdf::File, name: &str) -> Result<i64> {
    let var = file
        .variable(name)
        .ok_or_else(|| IoError::MissingVariable(name.into()))?;
    let values = var.get_values::<i64, _>(..)?;
    values
        .first()
        .copied()
        .ok_or_else(|| IoError::shape(format!("variable '{name}' is empty")))
}

/// Sequential reader over a voltage-stream file.
pub struct VoltageReader {
    file: netcdf::File,
    cfreq: f64,
    sample_rate: f64,
    time_tag0: i64,
    nantpol: usize,
    nsamples: usize,
    offset: usize,
}

impl VoltageReader {
    /// Opens a voltage-stream file and reads its metadata.
    pub fn open(path: &Path) -> Result<Self> {
        let file = netcdf::open(path)?;
        let cfreq = scalar_f64(&file, "freq1")?;
        let sample_rate = scalar_f64(&file, "sample_rate")?;
        let time_tag0 = scalar_i64(&file, "time_tag0")?;
        let (nantpol, nsamples) = {
            let var = file
                .variable("voltages")
                .ok_or_else(|| IoError::MissingVariable("voltages".into()))?;
            let dims = var.dimensions();
            if dims.len() != 3 || dims[2].len() != 2 {
                return Err(IoError::shape(format!(
                    "voltages has {} dims, want (antpol, time, reim)",
                    dims.len()
                )));
            }
            (dims[0].len(), dims[1].len())
        };
        Ok(Self {
            file,
            cfreq,
            sample_rate,
            time_tag0,
            nantpol,
            nsamples,
            offset: 0,
        })
    }

    /// Center frequency, Hz.
    #[inline]
    pub fn cfreq(&self) -> f64 {
        self.cfreq
    }

    /// Sample rate, Hz.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Tick of the first sample.
    #[inline]
    pub fn time_tag0(&self) -> i64 {
        self.time_tag0
    }

    /// Antenna-polarization row count.
    #[inline]
    pub fn nantpol(&self) -> usize {
        self.nantpol
    }

    /// Samples per row remaining from the current offset.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.nsamples - self.offset
    }

    /// Reads the next `nsamples` time samples as `(antpol, time)`; returns
    /// `None` once fewer than `nsamples` remain.
    pub fn read_samples(&mut self, nsamples: usize) -> Result<Option<Array2<Complex32>>> {
        if self.remaining() < nsamples || nsamples == 0 {
            return Ok(None);
        }
        let start = self.offset;
        let var = self
            .file
            .variable("voltages")
            .ok_or_else(|| IoError::MissingVariable("voltages".into()))?;
        let flat = var.get_values::<f32, _>((.., start..start + nsamples, ..))?;
        if flat.len() != self.nantpol * nsamples * 2 {
            return Err(IoError::shape(format!(
                "hyperslab returned {} floats, want {}",
                flat.len(),
                self.nantpol * nsamples * 2
            )));
        }
        let mut out = Array2::<Complex32>::default((self.nantpol, nsamples));
        for ap in 0..self.nantpol {
            for t in 0..nsamples {
                let base = (ap * nsamples + t) * 2;
                out[[ap, t]] = Complex32::new(flat[base], flat[base + 1]);
            }
        }
        self.offset += nsamples;
        Ok(Some(out))
    }

    /// Reads `duration` seconds of samples at the stream's sample rate.
    pub fn read_duration(&mut self, duration: f64) -> Result<Option<Array2<Complex32>>> {
        self.read_samples((duration * self.sample_rate).round() as usize)
    }

    /// Rewinds to the start of the stream.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Writes a voltage-stream file (test fixtures and captures alike).
pub fn write_voltage_file(
    path: &Path,
    cfreq: f64,
    sample_rate: f64,
    time_tag0: i64,
    data: ArrayView2<Complex32>,
) -> Result<()> {
    let (nantpol, nsamples) = data.dim();
    let mut file = netcdf::create(path)?;
    file.add_dimension("antpol", nantpol)?;
    file.add_dimension("time", nsamples)?;
    file.add_dimension("reim", 2)?;
    file.add_dimension("scalar", 1)?;

    let mut freq = file.add_variable::<f64>("freq1", &["scalar"])?;
    freq.put_attribute("units", "Hz")?;
    freq.put_values(&[cfreq], ..)?;

    let mut srate = file.add_variable::<f64>("sample_rate", &["scalar"])?;
    srate.put_attribute("units", "Hz")?;
    srate.put_values(&[sample_rate], ..)?;

    let mut tag = file.add_variable::<i64>("time_tag0", &["scalar"])?;
    tag.put_attribute("long_name", "Tick of the first sample")?;
    tag.put_values(&[time_tag0], ..)?;

    let mut interleaved = vec![0.0f32; nantpol * nsamples * 2];
    for ap in 0..nantpol {
        for t in 0..nsamples {
            let v = data[[ap, t]];
            let base = (ap * nsamples + t) * 2;
            interleaved[base] = v.re;
            interleaved[base + 1] = v.im;
        }
    }
    let view = ArrayView3::from_shape((nantpol, nsamples, 2), &interleaved)
        .map_err(|e| IoError::shape(e.to_string()))?;
    let mut voltages = file.add_variable::<f32>("voltages", &["antpol", "time", "reim"])?;
    voltages.put_attribute("long_name", "Raw antenna voltages")?;
    voltages.put_attribute("units", "Volts")?;
    voltages.put(.., view)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn round_trip_and_sequential_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.nc");
        let (nantpol, nsamples) = (4, 100);
        let data = Array2::from_shape_fn((nantpol, nsamples), |(ap, t)| {
            Complex32::new(ap as f32 + t as f32 / 100.0, -(t as f32))
        });
        write_voltage_file(&path, 46.2e6, 100e3, 7_840_000, data.view()).unwrap();

        let mut reader = VoltageReader::open(&path).unwrap();
        assert_relative_eq!(reader.cfreq(), 46.2e6);
        assert_relative_eq!(reader.sample_rate(), 100e3);
        assert_eq!(reader.time_tag0(), 7_840_000);
        assert_eq!(reader.nantpol(), nantpol);

        let first = reader.read_samples(60).unwrap().unwrap();
        assert_eq!(first.dim(), (nantpol, 60));
        assert_eq!(first[[2, 10]], data[[2, 10]]);

        let second = reader.read_samples(40).unwrap().unwrap();
        assert_eq!(second[[1, 0]], data[[1, 60]]);

        // Exhausted: a further read yields None, reset rewinds.
        assert!(reader.read_samples(1).unwrap().is_none());
        reader.reset();
        let again = reader.read_samples(10).unwrap().unwrap();
        assert_eq!(again[[0, 0]], data[[0, 0]]);
    }

    #[test]
    fn short_tail_is_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.nc");
        let data = Array2::from_elem((2, 30), Complex32::new(1.0, 0.0));
        write_voltage_file(&path, 40e6, 100e3, 0, data.view()).unwrap();
        let mut reader = VoltageReader::open(&path).unwrap();
        assert!(reader.read_samples(25).unwrap().is_some());
        assert!(reader.read_samples(25).unwrap().is_none());
    }
}
