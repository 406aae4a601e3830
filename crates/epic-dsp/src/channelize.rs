//! Time-domain to frequency-domain conversion.
//!
//! The offline path delivers raw voltages; this module turns a gulp of
//! `(ntime, nstand, npol)` complex samples into `(ntime/nchan, nchan,
//! nstand, npol)` channelized `ci4` samples: a length-`nchan` FFT along
//! time within each block, an fftshift along the channel axis, then
//! quantization with scale `1/sqrt(nchan)`.

use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use epic_core::Complex32;

use crate::error::{DspError, Result};
use crate::pack::quantize_ci4;

/// Reusable channelizer for a fixed channel count.
pub struct Channelizer {
    nchan: usize,
    fft: Arc<dyn Fft<f32>>,
    scale: f32,
}

impl Channelizer {
    /// Plans a channelizer producing `nchan` channels.
    pub fn new(nchan: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(nchan);
        Self {
            nchan,
            fft,
            scale: 1.0 / (nchan as f32).sqrt(),
        }
    }

    /// Output channel count.
    #[inline]
    pub fn nchan(&self) -> usize {
        self.nchan
    }

    /// Channelizes one gulp.
    ///
    /// `input` is `(ntime, nstand, npol)` row-major; `out` receives
    /// `(ntime/nchan, nchan, nstand, npol)` ci4 bytes. `ntime` must be a
    /// multiple of `nchan` (capture stages drop short trailing gulps).
    pub fn channelize(
        &self,
        input: &[Complex32],
        nstand: usize,
        npol: usize,
        out: &mut [u8],
    ) -> Result<()> {
        let stride = nstand * npol;
        if stride == 0 || input.len() % (stride * self.nchan) != 0 {
            return Err(DspError::shape(format!(
                "channelizer input of {} samples is not (k*{}, {}, {})",
                input.len(),
                self.nchan,
                nstand,
                npol
            )));
        }
        if out.len() != input.len() {
            return Err(DspError::shape(format!(
                "channelizer output holds {} bytes, need {}",
                out.len(),
                input.len()
            )));
        }

        let block = self.nchan * stride;
        input
            .par_chunks(block)
            .zip(out.par_chunks_mut(block))
            .for_each_init(
                || vec![Complex32::default(); self.nchan],
                |work, (iblk, oblk)| {
                    for sp in 0..stride {
                        // Gather the time series for one (stand, pol) lane.
                        for (k, w) in work.iter_mut().enumerate() {
                            *w = iblk[k * stride + sp];
                        }
                        self.fft.process(work);
                        // Zero frequency to the center channel.
                        work.rotate_right(self.nchan / 2);
                        for (c, w) in work.iter().enumerate() {
                            oblk[c * stride + sp] = quantize_ci4(*w, self.scale);
                        }
                    }
                },
            );
        Ok(())
    }
}
