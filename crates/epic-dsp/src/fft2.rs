//! Batched 2-D FFTs over square grid planes.
//!
//! The imager runs an inverse 2-D transform per `(time, chan, pol)` plane
//! after gridding. Transforms are unnormalized in both directions.

use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{Fft, FftDirection, FftPlanner};

use epic_core::Complex32;

use crate::error::{DspError, Result};

/// Planned square 2-D FFT of a fixed side length.
pub struct Fft2 {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
}

impl Fft2 {
    /// Plans an inverse 2-D FFT over `size x size` planes.
    pub fn inverse(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            fft: planner.plan_fft(size, FftDirection::Inverse),
        }
    }

    /// Plane side length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Transforms every `size x size` plane in `data` in place.
    pub fn execute_batch(&self, data: &mut [Complex32]) -> Result<()> {
        let n = self.size;
        let plane = n * n;
        if plane == 0 || data.len() % plane != 0 {
            return Err(DspError::shape(format!(
                "batch of {} samples is not a multiple of {n}x{n} planes",
                data.len()
            )));
        }
        data.par_chunks_mut(plane).for_each_init(
            || vec![Complex32::default(); plane],
            |scratch, p| {
                // Rows: rustfft transforms each length-n chunk.
                self.fft.process(p);
                // Columns via transpose, transform, transpose back.
                for y in 0..n {
                    for x in 0..n {
                        scratch[x * n + y] = p[y * n + x];
                    }
                }
                self.fft.process(scratch);
                for y in 0..n {
                    for x in 0..n {
                        p[y * n + x] = scratch[x * n + y];
                    }
                }
            },
        );
        Ok(())
    }
}

/// 2-D fftshift of every `size x size` plane in `data`, in place.
///
/// Swaps diagonally opposite quadrants; `size` must be even.
pub fn fft_shift_2d(data: &mut [Complex32], size: usize) -> Result<()> {
    let plane = size * size;
    if plane == 0 || size % 2 != 0 || data.len() % plane != 0 {
        return Err(DspError::shape(format!(
            "fftshift of {} samples over even {size}x{size} planes",
            data.len()
        )));
    }
    let half = size / 2;
    for p in data.chunks_mut(plane) {
        for y in 0..half {
            for x in 0..size {
                let x2 = (x + half) % size;
                p.swap(y * size + x, (y + half) * size + x2);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn impulse_transforms_to_flat_plane() {
        let n = 8;
        let fft = Fft2::inverse(n);
        let mut data = vec![Complex32::default(); n * n];
        data[0] = Complex32::new(1.0, 0.0);
        fft.execute_batch(&mut data).unwrap();
        for v in &data {
            assert_relative_eq!(v.re, 1.0, max_relative = 1e-5);
            assert_relative_eq!(v.im, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn batch_planes_transform_independently() {
        let n = 4;
        let fft = Fft2::inverse(n);
        let mut data = vec![Complex32::default(); 2 * n * n];
        data[0] = Complex32::new(2.0, 0.0); // plane 0: impulse
        fft.execute_batch(&mut data).unwrap();
        for v in &data[..n * n] {
            assert_relative_eq!(v.re, 2.0, max_relative = 1e-5);
        }
        for v in &data[n * n..] {
            assert_relative_eq!(v.norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn unnormalized_round_trip_scales_by_area() {
        let n = 4;
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft(n, FftDirection::Forward);
        let inv = Fft2::inverse(n);
        let mut data: Vec<Complex32> = (0..n * n)
            .map(|i| Complex32::new(i as f32, -(i as f32) / 3.0))
            .collect();
        let orig = data.clone();
        // Forward 2-D via the same row/col scheme.
        fwd.process(&mut data);
        let mut t = vec![Complex32::default(); n * n];
        for y in 0..n {
            for x in 0..n {
                t[x * n + y] = data[y * n + x];
            }
        }
        fwd.process(&mut t);
        for y in 0..n {
            for x in 0..n {
                data[y * n + x] = t[x * n + y];
            }
        }
        inv.execute_batch(&mut data).unwrap();
        for (a, b) in data.iter().zip(orig.iter()) {
            assert_relative_eq!(
                a.re,
                b.re * (n * n) as f32,
                max_relative = 1e-4,
                epsilon = 1e-3
            );
        }
    }

    #[test]
    fn shift_moves_origin_to_center() {
        let n = 4;
        let mut data = vec![Complex32::default(); n * n];
        data[0] = Complex32::new(1.0, 0.0);
        fft_shift_2d(&mut data, n).unwrap();
        assert_eq!(data[(n / 2) * n + n / 2], Complex32::new(1.0, 0.0));
        assert_eq!(data[0], Complex32::default());
        // Shifting twice is the identity for even sizes.
        fft_shift_2d(&mut data, n).unwrap();
        assert_eq!(data[0], Complex32::new(1.0, 0.0));
    }
}
