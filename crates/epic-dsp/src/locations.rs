//! Antenna-location-to-grid-coordinate precomputation.
//!
//! Gridding happens in units of UV cells, which scale with wavelength: the
//! same stand lands on a different cell in every channel. This module turns
//! ENU stand positions into per-channel integer grid coordinates, shifted
//! to be non-negative and centered on the grid.

use ndarray::Array4;

use epic_core::config::SPEED_OF_LIGHT;

use crate::error::{DspError, Result};

/// Precomputed grid coordinates for one sequence configuration.
#[derive(Debug, Clone)]
pub struct Locations {
    /// UV sample spacing in wavelengths (`delta`).
    pub sampling_length: f64,
    /// Reference UV-cell size: `sample_grid[0] / lambda[0]`.
    pub sll: f64,
    /// Grid x cell per `(time, pol, chan, stand)`.
    pub lx: Array4<i32>,
    /// Grid y cell per `(time, pol, chan, stand)`.
    pub ly: Array4<i32>,
    /// Grid z projection per `(time, pol, chan, stand)`; selects the
    /// kernel plane and is inert for single-plane kernels.
    pub lz: Array4<i32>,
}

impl Locations {
    /// All-center coordinates used when gridding autocorrelations: every
    /// sample deposits at `(grid_size/2, grid_size/2)` with `lz = 0`.
    pub fn centered(ntime: usize, npol: usize, nchan: usize, nstand: usize, grid_size: usize) -> Self {
        let shape = (ntime, npol, nchan, nstand);
        let c = (grid_size / 2) as i32;
        Locations {
            sampling_length: 0.0,
            sll: 0.0,
            lx: Array4::from_elem(shape, c),
            ly: Array4::from_elem(shape, c),
            lz: Array4::zeros(shape),
        }
    }
}

/// Computes grid coordinates for `positions` (one ENU row per stand,
/// masked stands already zeroed) at the given channel frequencies.
///
/// `grid_resolution` is in degrees per pixel. Coordinates are tiled over
/// `ntime` and `npol`. Fails with [`DspError::GridTooSmall`] when the
/// array does not fit on the grid at some channel; no clamping is applied.
pub fn generate_locations(
    positions: &[[f64; 3]],
    freqs: &[f64],
    ntime: usize,
    nchan: usize,
    npol: usize,
    grid_size: usize,
    grid_resolution: f64,
) -> Result<Locations> {
    let nstand = positions.len();
    if nstand == 0 || nchan != freqs.len() {
        return Err(DspError::shape(format!(
            "{} stands, {} freqs for nchan={}",
            nstand,
            freqs.len(),
            nchan
        )));
    }

    let delta =
        1.0 / (2.0 * grid_size as f64 * (std::f64::consts::PI * grid_resolution / 360.0).sin());
    let wavelengths: Vec<f64> = freqs.iter().map(|&f| SPEED_OF_LIGHT / f).collect();
    let sample_grid: Vec<f64> = wavelengths.iter().map(|&w| w * delta).collect();
    let sll = sample_grid[0] / wavelengths[0];

    let mut lx = Array4::<i32>::zeros((ntime, npol, nchan, nstand));
    let mut ly = Array4::<i32>::zeros((ntime, npol, nchan, nstand));
    let mut lz = Array4::<i32>::zeros((ntime, npol, nchan, nstand));

    let mut scaled = vec![0.0f64; nstand];
    for (dim, out) in [(0, &mut lx), (1, &mut ly), (2, &mut lz)] {
        for c in 0..nchan {
            for (s, p) in positions.iter().enumerate() {
                scaled[s] = p[dim] / sample_grid[c];
            }
            let min = scaled.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let extent = max - min;
            if extent >= grid_size as f64 {
                return Err(DspError::GridTooSmall {
                    grid_size,
                    extent,
                    chan: c,
                });
            }
            let offset = -min + (grid_size as f64 - (max - min)) / 2.0;
            for s in 0..nstand {
                let cell = (scaled[s] + offset) as i32;
                for t in 0..ntime {
                    for p in 0..npol {
                        out[[t, p, c, s]] = cell;
                    }
                }
            }
        }
    }

    Ok(Locations {
        sampling_length: delta,
        sll,
        lx,
        ly,
        lz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_positions(side: usize, spacing: f64) -> Vec<[f64; 3]> {
        let half = (side as f64 - 1.0) / 2.0;
        (0..side * side)
            .map(|s| {
                [
                    ((s % side) as f64 - half) * spacing,
                    ((s / side) as f64 - half) * spacing,
                    0.0,
                ]
            })
            .collect()
    }

    #[test]
    fn delta_formula() {
        let locs = generate_locations(
            &square_positions(2, 5.0),
            &[46.2e6],
            1,
            1,
            1,
            64,
            20.0 / 60.0,
        )
        .unwrap();
        let expect = 1.0
            / (2.0 * 64.0 * (std::f64::consts::PI * (20.0 / 60.0) / 360.0).sin());
        assert_relative_eq!(locs.sampling_length, expect, max_relative = 1e-12);
        assert_relative_eq!(locs.sll, expect, max_relative = 1e-12);
    }

    #[test]
    fn coordinates_stay_on_grid_and_center() {
        let grid_size = 64;
        let positions = square_positions(8, 5.0);
        let freqs: Vec<f64> = (0..4).map(|c| 38.0e6 + c as f64 * 25.0e3).collect();
        let locs =
            generate_locations(&positions, &freqs, 3, 4, 2, grid_size, 20.0 / 60.0).unwrap();
        for &v in locs.lx.iter().chain(locs.ly.iter()) {
            assert!(v >= 0 && (v as usize) < grid_size);
        }
        // The array occupies a centered window.
        let xs: Vec<i32> = locs
            .lx
            .slice(ndarray::s![0, 0, 0, ..])
            .iter()
            .cloned()
            .collect();
        let (min, max) = (
            *xs.iter().min().unwrap() as f64,
            *xs.iter().max().unwrap() as f64,
        );
        let mid = (min + max) / 2.0;
        assert!((mid - grid_size as f64 / 2.0).abs() <= 1.5, "mid {mid}");
    }

    #[test]
    fn replicas_identical_across_time_and_pol() {
        let locs = generate_locations(
            &square_positions(3, 4.0),
            &[40e6, 41e6],
            2,
            2,
            2,
            32,
            20.0 / 60.0,
        )
        .unwrap();
        assert_eq!(locs.lx[[0, 0, 1, 4]], locs.lx[[1, 1, 1, 4]]);
        assert_eq!(locs.ly[[0, 1, 0, 2]], locs.ly[[1, 0, 0, 2]]);
    }

    #[test]
    fn oversize_array_is_rejected() {
        let positions = square_positions(2, 4000.0);
        let err = generate_locations(&positions, &[46.2e6], 1, 1, 1, 16, 20.0 / 60.0);
        assert!(matches!(err, Err(DspError::GridTooSmall { .. })));
    }

    #[test]
    fn centered_locations_pin_to_middle() {
        let locs = Locations::centered(2, 4, 3, 5, 64);
        assert!(locs.lx.iter().all(|&v| v == 32));
        assert!(locs.ly.iter().all(|&v| v == 32));
        assert!(locs.lz.iter().all(|&v| v == 0));
    }
}
