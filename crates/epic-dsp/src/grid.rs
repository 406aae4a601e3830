//! The convolutional UV gridder.
//!
//! Deposits phased antenna voltages onto per-batch grid planes through a
//! small convolution kernel. One batch plane exists per `(time, chan, pol)`
//! triple; collisions within a plane sum.

use rayon::prelude::*;

use epic_core::Complex32;

use crate::error::{DspError, Result};
use crate::locations::Locations;

/// Gridding geometry.
#[derive(Debug, Clone, Copy)]
pub struct GridParams {
    /// Grid side length in pixels.
    pub grid_size: usize,
    /// Convolution kernel side length in pixels.
    pub ant_extent: usize,
}

impl GridParams {
    /// The default all-ones kernel for this extent (a flat top-hat; a
    /// single tap when `ant_extent == 1`).
    pub fn default_kernel(&self) -> Vec<Complex32> {
        vec![Complex32::new(1.0, 0.0); self.ant_extent * self.ant_extent]
    }
}

/// Grids one gulp of phased voltages.
///
/// - `udata` is `(ntime, nchan, npol, nstand)` row-major;
/// - `locs` holds `(ntime, npol, nchan, nstand)` coordinates;
/// - `kernel` is `nplanes * ant_extent * ant_extent` taps, the plane
///   selected per sample by `lz`;
/// - `grid` is `(ntime*nchan*npol, grid_size, grid_size)` and is zeroed
///   here before deposition.
#[allow(clippy::too_many_arguments)]
pub fn grid_batch(
    udata: &[Complex32],
    ntime: usize,
    nchan: usize,
    npol: usize,
    nstand: usize,
    locs: &Locations,
    kernel: &[Complex32],
    params: GridParams,
    grid: &mut [Complex32],
) -> Result<()> {
    let gs = params.grid_size;
    let extent = params.ant_extent;
    let nbatch = ntime * nchan * npol;
    if udata.len() != nbatch * nstand {
        return Err(DspError::shape(format!(
            "gridder input of {} samples is not ({ntime}, {nchan}, {npol}, {nstand})",
            udata.len()
        )));
    }
    if grid.len() != nbatch * gs * gs {
        return Err(DspError::shape(format!(
            "grid of {} cells is not ({nbatch}, {gs}, {gs})",
            grid.len()
        )));
    }
    if extent == 0 || kernel.len() % (extent * extent) != 0 || kernel.is_empty() {
        return Err(DspError::BadKernel {
            len: kernel.len(),
            extent,
        });
    }
    let nplanes = kernel.len() / (extent * extent);
    let half = (extent / 2) as i32;

    grid.par_chunks_mut(gs * gs)
        .enumerate()
        .for_each(|(b, plane)| {
            plane.fill(Complex32::default());
            let t = b / (nchan * npol);
            let c = (b / npol) % nchan;
            let p = b % npol;
            for s in 0..nstand {
                let u = udata[b * nstand + s];
                let x = locs.lx[[t, p, c, s]];
                let y = locs.ly[[t, p, c, s]];
                let z = locs.lz[[t, p, c, s]];
                let plane_k = (z.rem_euclid(nplanes as i32)) as usize;
                for ky in 0..extent {
                    let gy = y + ky as i32 - half;
                    if gy < 0 || gy >= gs as i32 {
                        continue;
                    }
                    for kx in 0..extent {
                        let gx = x + kx as i32 - half;
                        if gx < 0 || gx >= gs as i32 {
                            continue;
                        }
                        let tap = kernel[(plane_k * extent + ky) * extent + kx];
                        plane[gy as usize * gs + gx as usize] += u * tap;
                    }
                }
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::Locations;
    use ndarray::Array4;

    fn locs_at(cells: &[(i32, i32)], ntime: usize, nchan: usize, npol: usize) -> Locations {
        let nstand = cells.len();
        let shape = (ntime, npol, nchan, nstand);
        let mut lx = Array4::zeros(shape);
        let mut ly = Array4::zeros(shape);
        for t in 0..ntime {
            for p in 0..npol {
                for c in 0..nchan {
                    for (s, &(x, y)) in cells.iter().enumerate() {
                        lx[[t, p, c, s]] = x;
                        ly[[t, p, c, s]] = y;
                    }
                }
            }
        }
        Locations {
            sampling_length: 0.0,
            sll: 0.0,
            lx,
            ly,
            lz: Array4::zeros(shape),
        }
    }

    #[test]
    fn collisions_sum() {
        let params = GridParams {
            grid_size: 8,
            ant_extent: 1,
        };
        let locs = locs_at(&[(3, 5), (3, 5), (0, 0)], 1, 1, 1);
        let udata = vec![
            Complex32::new(1.0, 2.0),
            Complex32::new(0.5, -1.0),
            Complex32::new(4.0, 0.0),
        ];
        let mut grid = vec![Complex32::default(); 64];
        grid_batch(
            &udata,
            1,
            1,
            1,
            3,
            &locs,
            &params.default_kernel(),
            params,
            &mut grid,
        )
        .unwrap();
        assert_eq!(grid[5 * 8 + 3], Complex32::new(1.5, 1.0));
        assert_eq!(grid[0], Complex32::new(4.0, 0.0));
        let total: Complex32 = grid.iter().sum();
        assert_eq!(total, Complex32::new(5.5, 1.0));
    }

    #[test]
    fn wide_kernel_spreads_deposit() {
        let params = GridParams {
            grid_size: 8,
            ant_extent: 3,
        };
        let locs = locs_at(&[(4, 4)], 1, 1, 1);
        let udata = vec![Complex32::new(1.0, 0.0)];
        let mut grid = vec![Complex32::default(); 64];
        grid_batch(
            &udata,
            1,
            1,
            1,
            1,
            &locs,
            &params.default_kernel(),
            params,
            &mut grid,
        )
        .unwrap();
        let hits = grid.iter().filter(|v| v.norm() > 0.0).count();
        assert_eq!(hits, 9);
        assert_eq!(grid[4 * 8 + 4], Complex32::new(1.0, 0.0));
        assert_eq!(grid[3 * 8 + 3], Complex32::new(1.0, 0.0));
    }

    #[test]
    fn batch_planes_are_independent() {
        let params = GridParams {
            grid_size: 4,
            ant_extent: 1,
        };
        let (ntime, nchan, npol) = (2, 1, 2);
        let locs = locs_at(&[(1, 1)], ntime, nchan, npol);
        // 4 batch planes, one stand each.
        let udata: Vec<Complex32> = (0..4).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut grid = vec![Complex32::default(); 4 * 16];
        grid_batch(
            &udata,
            ntime,
            nchan,
            npol,
            1,
            &locs,
            &params.default_kernel(),
            params,
            &mut grid,
        )
        .unwrap();
        for b in 0..4 {
            assert_eq!(grid[b * 16 + 5], Complex32::new(b as f32, 0.0));
        }
    }
}
