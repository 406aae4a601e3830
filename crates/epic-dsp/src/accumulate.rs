//! Cross-polarization and autocorrelation accumulators.
//!
//! After the inverse FFT the grid holds instantaneous E-field images per
//! `(time, chan, pol)`. Integration forms polarization products
//! (`xx`, `xy`, `yx`, `yy` for two feeds) and sums them over the dwell
//! time. The optional autocorrelation path accumulates per-antenna
//! self-products so their constant pedestal can be imaged separately and
//! subtracted.

use rayon::prelude::*;

use epic_core::Complex32;

use crate::error::{DspError, Result};

/// `crosspol[t,c,q,y,x] += img[t,c,q/npol,y,x] * conj(img[t,c,q%npol,y,x])`
/// for every product `q` in `0..npol^2`.
pub fn accumulate_crosspol(
    img: &[Complex32],
    crosspol: &mut [Complex32],
    ntime: usize,
    nchan: usize,
    npol: usize,
    grid_size: usize,
) -> Result<()> {
    let plane = grid_size * grid_size;
    let npol2 = npol * npol;
    if img.len() != ntime * nchan * npol * plane {
        return Err(DspError::shape(format!(
            "image batch of {} cells is not ({ntime}, {nchan}, {npol}, {grid_size}, {grid_size})",
            img.len()
        )));
    }
    if crosspol.len() != ntime * nchan * npol2 * plane {
        return Err(DspError::shape(format!(
            "crosspol of {} cells does not hold {npol2} products",
            crosspol.len()
        )));
    }

    crosspol
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(b, out)| {
            let q = b % npol2;
            let tc = b / npol2;
            let a = &img[(tc * npol + q / npol) * plane..][..plane];
            let bb = &img[(tc * npol + q % npol) * plane..][..plane];
            for i in 0..plane {
                out[i] += a[i] * bb[i].conj();
            }
        });
    Ok(())
}

/// Sums `src` over its leading `ntime` axis into `dst` (which holds one
/// time slice). `dst` is accumulated into, not overwritten.
pub fn reduce_time(src: &[Complex32], dst: &mut [Complex32], ntime: usize) -> Result<()> {
    if ntime == 0 || src.len() != dst.len() * ntime {
        return Err(DspError::shape(format!(
            "cannot reduce {} samples over {ntime} frames into {}",
            src.len(),
            dst.len()
        )));
    }
    for frame in src.chunks(dst.len()) {
        for (d, s) in dst.iter_mut().zip(frame.iter()) {
            *d += *s;
        }
    }
    Ok(())
}

/// `autocorrs[t,c,q,s] += u[t,c,q/npol,s] * conj(u[t,c,q%npol,s])` over
/// the unpacked, phased voltages.
pub fn accumulate_autocorrs(
    udata: &[Complex32],
    autocorrs: &mut [Complex32],
    ntime: usize,
    nchan: usize,
    npol: usize,
    nstand: usize,
) -> Result<()> {
    let npol2 = npol * npol;
    if udata.len() != ntime * nchan * npol * nstand
        || autocorrs.len() != ntime * nchan * npol2 * nstand
    {
        return Err(DspError::shape(format!(
            "autocorr shapes: u={} acc={} for ({ntime}, {nchan}, {npol}, {nstand})",
            udata.len(),
            autocorrs.len()
        )));
    }
    autocorrs
        .par_chunks_mut(nstand)
        .enumerate()
        .for_each(|(b, out)| {
            let q = b % npol2;
            let tc = b / npol2;
            let a = &udata[(tc * npol + q / npol) * nstand..][..nstand];
            let bb = &udata[(tc * npol + q % npol) * nstand..][..nstand];
            for s in 0..nstand {
                out[s] += a[s] * bb[s].conj();
            }
        });
    Ok(())
}

/// `image[i] -= bias[i]`, used to remove the gridded autocorrelation term.
pub fn subtract(image: &mut [Complex32], bias: &[Complex32]) -> Result<()> {
    if image.len() != bias.len() {
        return Err(DspError::shape(format!(
            "subtract: {} vs {} cells",
            image.len(),
            bias.len()
        )));
    }
    for (a, b) in image.iter_mut().zip(bias.iter()) {
        *a -= *b;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn crosspol_products_are_conjugate_pairs() {
        let (ntime, nchan, npol, gs) = (1, 1, 2, 2);
        let plane = gs * gs;
        // pol 0 image all (1+i), pol 1 image all (2-i)
        let mut img = vec![Complex32::new(1.0, 1.0); plane];
        img.extend(vec![Complex32::new(2.0, -1.0); plane]);
        let mut cp = vec![Complex32::default(); npol * npol * plane];
        accumulate_crosspol(&img, &mut cp, ntime, nchan, npol, gs).unwrap();

        let xx = cp[0];
        let xy = cp[plane];
        let yx = cp[2 * plane];
        let yy = cp[3 * plane];
        assert_eq!(xx, Complex32::new(2.0, 0.0));
        assert_eq!(yy, Complex32::new(5.0, 0.0));
        assert_eq!(xy, Complex32::new(1.0, 1.0) * Complex32::new(2.0, 1.0));
        assert_relative_eq!(yx.re, xy.re);
        assert_relative_eq!(yx.im, -xy.im);
    }

    #[test]
    fn crosspol_accumulates_over_calls() {
        let mut img = vec![Complex32::new(1.0, 0.0); 4];
        let mut cp = vec![Complex32::default(); 4];
        accumulate_crosspol(&img, &mut cp, 1, 1, 1, 2).unwrap();
        img.fill(Complex32::new(0.0, 2.0));
        accumulate_crosspol(&img, &mut cp, 1, 1, 1, 2).unwrap();
        assert!(cp.iter().all(|&v| v == Complex32::new(5.0, 0.0)));
    }

    #[test]
    fn reduce_time_sums_frames() {
        let src: Vec<Complex32> = (0..6).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let mut dst = vec![Complex32::default(); 2];
        reduce_time(&src, &mut dst, 3).unwrap();
        assert_eq!(dst[0], Complex32::new(0.0 + 2.0 + 4.0, 0.0));
        assert_eq!(dst[1], Complex32::new(1.0 + 3.0 + 5.0, 0.0));
    }

    #[test]
    fn autocorrs_are_power_on_diagonal() {
        let (ntime, nchan, npol, nstand) = (1, 1, 2, 2);
        let udata = vec![
            Complex32::new(3.0, 4.0), // pol0 stand0
            Complex32::new(1.0, 0.0), // pol0 stand1
            Complex32::new(0.0, 2.0), // pol1 stand0
            Complex32::new(1.0, 1.0), // pol1 stand1
        ];
        let mut acc = vec![Complex32::default(); npol * npol * nstand];
        accumulate_autocorrs(&udata, &mut acc, ntime, nchan, npol, nstand).unwrap();
        // xx of stand0 = |3+4i|^2 = 25
        assert_eq!(acc[0], Complex32::new(25.0, 0.0));
        // yy of stand1 = |1+i|^2 = 2
        assert_eq!(acc[3 * nstand + 1], Complex32::new(2.0, 0.0));
        // xy of stand0 = (3+4i)*conj(2i) = (3+4i)*(-2i) = 8-6i
        assert_eq!(acc[nstand], Complex32::new(8.0, -6.0));
    }

    #[test]
    fn subtract_removes_bias() {
        let mut image = vec![Complex32::new(5.0, 1.0); 3];
        let bias = vec![Complex32::new(5.0, 1.0); 3];
        subtract(&mut image, &bias).unwrap();
        assert!(image.iter().all(|v| v.norm() == 0.0));
    }
}
