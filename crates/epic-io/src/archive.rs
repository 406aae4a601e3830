//! Image-cube archives.
//!
//! One archive per integration group:
//!
//! ```text
//! dimensions: integration, chan, pol, gridy, gridx, reim(2), hdr_len
//! variables:  image (integration, chan, pol, gridy, gridx, reim)  f32
//!             image_nums (integration)                            i64
//!             hdr (hdr_len)                                       u8
//! ```
//!
//! `hdr` is the sequence-header JSON verbatim. Files are written under a
//! temporary name and renamed into place, so readers never observe a
//! partial archive.

use std::path::{Path, PathBuf};

use ndarray::{ArrayViewD, IxDyn};
use tracing::debug;

use epic_core::Complex32;

use crate::error::{IoError, Result};

/// A decoded archive, as read back from disk.
pub struct ArchiveCube {
    /// Image samples, `(integration, chan, pol, gridy, gridx)`.
    pub image: Vec<Complex32>,
    /// Shape of [`ArchiveCube::image`].
    pub shape: [usize; 5],
    /// The sequence-header JSON.
    pub hdr: Vec<u8>,
    /// Global integration indices.
    pub image_nums: Vec<i64>,
}

/// The archive file name for an integration group.
pub fn archive_name(unix_time: f64, cfreq_hz: f64) -> String {
    format!("EPIC_{:.3}_{:.3}MHz.nc", unix_time, cfreq_hz / 1e6)
}

/// Writes one integration group.
///
/// `image` is `(nints, nchan, npol, grid_size, grid_size)` row-major; the
/// caller has already applied the final fftshift and y-flip. Returns the
/// final path.
#[allow(clippy::too_many_arguments)]
pub fn write_image_archive(
    out_dir: &Path,
    unix_time: f64,
    cfreq_hz: f64,
    hdr_json: &[u8],
    image: &[Complex32],
    image_nums: &[i64],
    nchan: usize,
    npol: usize,
    grid_size: usize,
) -> Result<PathBuf> {
    let nints = image_nums.len();
    let plane = grid_size * grid_size;
    if image.len() != nints * nchan * npol * plane {
        return Err(IoError::shape(format!(
            "image of {} cells is not ({nints}, {nchan}, {npol}, {grid_size}, {grid_size})",
            image.len()
        )));
    }

    let final_path = out_dir.join(archive_name(unix_time, cfreq_hz));
    let tmp_path = final_path.with_extension("nc.tmp");

    {
        let mut file = netcdf::create(&tmp_path)?;
        file.add_dimension("integration", nints)?;
        file.add_dimension("chan", nchan)?;
        file.add_dimension("pol", npol)?;
        file.add_dimension("gridy", grid_size)?;
        file.add_dimension("gridx", grid_size)?;
        file.add_dimension("reim", 2)?;
        file.add_dimension("hdr_len", hdr_json.len())?;

        let mut interleaved = vec![0.0f32; image.len() * 2];
        for (i, v) in image.iter().enumerate() {
            interleaved[2 * i] = v.re;
            interleaved[2 * i + 1] = v.im;
        }
        let view = ArrayViewD::from_shape(
            IxDyn(&[nints, nchan, npol, grid_size, grid_size, 2]),
            &interleaved,
        )
        .map_err(|e| IoError::shape(e.to_string()))?;
        let mut image_var = file.add_variable::<f32>(
            "image",
            &["integration", "chan", "pol", "gridy", "gridx", "reim"],
        )?;
        image_var.put_attribute("long_name", "Integrated sky images")?;
        image_var.put_attribute("units", "UNCALIB")?;
        image_var.put(.., view)?;

        let mut nums = file.add_variable::<i64>("image_nums", &["integration"])?;
        nums.put_attribute("long_name", "Global integration indices")?;
        nums.put_values(image_nums, ..)?;

        let mut hdr = file.add_variable::<u8>("hdr", &["hdr_len"])?;
        hdr.put_attribute("long_name", "Sequence header JSON")?;
        hdr.put_values(hdr_json, ..)?;
    }

    std::fs::rename(&tmp_path, &final_path)?;
    debug!(path = %final_path.display(), nints, "archive written");
    Ok(final_path)
}

/// Reads an archive back (tests and offline tooling).
pub fn read_image_archive(path: &Path) -> Result<ArchiveCube> {
    let file = netcdf::open(path)?;
    let image_var = file
        .variable("image")
        .ok_or_else(|| IoError::MissingVariable("image".into()))?;
    let dims = image_var.dimensions();
    if dims.len() != 6 || dims[5].len() != 2 {
        return Err(IoError::shape(format!(
            "image has {} dims, want (integration, chan, pol, gridy, gridx, reim)",
            dims.len()
        )));
    }
    let shape = [
        dims[0].len(),
        dims[1].len(),
        dims[2].len(),
        dims[3].len(),
        dims[4].len(),
    ];
    let flat = image_var.get_values::<f32, _>(..)?;
    let image: Vec<Complex32> = flat
        .chunks_exact(2)
        .map(|c| Complex32::new(c[0], c[1]))
        .collect();

    let hdr = file
        .variable("hdr")
        .ok_or_else(|| IoError::MissingVariable("hdr".into()))?
        .get_values::<u8, _>(..)?;
    let image_nums = file
        .variable("image_nums")
        .ok_or_else(|| IoError::MissingVariable("image_nums".into()))?
        .get_values::<i64, _>(..)?;

    Ok(ArchiveCube {
        image,
        shape,
        hdr,
        image_nums,
    })
}
