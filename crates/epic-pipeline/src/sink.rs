//! The sink stage.
//!
//! Buffers integrations until a file's worth has arrived, converts UV
//! orientation to image orientation (fftshift plus a y-flip), and writes
//! one archive per group. A batch is either fully written or discarded;
//! write failures are logged and do not stop the pipeline.

use tracing::{error, info, warn};

use epic_core::{Complex32, SequenceHeader};
use epic_dsp::fft2::fft_shift_2d;
use epic_io::write_image_archive;
use epic_ring::Ring;

use crate::error::Result;
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{load_cf64, Stage, StageContext};

/// The archive-writing sink.
pub struct SinkStage {
    iring: Ring,
    ints_per_file: usize,
    out_dir: std::path::PathBuf,
    core: Option<usize>,
    gpu: Option<usize>,
}

impl SinkStage {
    /// Creates the stage.
    pub fn new(
        iring: Ring,
        ints_per_file: usize,
        out_dir: std::path::PathBuf,
        core: Option<usize>,
        gpu: Option<usize>,
    ) -> Self {
        Self {
            iring,
            ints_per_file,
            out_dir,
            core,
            gpu,
        }
    }

    /// Final shifts: fftshift over the last two axes, then reverse the y
    /// axis of every `(gy, gx)` plane.
    fn orient(image: &mut [Complex32], grid_size: usize) -> Result<()> {
        fft_shift_2d(image, grid_size)?;
        for plane in image.chunks_mut(grid_size * grid_size) {
            for y in 0..grid_size / 2 {
                let (top, bottom) = plane.split_at_mut((grid_size - 1 - y) * grid_size);
                top[y * grid_size..y * grid_size + grid_size]
                    .swap_with_slice(&mut bottom[..grid_size]);
            }
        }
        Ok(())
    }
}

impl Stage for SinkStage {
    fn name(&self) -> &'static str {
        "SinkStage"
    }

    fn core(&self) -> Option<usize> {
        self.core
    }

    fn device(&self) -> Option<usize> {
        self.gpu
    }

    fn input_ring(&self) -> Option<&Ring> {
        Some(&self.iring)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        StatusLog::new(self.name(), "bind").update([
            ("core0", self.core.map(|c| c as i64).unwrap_or(-1)),
            ("gpu0", self.gpu.map(|g| g as i64).unwrap_or(-1)),
        ]);
        StatusLog::new(self.name(), "in").update([
            ("nring", "1".to_string()),
            ("ring0", self.iring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "size").update([("nseq_per_gulp", 1usize)]);

        let mut fileid: usize = 0;
        let mut stream = self.iring.read(true);
        while let Some(mut iseq) = stream.next() {
            if ctx.shutting_down() {
                break;
            }
            let ihdr = SequenceHeader::from_json(iseq.header())?;
            StatusLog::new(self.name(), "sequence0").update([("time_tag", ihdr.time_tag)]);
            info!(stage = self.name(), time_tag = ihdr.time_tag, "new sequence");

            let nchan = ihdr.nchan;
            let npol = ihdr.npol; // already squared by the imager
            let Some(grid_size) = ihdr.grid_size_x else {
                warn!(stage = self.name(), "sequence carries no grid; skipped");
                continue;
            };
            let accumulation_time = ihdr.accumulation_time.unwrap_or(0);
            let fs = ihdr.fs.unwrap_or(ctx.config.fs);
            let plane = grid_size * grid_size;
            let igulp = nchan * npol * plane * 8;

            let mut perf = PerfLog::new(self.name());
            let mut batch: Vec<Complex32> = Vec::with_capacity(self.ints_per_file * nchan * npol * plane);
            let mut nints = 0usize;
            let mut gulp: Vec<Complex32> = Vec::new();

            while let Some(ispan) = iseq.next_span() {
                if ispan.size() < igulp {
                    continue; // Ignore final gulp
                }
                perf.acquired();
                load_cf64(ispan.data(), &mut gulp);
                drop(ispan);
                batch.extend_from_slice(&gulp);
                nints += 1;

                if nints >= self.ints_per_file {
                    Self::orient(&mut batch, grid_size)?;
                    let unix_time = ihdr.time_tag as f64 / fs
                        + accumulation_time as f64 * 1e-3 * (fileid * self.ints_per_file) as f64;
                    let image_nums: Vec<i64> = (fileid * self.ints_per_file
                        ..(fileid + 1) * self.ints_per_file)
                        .map(|n| n as i64)
                        .collect();
                    match write_image_archive(
                        &self.out_dir,
                        unix_time,
                        ihdr.cfreq,
                        iseq.header(),
                        &batch,
                        &image_nums,
                        nchan,
                        npol,
                        grid_size,
                    ) {
                        Ok(path) => {
                            info!(stage = self.name(), path = %path.display(), "image saved")
                        }
                        Err(e) => {
                            error!(stage = self.name(), "archive write failed, batch dropped: {e}")
                        }
                    }
                    batch.clear();
                    nints = 0;
                    fileid += 1;
                }
                perf.processed();
                if ctx.shutting_down() {
                    break;
                }
            }
            // A partial batch is never written.
            if nints > 0 {
                warn!(
                    stage = self.name(),
                    nints, "sequence ended mid-batch; integrations discarded"
                );
            }
        }
        info!(stage = self.name(), "done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orient_flips_rows_after_shift() {
        let gs = 4;
        // Mark UV origin (0,0); after fftshift it sits at (2,2); the y-flip
        // moves it to (1,2).
        let mut image = vec![Complex32::default(); gs * gs];
        image[0] = Complex32::new(1.0, 0.0);
        SinkStage::orient(&mut image, gs).unwrap();
        let hot: Vec<usize> = image
            .iter()
            .enumerate()
            .filter(|(_, v)| v.norm() > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hot, vec![gs + 2]);
    }
}
