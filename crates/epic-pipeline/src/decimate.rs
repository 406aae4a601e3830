//! Decimate stage (live path).
//!
//! Selects a contiguous channel/polarization prefix out of live capture
//! gulps: `out = in[:, :nchan_out, :, :npol_out]`. Reads lossy so a slow
//! downstream never stalls the capture.

use tracing::info;

use epic_core::SequenceHeader;
use epic_ring::Ring;

use crate::error::{PipelineError, Result};
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{Stage, StageContext};

/// The decimate stage.
pub struct DecimateStage {
    iring: Ring,
    oring: Ring,
    ntime_gulp: usize,
    nchan_out: usize,
    npol_out: usize,
    guarantee: bool,
    core: Option<usize>,
}

impl DecimateStage {
    /// Creates the stage.
    pub fn new(
        iring: Ring,
        oring: Ring,
        ntime_gulp: usize,
        nchan_out: usize,
        npol_out: usize,
        guarantee: bool,
        core: Option<usize>,
    ) -> Self {
        Self {
            iring,
            oring,
            ntime_gulp,
            nchan_out,
            npol_out,
            guarantee,
            core,
        }
    }
}

impl Stage for DecimateStage {
    fn name(&self) -> &'static str {
        "DecimateStage"
    }

    fn core(&self) -> Option<usize> {
        self.core
    }

    fn input_ring(&self) -> Option<&Ring> {
        Some(&self.iring)
    }

    fn output_ring(&self) -> Option<&Ring> {
        Some(&self.oring)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        StatusLog::new(self.name(), "bind").update([(
            "core0",
            self.core.map(|c| c as i64).unwrap_or(-1),
        )]);
        StatusLog::new(self.name(), "in").update([
            ("nring", "1".to_string()),
            ("ring0", self.iring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "out").update([
            ("nring", "1".to_string()),
            ("ring0", self.oring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "size").update([("nseq_per_gulp", self.ntime_gulp)]);

        let mut writer = self.oring.begin_writing()?;
        let mut stream = self.iring.read(self.guarantee);
        while let Some(mut iseq) = stream.next() {
            if ctx.shutting_down() {
                break;
            }
            let ihdr = SequenceHeader::from_json(iseq.header())?;
            StatusLog::new(self.name(), "sequence0").update([("time_tag", ihdr.time_tag)]);
            info!(stage = self.name(), time_tag = ihdr.time_tag, "new sequence");

            let (nchan, nstand, npol) = (ihdr.nchan, ihdr.nstand, ihdr.npol);
            if self.nchan_out > nchan || self.npol_out > npol {
                return Err(PipelineError::config(format!(
                    "cannot select {}x{} out of {nchan}x{npol}",
                    self.nchan_out, self.npol_out
                )));
            }
            let igulp = self.ntime_gulp * nchan * nstand * npol; // ci4
            let ogulp = self.ntime_gulp * self.nchan_out * nstand * self.npol_out;
            self.oring.resize(ogulp, 5)?;

            let mut ohdr = ihdr.clone();
            ohdr.nchan = self.nchan_out;
            ohdr.npol = self.npol_out;
            ohdr.cfreq =
                (ihdr.chan0 as f64 + 0.5 * (self.nchan_out as f64 - 1.0)) * ctx.config.chan_bw;
            ohdr.bw = self.nchan_out as f64 * ctx.config.chan_bw;
            let ohdr_json = ohdr.to_json()?;

            let mut oseq = writer.begin_sequence(ihdr.time_tag, &ohdr_json)?;
            let mut perf = PerfLog::new(self.name());

            while let Some(ispan) = iseq.next_span() {
                if ispan.size() < igulp {
                    continue; // Ignore final gulp
                }
                perf.acquired();
                let mut ospan = oseq.reserve(ogulp)?;
                perf.reserved();
                let idata = ispan.data();
                let odata = ospan.data();
                for t in 0..self.ntime_gulp {
                    for c in 0..self.nchan_out {
                        for s in 0..nstand {
                            let src = ((t * nchan + c) * nstand + s) * npol;
                            let dst = ((t * self.nchan_out + c) * nstand + s) * self.npol_out;
                            odata[dst..dst + self.npol_out]
                                .copy_from_slice(&idata[src..src + self.npol_out]);
                        }
                    }
                }
                drop(ospan);
                perf.processed();
                if ctx.shutting_down() {
                    break;
                }
            }
        }
        drop(writer);
        info!(stage = self.name(), "done");
        Ok(())
    }
}
