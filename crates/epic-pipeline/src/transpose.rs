//! Transpose stage.
//!
//! Reorders `(time, chan, stand, pol)` gulps into `(time, chan, pol,
//! stand)` so the imager reads all stands of one polarization
//! contiguously. Byte count is unchanged; no arithmetic.

use tracing::info;

use epic_core::SequenceHeader;
use epic_ring::Ring;

use crate::error::Result;
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{Stage, StageContext};

/// The transpose stage.
pub struct TransposeStage {
    iring: Ring,
    oring: Ring,
    ntime_gulp: usize,
    core: Option<usize>,
}

impl TransposeStage {
    /// Creates the stage.
    pub fn new(iring: Ring, oring: Ring, ntime_gulp: usize, core: Option<usize>) -> Self {
        Self {
            iring,
            oring,
            ntime_gulp,
            core,
        }
    }
}

impl Stage for TransposeStage {
    fn name(&self) -> &'static str {
        "TransposeStage"
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
        let mut stream = self.iring.read(true);
        while let Some(mut iseq) = stream.next() {
            if ctx.shutting_down() {
                break;
            }
            let ihdr = SequenceHeader::from_json(iseq.header())?;
            StatusLog::new(self.name(), "sequence0").update([("time_tag", ihdr.time_tag)]);
            info!(stage = self.name(), time_tag = ihdr.time_tag, "new sequence");

            let (nchan, nstand, npol) = (ihdr.nchan, ihdr.nstand, ihdr.npol);
            let igulp = self.ntime_gulp * nchan * nstand * npol; // ci4
            self.oring.resize(igulp, 5)?;

            let mut ohdr = ihdr.clone();
            ohdr.axes = "time,chan,pol,stand".into();
            let ohdr_json = ohdr.to_json()?;

            let mut oseq = writer.begin_sequence(ihdr.time_tag, &ohdr_json)?;
            let mut perf = PerfLog::new(self.name());

            while let Some(ispan) = iseq.next_span() {
                if ispan.size() < igulp {
                    continue; // Ignore final gulp
                }
                perf.acquired();
                let mut ospan = oseq.reserve(igulp)?;
                perf.reserved();
                let idata = ispan.data();
                let odata = ospan.data();
                for tc in 0..self.ntime_gulp * nchan {
                    let base = tc * nstand * npol;
                    for s in 0..nstand {
                        for p in 0..npol {
                            odata[base + p * nstand + s] = idata[base + s * npol + p];
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
