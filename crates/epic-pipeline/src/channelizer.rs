//! Channelize stage (file path).
//!
//! Converts raw `(time, stand, pol)` cf64 gulps into channelized
//! `(time, chan, stand, pol)` ci4 gulps: a length-`nchan` FFT within each
//! time block, an fftshift along the channel axis, and quantization with
//! scale `1/sqrt(nchan)`. Bypassed entirely when the capture already
//! delivers channels (the live path).

use tracing::{info, warn};

use epic_core::{Complex32, SequenceHeader};
use epic_dsp::Channelizer;
use epic_ring::Ring;

use crate::error::{PipelineError, Result};
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{load_cf64, Stage, StageContext};

/// The channelize stage.
pub struct ChannelizeStage {
    iring: Ring,
    oring: Ring,
    ntime_gulp: usize,
    nchan_out: usize,
    core: Option<usize>,
}

impl ChannelizeStage {
    /// Creates the stage. `ntime_gulp` must be a multiple of `nchan_out`.
    pub fn new(
        iring: Ring,
        oring: Ring,
        ntime_gulp: usize,
        nchan_out: usize,
        core: Option<usize>,
    ) -> Result<Self> {
        if nchan_out == 0 || ntime_gulp % nchan_out != 0 {
            return Err(PipelineError::config(format!(
                "ntime_gulp {ntime_gulp} is not a multiple of nchan_out {nchan_out}"
            )));
        }
        Ok(Self {
            iring,
            oring,
            ntime_gulp,
            nchan_out,
            core,
        })
    }
}

impl Stage for ChannelizeStage {
    fn name(&self) -> &'static str {
        "ChannelizeStage"
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

        let channelizer = Channelizer::new(self.nchan_out);
        let mut writer = self.oring.begin_writing()?;

        let mut stream = self.iring.read(true);
        while let Some(mut iseq) = stream.next() {
            if ctx.shutting_down() {
                break;
            }
            let ihdr = SequenceHeader::from_json(iseq.header())?;
            StatusLog::new(self.name(), "sequence0").update([("time_tag", ihdr.time_tag)]);
            info!(stage = self.name(), time_tag = ihdr.time_tag, "new sequence");
            if ihdr.axes != "time,stand,pol" {
                warn!(stage = self.name(), axes = %ihdr.axes, "unexpected axes; sequence skipped");
                continue;
            }

            let nstand = ihdr.nstand;
            let npol = ihdr.npol;
            let igulp = ihdr.gulp_bytes(self.ntime_gulp)?;
            // Each input gulp channelizes into ntime_gulp/nchan time
            // samples; nchan of them stack into one output gulp so the
            // imager sees ntime_gulp channelized samples per span.
            let block = self.ntime_gulp * nstand * npol; // ci4 bytes per input gulp
            let ogulp = block * self.nchan_out;
            self.oring.resize(ogulp, 5)?;

            let mut ohdr = ihdr.clone();
            ohdr.nchan = self.nchan_out;
            ohdr.nbit = 4;
            ohdr.axes = "time,chan,stand,pol".into();
            let ohdr_json = ohdr.to_json()?;

            let mut oseq = writer.begin_sequence(ihdr.time_tag, &ohdr_json)?;
            let mut perf = PerfLog::new(self.name());
            let mut samples: Vec<Complex32> = Vec::new();
            let mut staging = vec![0u8; ogulp];
            let mut blocks = 0usize;

            while let Some(ispan) = iseq.next_span() {
                if ispan.size() < igulp {
                    continue; // Ignore final gulp
                }
                perf.acquired();
                load_cf64(ispan.data(), &mut samples);
                channelizer.channelize(
                    &samples,
                    nstand,
                    npol,
                    &mut staging[blocks * block..(blocks + 1) * block],
                )?;
                blocks += 1;
                if blocks == self.nchan_out {
                    let mut ospan = oseq.reserve(ogulp)?;
                    perf.reserved();
                    ospan.data().copy_from_slice(&staging);
                    drop(ospan);
                    blocks = 0;
                }
                perf.processed();
                if ctx.shutting_down() {
                    break;
                }
            }
            // A partially staged output gulp is dropped with the sequence.
        }
        drop(writer);
        info!(stage = self.name(), "done");
        Ok(())
    }
}
