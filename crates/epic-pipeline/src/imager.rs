//! The grid-and-image stage.
//!
//! Per gulp: unpack ci4 voltages, apply the zenith phase table, deposit
//! onto per-(time, chan, pol) UV planes, inverse-2-D-FFT every plane,
//! accumulate cross-polarization products, and, once the dwell time is
//! reached, emit one integrated image cube. Optionally the per-antenna
//! autocorrelations are accumulated alongside, imaged through the same
//! gridder at the central pixel, and subtracted from the integration.

use std::collections::VecDeque;
use std::sync::Arc;

use ndarray::Array3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use epic_core::{Complex32, SequenceHeader, Station};
use epic_dsp::accumulate::{accumulate_autocorrs, accumulate_crosspol, reduce_time, subtract};
use epic_dsp::fft2::fft_shift_2d;
use epic_dsp::pack::unpack_ci4_slice;
use epic_dsp::{generate_locations, grid_batch, zenith_phases, Fft2, GridParams, Locations};
use epic_ring::Ring;

use crate::error::{PipelineError, Result};
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{store_cf64, Stage, StageContext};

/// Polarization product labels for a squared-pol count.
fn pols_for(npol2: usize) -> Result<Vec<String>> {
    let labels: &[&str] = match npol2 {
        1 => &["xx"],
        2 => &["xx", "yy"],
        4 => &["xx", "xy", "yx", "yy"],
        _ => {
            return Err(PipelineError::config(format!(
                "no polarization product labels for npol^2 = {npol2}"
            )))
        }
    };
    Ok(labels.iter().map(|s| s.to_string()).collect())
}

/// Integration cycle of the accumulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumState {
    /// Summing gulps into `crosspol` (and the autocorrs).
    Accumulating,
    /// Dwell reached: reducing and writing the integration out.
    Emitting,
    /// Zeroing every accumulator before the next window.
    Resetting,
}

struct AutocorrBuffers {
    acc: Vec<Complex32>,
    av: Vec<Complex32>,
    grid: Vec<Complex32>,
    locs: Locations,
    kernel: Vec<Complex32>,
}

/// Per-sequence compute buffers, allocated on the first gulp and resized
/// in place on shape changes.
struct Accumulators {
    ntime: usize,
    nchan: usize,
    npol: usize,
    nstand: usize,
    grid_size: usize,
    udata: Vec<Complex32>,
    grid: Vec<Complex32>,
    crosspol: Vec<Complex32>,
    accumulated: Vec<Complex32>,
    autocorr: Option<AutocorrBuffers>,
    fft: Fft2,
    state: AccumState,
}

impl Accumulators {
    fn new(
        ntime: usize,
        nchan: usize,
        npol: usize,
        nstand: usize,
        grid_size: usize,
        ant_extent: usize,
        remove_autocorrs: bool,
    ) -> Self {
        let npol2 = npol * npol;
        let plane = grid_size * grid_size;
        let autocorr = remove_autocorrs.then(|| AutocorrBuffers {
            acc: vec![Complex32::default(); ntime * nchan * npol2 * nstand],
            av: vec![Complex32::default(); nchan * npol2 * nstand],
            grid: vec![Complex32::default(); nchan * npol2 * plane],
            locs: Locations::centered(1, npol2, nchan, nstand, grid_size),
            kernel: vec![Complex32::new(1.0, 0.0); ant_extent * ant_extent],
        });
        Self {
            ntime,
            nchan,
            npol,
            nstand,
            grid_size,
            udata: vec![Complex32::default(); ntime * nchan * npol * nstand],
            grid: vec![Complex32::default(); ntime * nchan * npol * plane],
            crosspol: vec![Complex32::default(); ntime * nchan * npol2 * plane],
            accumulated: vec![Complex32::default(); nchan * npol2 * plane],
            autocorr,
            fft: Fft2::inverse(grid_size),
            state: AccumState::Accumulating,
        }
    }

    /// Resizes in place for a new sequence shape; buffers are zeroed.
    #[allow(clippy::too_many_arguments)]
    fn ensure(
        acc: &mut Option<Accumulators>,
        ntime: usize,
        nchan: usize,
        npol: usize,
        nstand: usize,
        grid_size: usize,
        ant_extent: usize,
        remove_autocorrs: bool,
    ) {
        match acc {
            Some(a)
                if (a.ntime, a.nchan, a.npol, a.nstand, a.grid_size)
                    == (ntime, nchan, npol, nstand, grid_size)
                    && a.autocorr.is_some() == remove_autocorrs =>
            {
                a.zero();
            }
            Some(a) => {
                let npol2 = npol * npol;
                let plane = grid_size * grid_size;
                a.udata
                    .resize(ntime * nchan * npol * nstand, Complex32::default());
                a.grid
                    .resize(ntime * nchan * npol * plane, Complex32::default());
                a.crosspol
                    .resize(ntime * nchan * npol2 * plane, Complex32::default());
                a.accumulated
                    .resize(nchan * npol2 * plane, Complex32::default());
                if remove_autocorrs {
                    let ac = a.autocorr.get_or_insert_with(|| AutocorrBuffers {
                        acc: Vec::new(),
                        av: Vec::new(),
                        grid: Vec::new(),
                        locs: Locations::centered(1, npol2, nchan, nstand, grid_size),
                        kernel: vec![Complex32::new(1.0, 0.0); ant_extent * ant_extent],
                    });
                    ac.acc
                        .resize(ntime * nchan * npol2 * nstand, Complex32::default());
                    ac.av.resize(nchan * npol2 * nstand, Complex32::default());
                    ac.grid.resize(nchan * npol2 * plane, Complex32::default());
                    ac.locs = Locations::centered(1, npol2, nchan, nstand, grid_size);
                } else {
                    a.autocorr = None;
                }
                if a.grid_size != grid_size {
                    a.fft = Fft2::inverse(grid_size);
                }
                a.ntime = ntime;
                a.nchan = nchan;
                a.npol = npol;
                a.nstand = nstand;
                a.grid_size = grid_size;
                a.state = AccumState::Accumulating;
                a.zero();
            }
            None => {
                *acc = Some(Accumulators::new(
                    ntime,
                    nchan,
                    npol,
                    nstand,
                    grid_size,
                    ant_extent,
                    remove_autocorrs,
                ));
            }
        }
    }

    /// Zeroes every integration accumulator.
    fn zero(&mut self) {
        self.crosspol.fill(Complex32::default());
        self.accumulated.fill(Complex32::default());
        if let Some(ac) = &mut self.autocorr {
            ac.acc.fill(Complex32::default());
            ac.av.fill(Complex32::default());
            ac.grid.fill(Complex32::default());
        }
    }
}

/// The grid-and-image stage.
pub struct ImagerStage {
    iring: Ring,
    oring: Ring,
    station: Arc<Station>,
    grid_size: usize,
    grid_resolution: f64,
    ntime_gulp: usize,
    accumulation_time_ms: u64,
    remove_autocorrs: bool,
    benchmark: bool,
    ant_extent: usize,
    core: Option<usize>,
    gpu: Option<usize>,
}

impl ImagerStage {
    /// Creates the stage.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iring: Ring,
        oring: Ring,
        station: Arc<Station>,
        grid_size: usize,
        grid_resolution: f64,
        ntime_gulp: usize,
        accumulation_time_ms: u64,
        remove_autocorrs: bool,
        benchmark: bool,
        core: Option<usize>,
        gpu: Option<usize>,
    ) -> Self {
        Self {
            iring,
            oring,
            station,
            grid_size,
            grid_resolution,
            ntime_gulp,
            accumulation_time_ms,
            remove_autocorrs,
            benchmark,
            ant_extent: 1,
            core,
            gpu,
        }
    }

    /// Multiplies the unpacked voltages by the per-(chan, pol, stand)
    /// phase table, in place.
    fn apply_phases(udata: &mut [Complex32], phases: &Array3<Complex32>) {
        let (nchan, npol, nstand) = phases.dim();
        let frame = nchan * npol * nstand;
        udata.par_chunks_mut(frame).for_each(|time_frame| {
            let mut i = 0;
            for c in 0..nchan {
                for p in 0..npol {
                    for s in 0..nstand {
                        time_frame[i] *= phases[[c, p, s]];
                        i += 1;
                    }
                }
            }
        });
    }
}

impl Stage for ImagerStage {
    fn name(&self) -> &'static str {
        "ImagerStage"
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

    fn output_ring(&self) -> Option<&Ring> {
        Some(&self.oring)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        if self.grid_size == 0 || self.grid_size % 2 != 0 {
            return Err(PipelineError::config(format!(
                "grid size {} must be even for the final shifts",
                self.grid_size
            )));
        }
        StatusLog::new(self.name(), "bind").update([
            ("core0", self.core.map(|c| c as i64).unwrap_or(-1)),
            ("gpu0", self.gpu.map(|g| g as i64).unwrap_or(-1)),
        ]);
        StatusLog::new(self.name(), "in").update([
            ("nring", "1".to_string()),
            ("ring0", self.iring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "out").update([
            ("nring", "1".to_string()),
            ("ring0", self.oring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "size").update([("nseq_per_gulp", self.ntime_gulp)]);

        let params = GridParams {
            grid_size: self.grid_size,
            ant_extent: self.ant_extent,
        };
        let antgridmap = params.default_kernel();
        let gulp_ms = 1e3 * self.ntime_gulp as f64 / ctx.config.chan_bw;
        let mut runtime_history: VecDeque<f64> = VecDeque::with_capacity(50);

        let mut writer = self.oring.begin_writing()?;
        let mut acc: Option<Accumulators> = None;
        let mut loc_cache: Option<((i64, usize, usize), Locations)> = None;

        let mut stream = self.iring.read(true);
        'sequences: while let Some(mut iseq) = stream.next() {
            if ctx.shutting_down() {
                break;
            }
            let ihdr = SequenceHeader::from_json(iseq.header())?;
            StatusLog::new(self.name(), "sequence0").update([("time_tag", ihdr.time_tag)]);
            info!(stage = self.name(), time_tag = ihdr.time_tag, "new sequence");
            if ihdr.axes != "time,chan,pol,stand" || ihdr.nbit != 4 {
                warn!(
                    stage = self.name(),
                    axes = %ihdr.axes,
                    nbit = ihdr.nbit,
                    "sequence is not transposed ci4; skipped"
                );
                continue;
            }
            let (chan0, nchan, nstand, npol) = (ihdr.chan0, ihdr.nchan, ihdr.nstand, ihdr.npol);
            if nstand != self.station.nstand() {
                warn!(
                    stage = self.name(),
                    nstand,
                    station = self.station.nstand(),
                    "stand count disagrees with station metadata; sequence skipped"
                );
                continue;
            }
            let npol2 = npol * npol;
            let igulp = self.ntime_gulp * nchan * npol * nstand; // ci4
            let freqs: Vec<f64> = (0..nchan)
                .map(|c| (chan0 + c as i64) as f64 * ctx.config.chan_bw)
                .collect();

            // Locations survive across sequences with the same geometry.
            let key = (chan0, nchan, nstand);
            if loc_cache.as_ref().map(|(k, _)| *k) != Some(key) {
                let locs = generate_locations(
                    &self.station.stand_positions(),
                    &freqs,
                    self.ntime_gulp,
                    nchan,
                    npol,
                    self.grid_size,
                    self.grid_resolution,
                )?;
                loc_cache = Some((key, locs));
            }
            let locs = match &loc_cache {
                Some((_, l)) => l.clone(),
                None => unreachable!("location cache populated above"),
            };

            let phases = zenith_phases(&self.station, &freqs, npol);

            let mut ohdr = ihdr.clone();
            ohdr.npol = npol2; // cross multiplication products
            ohdr.nbit = 32;
            ohdr.complex = true;
            ohdr.axes = "time,chan,pol,gridy,gridx".into();
            ohdr.grid_size_x = Some(self.grid_size);
            ohdr.grid_size_y = Some(self.grid_size);
            ohdr.sampling_length_x = Some(locs.sampling_length);
            ohdr.sampling_length_y = Some(locs.sampling_length);
            ohdr.accumulation_time = Some(self.accumulation_time_ms);
            ohdr.fs = Some(ctx.config.fs);
            ohdr.latitude = Some(self.station.latitude_deg);
            ohdr.longitude = Some(self.station.longitude_deg);
            ohdr.telescope = Some(self.station.name.clone());
            ohdr.data_units = Some("UNCALIB".into());
            ohdr.pols = Some(pols_for(npol2)?);
            let ohdr_json = ohdr.to_json()?;

            let plane = self.grid_size * self.grid_size;
            let ogulp = nchan * npol2 * plane * 8;
            self.oring.resize(ogulp, 5)?;

            Accumulators::ensure(
                &mut acc,
                self.ntime_gulp,
                nchan,
                npol,
                nstand,
                self.grid_size,
                self.ant_extent,
                self.remove_autocorrs,
            );
            let state = match &mut acc {
                Some(a) => a,
                None => return Err(PipelineError::Device("accumulator allocation".into())),
            };

            let mut oseq = writer.begin_sequence(ihdr.time_tag, &ohdr_json)?;
            let mut perf = PerfLog::new(self.name());
            let mut accum_ms = 0.0f64;

            while let Some(ispan) = iseq.next_span() {
                if ispan.size() < igulp {
                    continue; // Ignore final gulp
                }
                perf.acquired();
                let gulp_start = std::time::Instant::now();

                debug_assert_eq!(state.state, AccumState::Accumulating);
                unpack_ci4_slice(ispan.data(), &mut state.udata);
                Self::apply_phases(&mut state.udata, &phases);
                grid_batch(
                    &state.udata,
                    self.ntime_gulp,
                    nchan,
                    npol,
                    nstand,
                    &locs,
                    &antgridmap,
                    params,
                    &mut state.grid,
                )?;
                state.fft.execute_batch(&mut state.grid)?;
                accumulate_crosspol(
                    &state.grid,
                    &mut state.crosspol,
                    self.ntime_gulp,
                    nchan,
                    npol,
                    self.grid_size,
                )?;
                if let Some(ac) = &mut state.autocorr {
                    accumulate_autocorrs(
                        &state.udata,
                        &mut ac.acc,
                        self.ntime_gulp,
                        nchan,
                        npol,
                        nstand,
                    )?;
                }
                accum_ms += gulp_ms;

                if accum_ms >= self.accumulation_time_ms as f64 {
                    state.state = AccumState::Emitting;
                    reduce_time(&state.crosspol, &mut state.accumulated, self.ntime_gulp)?;
                    if let Some(ac) = &mut state.autocorr {
                        reduce_time(&ac.acc, &mut ac.av, self.ntime_gulp)?;
                        grid_batch(
                            &ac.av,
                            1,
                            nchan,
                            npol2,
                            nstand,
                            &ac.locs,
                            &ac.kernel,
                            params,
                            &mut ac.grid,
                        )?;
                        fft_shift_2d(&mut ac.grid, self.grid_size)?;
                        state.fft.execute_batch(&mut ac.grid)?;
                        subtract(&mut state.accumulated, &ac.grid)?;
                    }
                    let mut ospan = oseq.reserve(ogulp)?;
                    perf.reserved();
                    store_cf64(&state.accumulated, ospan.data());
                    drop(ospan);

                    state.state = AccumState::Resetting;
                    state.zero();
                    accum_ms = 0.0;
                    state.state = AccumState::Accumulating;
                }

                if self.benchmark {
                    let dt = gulp_start.elapsed().as_secs_f64();
                    if runtime_history.len() == 50 {
                        runtime_history.pop_front();
                    }
                    runtime_history.push_back(dt);
                    let mean: f64 =
                        runtime_history.iter().sum::<f64>() / runtime_history.len() as f64;
                    debug!(
                        stage = self.name(),
                        gulp_time = dt,
                        mean_gulp_time = mean,
                        samples = runtime_history.len(),
                        "gridder timing"
                    );
                }
                perf.processed();
                if ctx.shutting_down() {
                    break 'sequences;
                }
            }
        }
        drop(writer);
        info!(stage = self.name(), "done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pol_labels() {
        assert_eq!(pols_for(1).unwrap(), vec!["xx"]);
        assert_eq!(pols_for(4).unwrap(), vec!["xx", "xy", "yx", "yy"]);
        assert!(pols_for(3).is_err());
    }

    #[test]
    fn accumulators_zero_after_reset() {
        let mut acc = Accumulators::new(2, 1, 2, 4, 8, 1, true);
        acc.crosspol[7] = Complex32::new(1.0, 1.0);
        acc.accumulated[3] = Complex32::new(2.0, 0.0);
        if let Some(ac) = &mut acc.autocorr {
            ac.acc[0] = Complex32::new(3.0, 0.0);
        }
        acc.zero();
        assert!(acc.crosspol.iter().all(|v| v.norm() == 0.0));
        assert!(acc.accumulated.iter().all(|v| v.norm() == 0.0));
        let ac = acc.autocorr.as_ref().unwrap();
        assert!(ac.acc.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn ensure_resizes_in_place() {
        let mut acc = Some(Accumulators::new(2, 1, 2, 4, 8, 1, false));
        Accumulators::ensure(&mut acc, 2, 2, 2, 4, 8, 1, false);
        let a = acc.as_ref().unwrap();
        assert_eq!(a.nchan, 2);
        assert_eq!(a.crosspol.len(), 2 * 2 * 4 * 64);
        assert!(a.autocorr.is_none());
    }
}
