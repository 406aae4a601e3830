//! Capture stages: the head of the pipeline.
//!
//! Two variants produce raw antenna samples into the first ring: file
//! replay of a recorded voltage stream, and live UDP capture of
//! channelized F-engine packets.

use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use epic_core::{Complex32, SequenceHeader};
use epic_io::VoltageReader;
use epic_ring::Ring;

use crate::chips::{ChipsHeader, STANDS_PER_SRC};
use crate::error::{PipelineError, Result};
use crate::proclog::{PerfLog, StatusLog};
use crate::stage::{store_cf64, Stage, StageContext};

/// Seconds of file data fetched per read; gulps are sliced out of this.
const READ_DURATION: f64 = 0.1;

/// Replays a voltage-stream file into the capture ring.
///
/// Emits one sequence of `(time, stand, pol)` cf64 gulps of `ntime_gulp`
/// samples. Each file read fetches 0.1 s while the previous read is being
/// written out, hiding I/O latency. With `replay` set the file wraps
/// around indefinitely; otherwise the stage ends at EOF, emitting the
/// final partial gulp as a short span.
pub struct OfflineCaptureStage {
    oring: Ring,
    path: PathBuf,
    ntime_gulp: usize,
    replay: bool,
    core: Option<usize>,
}

impl OfflineCaptureStage {
    /// Creates the stage.
    pub fn new(
        oring: Ring,
        path: PathBuf,
        ntime_gulp: usize,
        replay: bool,
        core: Option<usize>,
    ) -> Self {
        Self {
            oring,
            path,
            ntime_gulp,
            replay,
            core,
        }
    }

    /// Appends `(antpol, time)` data to `pending` in `(time, stand, pol)`
    /// order.
    fn stage_samples(
        data: &ndarray::Array2<Complex32>,
        nstand: usize,
        npol: usize,
        pending: &mut Vec<Complex32>,
    ) {
        let ntime = data.dim().1;
        pending.reserve(ntime * nstand * npol);
        for t in 0..ntime {
            for s in 0..nstand {
                for p in 0..npol {
                    pending.push(data[[2 * s + p, t]]);
                }
            }
        }
    }
}

impl Stage for OfflineCaptureStage {
    fn name(&self) -> &'static str {
        "OfflineCaptureStage"
    }

    fn core(&self) -> Option<usize> {
        self.core
    }

    fn output_ring(&self) -> Option<&Ring> {
        Some(&self.oring)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        StatusLog::new(self.name(), "bind").update([(
            "core0",
            self.core.map(|c| c as i64).unwrap_or(-1),
        )]);
        StatusLog::new(self.name(), "out").update([
            ("nring", "1".to_string()),
            ("ring0", self.oring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "size").update([("nseq_per_gulp", self.ntime_gulp)]);

        let mut reader = VoltageReader::open(&self.path)
            .map_err(|e| PipelineError::io_fatal(format!("open {}: {e}", self.path.display())))?;
        let cfreq = reader.cfreq();
        let srate = reader.sample_rate();
        let nstand = reader.nantpol() / 2;
        let npol = 2usize;
        if reader.nantpol() % 2 != 0 {
            return Err(PipelineError::config(format!(
                "{} antpol rows do not pair into stands",
                reader.nantpol()
            )));
        }

        let gulp_elems = self.ntime_gulp * nstand * npol;
        let ogulp = gulp_elems * 8;
        self.oring.resize(ogulp, 10)?;

        let hdr = SequenceHeader {
            time_tag: reader.time_tag0(),
            seq0: 0,
            chan0: ((cfreq - srate / 2.0) / ctx.config.chan_bw).floor() as i64,
            nchan: 1,
            cfreq,
            bw: srate,
            nstand,
            npol,
            nbit: 32,
            complex: true,
            axes: "time,stand,pol".into(),
            grid_size_x: None,
            grid_size_y: None,
            sampling_length_x: None,
            sampling_length_y: None,
            accumulation_time: None,
            fs: None,
            latitude: None,
            longitude: None,
            telescope: None,
            data_units: None,
            pols: None,
        };
        let hdr_json = hdr.to_json()?;
        StatusLog::new(self.name(), "sequence0").update([("time_tag", hdr.time_tag)]);
        info!(stage = self.name(), cfreq, srate, nstand, "capture configured");

        let mut writer = self.oring.begin_writing()?;
        let mut oseq = writer.begin_sequence(hdr.time_tag, &hdr_json)?;
        let mut perf = PerfLog::new(self.name());
        let mut pending: Vec<Complex32> = Vec::new();

        // Prime the read-ahead buffer.
        let chunk = (READ_DURATION * srate).round() as usize;
        let mut data = match reader.read_samples(chunk) {
            Ok(Some(d)) => d,
            Ok(None) => {
                return Err(PipelineError::io_fatal(format!(
                    "{} holds less than one read of {chunk} samples",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        'capture: loop {
            if ctx.shutting_down() {
                break;
            }
            // Fetch the next chunk before draining the previous one.
            let next = reader.read_samples(chunk);
            perf.acquired();

            Self::stage_samples(&data, nstand, npol, &mut pending);
            let mut consumed = 0;
            while pending.len() - consumed >= gulp_elems {
                let mut span = oseq.reserve(ogulp)?;
                perf.reserved();
                store_cf64(&pending[consumed..consumed + gulp_elems], span.data());
                drop(span);
                consumed += gulp_elems;
                perf.processed();
                if ctx.shutting_down() {
                    break 'capture;
                }
            }
            pending.copy_within(consumed.., 0);
            pending.truncate(pending.len() - consumed);

            match next {
                Ok(Some(d)) => data = d,
                Ok(None) => {
                    if self.replay {
                        reader.reset();
                        match reader.read_samples(chunk) {
                            Ok(Some(d)) => data = d,
                            _ => break,
                        }
                    } else {
                        if !pending.is_empty() {
                            let mut span = oseq.reserve(pending.len() * 8)?;
                            store_cf64(&pending, span.data());
                        }
                        break;
                    }
                }
                Err(e) => {
                    error!(stage = self.name(), "read failed: {e}");
                    break;
                }
            }
        }

        drop(oseq);
        drop(writer);
        info!(stage = self.name(), "done");
        Ok(())
    }
}

/// Live UDP capture of channelized F-engine packets.
///
/// The first packet of the source group opens the sequence; packets are
/// then reassembled into `(time, chan, stand, pol)` ci4 gulps of
/// `ntime_gulp` time slots. Slots never filled stay zero; late packets
/// are dropped. Receive timeouts loop back to the shutdown check.
pub struct LiveCaptureStage {
    oring: Ring,
    addr: SocketAddr,
    nsrc: usize,
    ntime_gulp: usize,
    max_payload_size: usize,
    utc_start: DateTime<Utc>,
    core: Option<usize>,
}

impl LiveCaptureStage {
    /// Creates the stage.
    pub fn new(
        oring: Ring,
        addr: SocketAddr,
        nsrc: usize,
        ntime_gulp: usize,
        max_payload_size: usize,
        utc_start: DateTime<Utc>,
        core: Option<usize>,
    ) -> Self {
        Self {
            oring,
            addr,
            nsrc,
            ntime_gulp,
            max_payload_size,
            utc_start,
            core,
        }
    }

    fn bind_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| PipelineError::io_fatal(format!("socket: {e}")))?;
        socket
            .set_reuse_address(true)
            .and_then(|_| socket.set_recv_buffer_size(16 << 20))
            .and_then(|_| socket.bind(&self.addr.into()))
            .map_err(|e| PipelineError::io_fatal(format!("bind {}: {e}", self.addr)))?;
        let sock: UdpSocket = socket.into();
        sock.set_read_timeout(Some(std::time::Duration::from_millis(500)))
            .map_err(|e| PipelineError::io_fatal(format!("timeout: {e}")))?;
        Ok(sock)
    }

    /// Copies one packet's payload into the gulp at time slot `t`.
    fn deposit(
        span: &mut [u8],
        payload: &[u8],
        t: usize,
        hdr: &ChipsHeader,
        nstand: usize,
    ) {
        let nchan = hdr.nchan as usize;
        let npol = hdr.npol as usize;
        let lane = STANDS_PER_SRC * npol;
        for c in 0..nchan {
            let dst = ((t * nchan + c) * nstand + hdr.src as usize * STANDS_PER_SRC) * npol;
            span[dst..dst + lane].copy_from_slice(&payload[c * lane..(c + 1) * lane]);
        }
    }
}

impl Stage for LiveCaptureStage {
    fn name(&self) -> &'static str {
        "CaptureStage"
    }

    fn core(&self) -> Option<usize> {
        self.core
    }

    fn output_ring(&self) -> Option<&Ring> {
        Some(&self.oring)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        StatusLog::new(self.name(), "bind").update([(
            "core0",
            self.core.map(|c| c as i64).unwrap_or(-1),
        )]);
        StatusLog::new(self.name(), "out").update([
            ("nring", "1".to_string()),
            ("ring0", self.oring.name().to_string()),
        ]);
        StatusLog::new(self.name(), "size").update([("nseq_per_gulp", self.ntime_gulp)]);

        let sock = self.bind_socket()?;
        let mut buf = vec![0u8; self.max_payload_size];

        // The first well-formed packet defines the sequence.
        let first = loop {
            if ctx.shutting_down() {
                return Ok(());
            }
            match sock.recv(&mut buf) {
                Ok(n) => {
                    if let Some(h) = ChipsHeader::parse(&buf[..n]) {
                        break h;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => return Err(PipelineError::io_fatal(format!("recv: {e}"))),
            }
        };

        let nchan = first.nchan as usize;
        let npol = first.npol as usize;
        let nstand = self.nsrc * STANDS_PER_SRC;
        let seq0 = first.seq;
        let chan0 = first.chan0 as i64;
        let chan_bw = ctx.config.chan_bw;
        let time_tag = ctx.config.time_tag(self.utc_start, seq0 as i64);
        debug!(stage = self.name(), seq0, time_tag, "first packet");

        let hdr = SequenceHeader {
            time_tag,
            seq0: seq0 as i64,
            chan0,
            nchan,
            cfreq: (chan0 as f64 + 0.5 * (nchan as f64 - 1.0)) * chan_bw,
            bw: nchan as f64 * chan_bw,
            nstand,
            npol,
            nbit: 4,
            complex: true,
            axes: "time,chan,stand,pol".into(),
            grid_size_x: None,
            grid_size_y: None,
            sampling_length_x: None,
            sampling_length_y: None,
            accumulation_time: None,
            fs: None,
            latitude: None,
            longitude: None,
            telescope: None,
            data_units: None,
            pols: None,
        };
        let hdr_json = hdr.to_json()?;
        StatusLog::new(self.name(), "sequence0").update([("time_tag", time_tag)]);

        let ogulp = self.ntime_gulp * nchan * nstand * npol;
        self.oring.resize(ogulp, 5)?;
        let mut writer = self.oring.begin_writing()?;
        let mut oseq = writer.begin_sequence(time_tag, &hdr_json)?;
        let mut perf = PerfLog::new(self.name());

        let mut win_start = seq0;
        let mut span = oseq.reserve(ogulp)?;
        span.data().fill(0);
        Self::deposit(span.data(), &buf[crate::chips::HEADER_LEN..], 0, &first, nstand);
        let mut late = 0u64;

        loop {
            if ctx.shutting_down() {
                // The in-flight gulp completes; nothing after it starts.
                drop(span);
                break;
            }
            let n = match sock.recv(&mut buf) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    error!(stage = self.name(), "recv failed: {e}");
                    drop(span);
                    break;
                }
            };
            let Some(h) = ChipsHeader::parse(&buf[..n]) else {
                continue;
            };
            if h.nchan as usize != nchan || h.npol as usize != npol || h.chan0 as i64 != chan0 {
                warn!(stage = self.name(), "packet geometry changed mid-sequence; dropped");
                continue;
            }
            if h.seq < win_start {
                late += 1;
                if late % 10_000 == 1 {
                    warn!(stage = self.name(), late, "late packets dropped");
                }
                continue;
            }
            while h.seq >= win_start + self.ntime_gulp as u64 {
                perf.acquired();
                drop(span);
                perf.reserved();
                win_start += self.ntime_gulp as u64;
                span = oseq.reserve(ogulp)?;
                span.data().fill(0);
                perf.processed();
                if ctx.shutting_down() {
                    drop(span);
                    drop(oseq);
                    drop(writer);
                    info!(stage = self.name(), "done");
                    return Ok(());
                }
            }
            let t = (h.seq - win_start) as usize;
            Self::deposit(span.data(), &buf[crate::chips::HEADER_LEN..n], t, &h, nstand);
        }

        drop(oseq);
        drop(writer);
        info!(stage = self.name(), "done");
        Ok(())
    }
}
