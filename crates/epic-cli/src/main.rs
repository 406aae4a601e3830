//! epic - the EPIC direct-imaging correlator.
//!
//! Builds the offline (file replay) or live (UDP capture) pipeline, wires
//! termination signals to the shutdown flag, and runs to completion.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use epic_core::{ObservingConfig, Station};
use epic_pipeline::{
    ChannelizeStage, DecimateStage, ImagerStage, LiveCaptureStage, OfflineCaptureStage, Pipeline,
    SinkStage, TransposeStage,
};
use epic_ring::{Residency, Ring};

/// EPIC correlator.
#[derive(Parser, Debug)]
#[command(name = "epic", version, about = "EPIC direct-imaging correlator")]
struct Args {
    /// F-engine UDP stream address.
    #[arg(long, default_value = "0.0.0.0")]
    addr: String,

    /// F-engine UDP stream port.
    #[arg(long, default_value_t = 4015)]
    port: u16,

    /// F-engine UDP stream start time (YYYY_M_DTH_M_S).
    #[arg(long, default_value = "1970_1_1T0_0_0")]
    utcstart: String,

    /// 1-D image size in pixels.
    #[arg(long, default_value_t = 64)]
    imagesize: usize,

    /// Image pixel size in degrees.
    #[arg(long, default_value_t = 1.79057)]
    imageres: f64,

    /// Load voltage data from disk instead of the network.
    #[arg(long)]
    offline: bool,

    /// Voltage-stream file for offline replay.
    #[arg(long)]
    tbnfile: Option<PathBuf>,

    /// Timestamps per span.
    #[arg(long, default_value_t = 1000)]
    nts: usize,

    /// Milliseconds to accumulate an image over.
    #[arg(long, default_value_t = 1000)]
    accumulate: u64,

    /// Channels to produce.
    #[arg(long, default_value_t = 1)]
    channels: usize,

    /// Process only the X polarization in live mode.
    #[arg(long)]
    singlepol: bool,

    /// Remove autocorrelations from the integrated images.
    #[arg(long)]
    removeautocorrs: bool,

    /// Integrations per output file.
    #[arg(long, default_value_t = 1)]
    ints_per_file: usize,

    /// Directory for output files.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Log gridder timings.
    #[arg(long)]
    benchmark: bool,

    /// Report per-stage busy time at exit.
    #[arg(long)]
    profile: bool,

    /// Station metadata file (antenna positions and cable models).
    #[arg(long)]
    station: PathBuf,

    /// CPU cores assigned to stages, in pipeline order.
    #[arg(long, value_delimiter = ',', default_value = "0,2,3,4,5,6,7")]
    cores: Vec<usize>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "epic=info",
        2 => "epic=debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let station = Arc::new(
        Station::load(&args.station)
            .with_context(|| format!("loading station {}", args.station.display()))?,
    );
    info!(
        station = %station.name,
        nstand = station.nstand(),
        "station metadata loaded"
    );

    if !args.out_dir.is_dir() {
        warn!(dir = %args.out_dir.display(), "output directory missing; creating it");
        std::fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("creating {}", args.out_dir.display()))?;
    }

    let mut cores = args.cores.clone().into_iter();
    let mut next_core = move || cores.next();
    let gpu = Some(0usize);

    let mut pipeline = Pipeline::new(ObservingConfig::default()).with_profiling(args.profile);

    // Rings, in dataflow order. The grid-and-FFT ring lives on the compute
    // device; residency is validated as stages bind.
    let fcapture_ring = Ring::new("capture", Residency::Host);
    let fdomain_ring = Ring::new("fengine", Residency::Host);
    let transpose_ring = Ring::new("transpose", Residency::Host);
    let gridandfft_ring = Ring::new("gridandfft", Residency::Device(0));

    if args.offline {
        let tbnfile = match &args.tbnfile {
            Some(path) => path.clone(),
            None => bail!("--offline requires --tbnfile"),
        };
        pipeline
            .add_stage(Box::new(OfflineCaptureStage::new(
                fcapture_ring.clone(),
                tbnfile,
                args.nts,
                true,
                next_core(),
            )))
            .context("capture stage")?;
        pipeline
            .add_stage(Box::new(ChannelizeStage::new(
                fcapture_ring.clone(),
                fdomain_ring.clone(),
                args.nts,
                args.channels,
                next_core(),
            )?))
            .context("channelize stage")?;
    } else {
        let utc_start = NaiveDateTime::parse_from_str(&args.utcstart, "%Y_%m_%dT%H_%M_%S")
            .with_context(|| format!("parsing --utcstart '{}'", args.utcstart))?
            .and_utc();
        let addr: SocketAddr = format!("{}:{}", args.addr, args.port)
            .parse()
            .with_context(|| format!("parsing --addr {}:{}", args.addr, args.port))?;
        pipeline
            .add_stage(Box::new(LiveCaptureStage::new(
                fcapture_ring.clone(),
                addr,
                16,
                args.nts,
                9000,
                utc_start,
                next_core(),
            )))
            .context("capture stage")?;
        pipeline
            .add_stage(Box::new(DecimateStage::new(
                fcapture_ring.clone(),
                fdomain_ring.clone(),
                args.nts,
                args.channels,
                if args.singlepol { 1 } else { 2 },
                false,
                next_core(),
            )))
            .context("decimate stage")?;
    }

    pipeline
        .add_stage(Box::new(TransposeStage::new(
            fdomain_ring.clone(),
            transpose_ring.clone(),
            args.nts,
            next_core(),
        )))
        .context("transpose stage")?;
    pipeline
        .add_stage(Box::new(ImagerStage::new(
            transpose_ring.clone(),
            gridandfft_ring.clone(),
            station.clone(),
            args.imagesize,
            args.imageres,
            args.nts,
            args.accumulate,
            args.removeautocorrs,
            args.benchmark,
            next_core(),
            gpu,
        )))
        .context("imager stage")?;
    pipeline
        .add_stage(Box::new(SinkStage::new(
            gridandfft_ring.clone(),
            args.ints_per_file,
            args.out_dir.clone(),
            next_core(),
            gpu,
        )))
        .context("sink stage")?;

    // Termination signals request a graceful shutdown: in-flight gulps
    // complete and no partial file is written.
    let shutdown = pipeline.context().clone();
    ctrlc::set_handler(move || {
        warn!("termination signal received; shutting down");
        shutdown.request_shutdown();
    })
    .context("installing signal handler")?;

    pipeline.run().context("pipeline failed")?;
    info!("done");
    Ok(())
}
