//! End-to-end offline replay through every stage.

use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;

use epic_core::antenna::synthetic_station;
use epic_core::{Complex32, ObservingConfig, SequenceHeader, Station};
use epic_io::{read_image_archive, write_voltage_file};
use epic_pipeline::{
    ChannelizeStage, ImagerStage, OfflineCaptureStage, Pipeline, SinkStage, TransposeStage,
};
use epic_ring::{Residency, Ring};

const NTS: usize = 100;
const NCHAN: usize = 4;
const GRID: usize = 16;
const SAMPLE_RATE: f64 = 100e3;

/// 10000 samples = one capture read = 100 raw gulps = 25 imager gulps.
const NSAMPLES: usize = 10_000;

fn make_voltage_file(path: &Path, station: &Station, fill: impl Fn(usize) -> Complex32) {
    let nantpol = station.nstand() * 2;
    let data = Array2::from_shape_fn((nantpol, NSAMPLES), |(ap, _)| fill(ap));
    write_voltage_file(path, 46.2e6, SAMPLE_RATE, 0, data.view()).unwrap();
}

/// Wires the offline stages end to end over the standard ring set.
fn run_full(
    tbn: &Path,
    out_dir: &Path,
    station: Arc<Station>,
    nts: usize,
    accumulate_ms: u64,
    ints_per_file: usize,
    remove_autocorrs: bool,
) {
    let capture_ring = Ring::new("capture", Residency::Host);
    let fdomain_ring = Ring::new("fengine", Residency::Host);
    let transpose_ring = Ring::new("transpose", Residency::Host);
    let gridandfft_ring = Ring::new("gridandfft", Residency::Device(0));

    let mut pipeline = Pipeline::new(ObservingConfig::default());
    pipeline
        .add_stage(Box::new(OfflineCaptureStage::new(
            capture_ring.clone(),
            tbn.to_path_buf(),
            nts,
            false,
            None,
        )))
        .unwrap();
    pipeline
        .add_stage(Box::new(
            ChannelizeStage::new(capture_ring, fdomain_ring.clone(), nts, NCHAN, None).unwrap(),
        ))
        .unwrap();
    pipeline
        .add_stage(Box::new(TransposeStage::new(
            fdomain_ring,
            transpose_ring.clone(),
            nts,
            None,
        )))
        .unwrap();
    pipeline
        .add_stage(Box::new(ImagerStage::new(
            transpose_ring,
            gridandfft_ring.clone(),
            station,
            GRID,
            20.0 / 60.0,
            nts,
            accumulate_ms,
            remove_autocorrs,
            false,
            None,
            Some(0),
        )))
        .unwrap();
    pipeline
        .add_stage(Box::new(SinkStage::new(
            gridandfft_ring,
            ints_per_file,
            out_dir.to_path_buf(),
            None,
            Some(0),
        )))
        .unwrap();
    pipeline.run().unwrap();
}

#[test]
fn dc_tone_images_to_grid_center() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let station = Arc::new(synthetic_station(2, 100.0));
    let tbn = dir.path().join("tone.nc");
    make_voltage_file(&tbn, &station, |_| Complex32::new(1.0, 0.0));

    // 4 ms per imager gulp; 8 ms dwell = 2 gulps per integration.
    run_full(&tbn, out.path(), station, NTS, 8, 2, false);

    let mut archives: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    archives.sort();
    // 25 imager gulps -> 12 integrations -> 6 files of 2 integrations.
    assert_eq!(archives.len(), 6);
    assert!(archives[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("EPIC_"));

    let cube = read_image_archive(&archives[0]).unwrap();
    assert_eq!(cube.shape, [2, NCHAN, 4, GRID, GRID]);
    assert_eq!(cube.image_nums, vec![0, 1]);

    let hdr = SequenceHeader::from_json(&cube.hdr).unwrap();
    assert_eq!(hdr.npol, 4);
    assert_eq!(
        hdr.pols.as_deref().unwrap(),
        ["xx", "xy", "yx", "yy"]
    );
    assert_eq!(hdr.grid_size_x, Some(GRID));
    assert_eq!(hdr.data_units.as_deref(), Some("UNCALIB"));

    // A DC tone channelizes into the center channel; its xx image peaks
    // within one pixel of the grid center.
    let plane = GRID * GRID;
    let center_chan = NCHAN / 2;
    let xx = &cube.image[(center_chan * 4) * plane..][..plane];
    let (peak_idx, peak) = xx
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
        .unwrap();
    assert!(peak.norm() > 0.0);
    let (py, px) = (peak_idx / GRID, peak_idx % GRID);
    assert!(
        (py as i64 - (GRID / 2) as i64).abs() <= 1,
        "peak row {py}"
    );
    assert!(
        (px as i64 - (GRID / 2) as i64).abs() <= 1,
        "peak col {px}"
    );

    // Channels away from the tone carry nothing.
    let quiet = &cube.image[..plane];
    assert!(quiet.iter().all(|v| v.norm() < 1e-3));
}

#[test]
fn short_final_span_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let station = Arc::new(synthetic_station(2, 100.0));
    let tbn = dir.path().join("ragged.nc");
    make_voltage_file(&tbn, &station, |_| Complex32::new(1.0, 0.0));

    // 10000 samples at nts=300: 33 full gulps plus a 100-sample short
    // span that every consumer must skip. 33 raw gulps stage into 8
    // channelized gulps (one block dropped); 12 ms per gulp at 8 ms dwell
    // gives one integration per gulp.
    run_full(&tbn, out.path(), station, 300, 8, 1, false);

    let archives: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(archives.len(), 8);
}

#[test]
fn autocorr_subtraction_cancels_single_antenna() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let station = Arc::new(synthetic_station(2, 100.0));
    let tbn = dir.path().join("single.nc");
    // Only stand 0 (antpol rows 0 and 1) is lit.
    make_voltage_file(&tbn, &station, |ap| {
        if ap < 2 {
            Complex32::new(1.0, 0.0)
        } else {
            Complex32::default()
        }
    });

    run_full(&tbn, out.path(), station, NTS, 8, 1, true);

    let archives: Vec<_> = std::fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(!archives.is_empty());
    let cube = read_image_archive(&archives[0]).unwrap();
    // A single antenna's image is pure self-power; subtraction removes it.
    let peak = cube
        .image
        .iter()
        .map(|v| v.norm())
        .fold(0.0f32, f32::max);
    assert!(peak < 1e-3, "residual after subtraction: {peak}");
}
