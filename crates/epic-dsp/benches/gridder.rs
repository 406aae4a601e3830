use criterion::{criterion_group, criterion_main, Criterion};

use epic_dsp::{generate_locations, grid_batch, Complex32, Fft2, GridParams};

fn gridder(c: &mut Criterion) {
    let (ntime, nchan, npol, grid_size) = (100, 4, 2, 64);
    let side = 16usize;
    let positions: Vec<[f64; 3]> = (0..side * side)
        .map(|s| [((s % side) as f64) * 5.0, ((s / side) as f64) * 5.0, 0.0])
        .collect();
    let nstand = positions.len();
    let freqs: Vec<f64> = (0..nchan).map(|i| 46.2e6 + i as f64 * 25.0e3).collect();
    let locs = generate_locations(
        &positions,
        &freqs,
        ntime,
        nchan,
        npol,
        grid_size,
        20.0 / 60.0,
    )
    .unwrap();
    let params = GridParams {
        grid_size,
        ant_extent: 1,
    };
    let kernel = params.default_kernel();
    let udata = vec![Complex32::new(1.0, -0.5); ntime * nchan * npol * nstand];
    let mut grid = vec![Complex32::default(); ntime * nchan * npol * grid_size * grid_size];

    c.bench_function("grid_batch 100x4x2x256", |b| {
        b.iter(|| {
            grid_batch(
                &udata, ntime, nchan, npol, nstand, &locs, &kernel, params, &mut grid,
            )
            .unwrap()
        })
    });

    let fft = Fft2::inverse(grid_size);
    c.bench_function("ifft2 batch 800x64x64", |b| {
        b.iter(|| fft.execute_batch(&mut grid).unwrap())
    });
}

criterion_group!(benches, gridder);
criterion_main!(benches);
