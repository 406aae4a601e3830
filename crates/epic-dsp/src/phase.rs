//! Zenith phase corrections.
//!
//! Each antenna's signal is rotated by the conjugate of its cable delay and
//! geometric height term so that a zenith source adds coherently on the
//! grid, and weighted down by the square root of its cable gain:
//!
//! ```text
//! phi[c,p,s] = exp(2*pi*i * f[c] * (delay[p,s](f[c]) - z[s]/c)) / sqrt(gain[p,s](f[c]))
//! ```
//!
//! Masked antennas get zero rows and therefore vanish from the grid.

use ndarray::Array3;

use epic_core::config::SPEED_OF_LIGHT;
use epic_core::{Complex32, Station};

/// Builds the `(nchan, npol, nstand)` zenith phase table for a station.
pub fn zenith_phases(station: &Station, freqs: &[f64], npol: usize) -> Array3<Complex32> {
    let nchan = freqs.len();
    let nstand = station.nstand();
    let mut phases = Array3::<Complex32>::zeros((nchan, npol, nstand));

    for s in 0..nstand {
        for p in 0..npol {
            let ant = station.antenna(s, p);
            if ant.masked {
                continue;
            }
            let delays = ant.cable.delay(freqs);
            let gains = ant.cable.gain(freqs);
            for c in 0..nchan {
                let delay = delays[c] - ant.enu[2] / SPEED_OF_LIGHT;
                let arg = 2.0 * std::f64::consts::PI * freqs[c] * delay;
                let w = 1.0 / gains[c].sqrt();
                phases[[c, p, s]] = Complex32::new(
                    (arg.cos() * w) as f32,
                    (arg.sin() * w) as f32,
                );
            }
        }
    }
    phases
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use epic_core::antenna::{synthetic_station, CableModel};

    #[test]
    fn magnitude_is_inverse_root_gain() {
        let mut station = synthetic_station(2, 5.0);
        let cable = CableModel {
            d0: 450e-9,
            a: 0.02,
            k: 1.5,
            f_ref: 10e6,
        };
        for a in &mut station.antennas {
            a.cable = cable;
        }
        let freqs = [38.0e6, 46.2e6];
        let phases = zenith_phases(&station, &freqs, 2);
        for c in 0..2 {
            let expect = 1.0 / cable.gain(&freqs)[c].sqrt();
            for p in 0..2 {
                for s in 0..station.nstand() {
                    assert_relative_eq!(
                        phases[[c, p, s]].norm() as f64,
                        expect,
                        max_relative = 1e-5
                    );
                }
            }
        }
    }

    #[test]
    fn masked_rows_are_zero() {
        let mut station = synthetic_station(2, 5.0);
        station.antennas[2].masked = true;
        station.antennas[3].masked = true;
        let phases = zenith_phases(&station, &[46.2e6], 2);
        for p in 0..2 {
            assert_eq!(phases[[0, p, 1]], Complex32::default());
            assert_ne!(phases[[0, p, 0]], Complex32::default());
        }
    }

    #[test]
    fn height_term_rotates_phase() {
        let mut station = synthetic_station(2, 5.0);
        // Raise one stand; its phase must differ from a flat stand's.
        station.antennas[0].enu[2] = 1.5;
        station.antennas[1].enu[2] = 1.5;
        let phases = zenith_phases(&station, &[46.2e6], 2);
        let raised = phases[[0, 0, 0]];
        let flat = phases[[0, 0, 1]];
        assert!((raised - flat).norm() > 1e-3);
        assert_relative_eq!(raised.norm(), flat.norm(), max_relative = 1e-5);
    }
}
