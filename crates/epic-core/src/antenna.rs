//! Telescope metadata: stations, antennas, and cable models.
//!
//! The pipeline imports antenna positions and cable characteristics from a
//! station metadata file. Antennas are paired: indices `2i` and `2i + 1`
//! share a stand and differ only in feed polarization. Masking (for the
//! outrigger stand of LWA-SV, or any antenna taken out of the array) is a
//! predicate on the descriptor, carried in the metadata rather than keyed
//! off a magic stand id.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Feed polarization of one antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarization {
    /// East-west dipole.
    X,
    /// North-south dipole.
    Y,
}

/// Parameterized coaxial cable model.
///
/// Delay and gain are smooth functions of frequency:
///
/// ```text
/// delay(f) = d0 * (1 + a * sqrt(f_ref / f))        seconds
/// gain(f)  = 10^(-(k * sqrt(f / f_ref)) / 10)      unitless
/// ```
///
/// # Example
///
/// ```rust
/// use epic_core::CableModel;
///
/// let cable = CableModel { d0: 450e-9, a: 0.02, k: 1.5, f_ref: 10e6 };
/// let gains = cable.gain(&[10e6, 40e6]);
/// // Attenuation grows with frequency.
/// assert!(gains[0] > gains[1]);
/// assert_eq!(CableModel::IDEAL.delay(&[46.2e6]), vec![0.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CableModel {
    /// Bulk delay at the reference frequency, seconds.
    pub d0: f64,
    /// Dispersion coefficient.
    pub a: f64,
    /// Attenuation in dB at the reference frequency.
    pub k: f64,
    /// Reference frequency, Hz.
    pub f_ref: f64,
}

impl CableModel {
    /// A lossless, delay-free cable (useful in tests).
    pub const IDEAL: CableModel = CableModel {
        d0: 0.0,
        a: 0.0,
        k: 0.0,
        f_ref: 10.0e6,
    };

    /// Signal delay at each frequency, seconds.
    pub fn delay(&self, freqs: &[f64]) -> Vec<f64> {
        freqs
            .iter()
            .map(|&f| self.d0 * (1.0 + self.a * (self.f_ref / f).sqrt()))
            .collect()
    }

    /// Power gain at each frequency, unitless in (0, 1].
    pub fn gain(&self, freqs: &[f64]) -> Vec<f64> {
        freqs
            .iter()
            .map(|&f| 10f64.powf(-(self.k * (f / self.f_ref).sqrt()) / 10.0))
            .collect()
    }
}

/// One polarized feed on a stand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Antenna {
    /// Antenna id.
    pub id: u32,
    /// Stand id shared by the paired antenna.
    pub stand: u32,
    /// East-north-up position of the stand, meters.
    pub enu: [f64; 3],
    /// Feed polarization.
    pub pol: Polarization,
    /// Whether this antenna is excluded from imaging (phases zeroed,
    /// position treated as the array origin).
    #[serde(default)]
    pub masked: bool,
    /// Cable model for this feed.
    pub cable: CableModel,
}

/// A station: observatory coordinates plus the antenna table.
///
/// # Example
///
/// ```rust
/// use epic_core::antenna::synthetic_station;
///
/// let station = synthetic_station(4, 5.0);
/// assert_eq!(station.nstand(), 16);
/// // Indices 2i and 2i + 1 share a stand, differing only in feed.
/// assert_eq!(station.antenna(3, 0).stand, station.antenna(3, 1).stand);
/// // One ENU row per stand, ready for the location precompute.
/// assert_eq!(station.stand_positions().len(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Station name, e.g. `"LWA-SV"`.
    pub name: String,
    /// Latitude, degrees north.
    pub latitude_deg: f64,
    /// Longitude, degrees east.
    pub longitude_deg: f64,
    /// Antennas in pair order: `2i` and `2i + 1` share stand `i`.
    pub antennas: Vec<Antenna>,
}

impl Station {
    /// Parses a station from its JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let station: Station = serde_json::from_slice(bytes)?;
        station.validate()?;
        Ok(station)
    }

    /// Loads a station metadata file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    fn validate(&self) -> Result<()> {
        if self.antennas.is_empty() || self.antennas.len() % 2 != 0 {
            return Err(CoreError::station(format!(
                "antenna table must pair X/Y feeds, got {} entries",
                self.antennas.len()
            )));
        }
        for i in 0..self.antennas.len() / 2 {
            let (x, y) = (&self.antennas[2 * i], &self.antennas[2 * i + 1]);
            if x.stand != y.stand {
                return Err(CoreError::station(format!(
                    "antennas {} and {} do not share a stand",
                    x.id, y.id
                )));
            }
        }
        Ok(())
    }

    /// Number of stands.
    #[inline]
    pub fn nstand(&self) -> usize {
        self.antennas.len() / 2
    }

    /// The antenna for stand `s`, polarization slot `p` (0 = X, 1 = Y).
    #[inline]
    pub fn antenna(&self, s: usize, p: usize) -> &Antenna {
        &self.antennas[2 * s + p]
    }

    /// ENU positions, one row per stand, masked stands forced to the
    /// origin so they land at the array reference point.
    pub fn stand_positions(&self) -> Vec<[f64; 3]> {
        (0..self.nstand())
            .map(|s| {
                let a = self.antenna(s, 0);
                if a.masked {
                    [0.0, 0.0, 0.0]
                } else {
                    a.enu
                }
            })
            .collect()
    }
}

/// Builds a synthetic square-layout station for tests and demos.
///
/// Stands are laid out on a `side x side` grid with `spacing` meters
/// between neighbors, centered on the origin, all with ideal cables.
pub fn synthetic_station(side: usize, spacing: f64) -> Station {
    let mut antennas = Vec::with_capacity(side * side * 2);
    let half = (side as f64 - 1.0) / 2.0;
    for s in 0..side * side {
        let gx = (s % side) as f64 - half;
        let gy = (s / side) as f64 - half;
        let enu = [gx * spacing, gy * spacing, 0.0];
        for (slot, pol) in [Polarization::X, Polarization::Y].into_iter().enumerate() {
            antennas.push(Antenna {
                id: (2 * s + slot) as u32,
                stand: s as u32,
                enu,
                pol,
                masked: false,
                cable: CableModel::IDEAL,
            });
        }
    }
    Station {
        name: "SYNTH".into(),
        latitude_deg: 34.348,
        longitude_deg: -106.886,
        antennas,
    }
}
