//! Observing constants.
//!
//! The original deployment carried these as module globals; here they form
//! an immutable record passed by reference to every stage.

use chrono::{DateTime, NaiveDate, Utc};

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 2.99792458e8;

/// Immutable observing constants shared by all pipeline stages.
///
/// # Example
///
/// ```rust
/// use epic_core::ObservingConfig;
///
/// let cfg = ObservingConfig::default();
/// // One channelized sample spans fs / chan_bw ADC ticks.
/// assert_eq!(cfg.ticks_per_sample(), 7840);
/// assert_eq!(cfg.time_tag(cfg.epoch(), 3), 3 * 7840);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservingConfig {
    /// ADC sample rate in Hz (`FS`). Time tags count ticks of this clock.
    pub fs: f64,
    /// F-engine channel bandwidth in Hz (`CHAN_BW`). One channelized time
    /// sample spans `fs / chan_bw` ticks.
    pub chan_bw: f64,
}

impl Default for ObservingConfig {
    fn default() -> Self {
        Self {
            fs: 196.0e6,
            chan_bw: 25.0e3,
        }
    }
}

impl ObservingConfig {
    /// Time-tag ticks per channelized time sample.
    #[inline]
    pub fn ticks_per_sample(&self) -> i64 {
        (self.fs / self.chan_bw) as i64
    }

    /// The time-tag epoch (1970-01-01 UTC).
    pub fn epoch(&self) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_default()
    }

    /// Time tag for the first sample of sequence `seq0` given the capture
    /// start time: `floor(utc_start - epoch).secs * fs + seq0 * (fs/chan_bw)`.
    pub fn time_tag(&self, utc_start: DateTime<Utc>, seq0: i64) -> i64 {
        let secs = (utc_start - self.epoch()).num_seconds();
        secs * self.fs as i64 + seq0 * self.ticks_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ticks_per_sample() {
        let cfg = ObservingConfig::default();
        assert_eq!(cfg.ticks_per_sample(), 7840);
    }

    #[test]
    fn time_tag_at_epoch() {
        let cfg = ObservingConfig::default();
        assert_eq!(cfg.time_tag(cfg.epoch(), 0), 0);
        assert_eq!(cfg.time_tag(cfg.epoch(), 3), 3 * 7840);
    }

    #[test]
    fn time_tag_one_second_in() {
        let cfg = ObservingConfig::default();
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(cfg.time_tag(t, 0), 196_000_000);
    }
}
