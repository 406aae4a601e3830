//! Stage status records.
//!
//! Every stage publishes textual records under a stable key namespace
//! `{StageName}/{topic}`, with topics `bind`, `in`, `out`, `size`,
//! `sequence0`, and `perf`. The registry is a process-wide snapshot that
//! monitoring (and the tests) can read at any time; updates also emit
//! `tracing` events at trace level.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

static REGISTRY: Mutex<BTreeMap<String, BTreeMap<String, String>>> = Mutex::new(BTreeMap::new());

/// Handle to one `{StageName}/{topic}` record.
#[derive(Debug, Clone)]
pub struct StatusLog {
    key: String,
}

impl StatusLog {
    /// Creates (or re-opens) the record for `stage` and `topic`.
    pub fn new(stage: &str, topic: &str) -> Self {
        Self {
            key: format!("{stage}/{topic}"),
        }
    }

    /// The full registry key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Merges `entries` into the record.
    pub fn update<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: ToString,
    {
        let mut registry = REGISTRY.lock();
        let record = registry.entry(self.key.clone()).or_default();
        for (k, v) in entries {
            let k = k.into();
            let v = v.to_string();
            trace!(key = %self.key, field = %k, value = %v, "status");
            record.insert(k, v);
        }
    }
}

/// A point-in-time copy of one record.
pub fn get(key: &str) -> Option<BTreeMap<String, String>> {
    REGISTRY.lock().get(key).cloned()
}

/// A point-in-time copy of the whole registry.
pub fn snapshot() -> BTreeMap<String, BTreeMap<String, String>> {
    REGISTRY.lock().clone()
}

/// Per-gulp acquire/reserve/process timer feeding a `perf` record.
pub struct PerfLog {
    log: StatusLog,
    mark: std::time::Instant,
    acquire: f64,
    reserve: f64,
}

impl PerfLog {
    /// Creates the `{stage}/perf` record.
    pub fn new(stage: &str) -> Self {
        Self {
            log: StatusLog::new(stage, "perf"),
            mark: std::time::Instant::now(),
            acquire: 0.0,
            reserve: 0.0,
        }
    }

    fn lap(&mut self) -> f64 {
        let now = std::time::Instant::now();
        let dt = now.duration_since(self.mark).as_secs_f64();
        self.mark = now;
        dt
    }

    /// Marks the end of input-span acquisition.
    pub fn acquired(&mut self) {
        self.acquire = self.lap();
    }

    /// Marks the end of output-span reservation.
    pub fn reserved(&mut self) {
        self.reserve = self.lap();
    }

    /// Marks the end of processing and publishes all three timings.
    pub fn processed(&mut self) {
        let process = self.lap();
        self.log.update([
            ("acquire_time", self.acquire),
            ("reserve_time", self.reserve),
            ("process_time", process),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_keyed_and_merged() {
        let log = StatusLog::new("TestStage", "out");
        log.update([("nring", "1".to_string())]);
        log.update([("ring0", "capture".to_string())]);
        let record = get("TestStage/out").unwrap();
        assert_eq!(record.get("nring").map(String::as_str), Some("1"));
        assert_eq!(record.get("ring0").map(String::as_str), Some("capture"));
    }

    #[test]
    fn perf_publishes_three_fields() {
        let mut perf = PerfLog::new("PerfStage");
        perf.acquired();
        perf.reserved();
        perf.processed();
        let record = get("PerfStage/perf").unwrap();
        for field in ["acquire_time", "reserve_time", "process_time"] {
            assert!(record.contains_key(field), "missing {field}");
        }
    }
}
