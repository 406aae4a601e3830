//! The stage contract and shared stage plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use epic_core::{Complex32, ObservingConfig};
use epic_ring::Ring;

use crate::error::Result;

/// Shared context handed to every running stage.
#[derive(Clone)]
pub struct StageContext {
    /// Process-wide shutdown flag, polled between gulps and at header
    /// boundaries. In-flight gulps always complete.
    pub shutdown: Arc<AtomicBool>,
    /// Observing constants.
    pub config: Arc<ObservingConfig>,
}

impl StageContext {
    /// Creates a context with a fresh shutdown flag.
    pub fn new(config: ObservingConfig) -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
        }
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Requests shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// One pipeline stage, run on its own thread.
pub trait Stage: Send {
    /// Stage name, also the status-record namespace.
    fn name(&self) -> &'static str;

    /// CPU core to pin to, if any.
    fn core(&self) -> Option<usize> {
        None
    }

    /// Compute device this stage runs on, if any. Checked against the
    /// residency of the rings it binds.
    fn device(&self) -> Option<usize> {
        None
    }

    /// The ring this stage consumes, if any.
    fn input_ring(&self) -> Option<&Ring> {
        None
    }

    /// The ring this stage produces, if any.
    fn output_ring(&self) -> Option<&Ring> {
        None
    }

    /// Runs the stage to completion.
    fn run(&mut self, ctx: &StageContext) -> Result<()>;
}

/// Decodes a `cf64` byte span (pairs of little-endian f32) into `out`.
pub fn load_cf64(bytes: &[u8], out: &mut Vec<Complex32>) {
    out.clear();
    out.reserve(bytes.len() / 8);
    for chunk in bytes.chunks_exact(8) {
        let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        out.push(Complex32::new(re, im));
    }
}

/// Encodes complex samples as `cf64` bytes into `dst`.
pub fn store_cf64(src: &[Complex32], dst: &mut [u8]) {
    for (v, chunk) in src.iter().zip(dst.chunks_exact_mut(8)) {
        chunk[0..4].copy_from_slice(&v.re.to_le_bytes());
        chunk[4..8].copy_from_slice(&v.im.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cf64_round_trip() {
        let src = vec![Complex32::new(1.5, -2.25), Complex32::new(0.0, 3.0)];
        let mut bytes = vec![0u8; 16];
        store_cf64(&src, &mut bytes);
        let mut back = Vec::new();
        load_cf64(&bytes, &mut back);
        assert_eq!(src, back);
    }

    #[test]
    fn shutdown_flag_is_shared() {
        let ctx = StageContext::new(ObservingConfig::default());
        let ctx2 = ctx.clone();
        assert!(!ctx.shutting_down());
        ctx2.request_shutdown();
        assert!(ctx.shutting_down());
    }
}
