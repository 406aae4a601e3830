//! Pipeline orchestration.
//!
//! Owns the stages, validates stage/ring residency at bind time, pins each
//! stage thread to its core, and propagates shutdown: when the primary
//! (capture) stage exits or the shutdown flag is raised, every stage winds
//! down, in-flight gulps complete, and threads are joined in dataflow
//! order.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use epic_core::ObservingConfig;
use epic_ring::{Residency, Ring, RingError};

use crate::error::{PipelineError, Result};
use crate::stage::{Stage, StageContext};

/// The stage supervisor.
pub struct Pipeline {
    ctx: StageContext,
    stages: Vec<Box<dyn Stage>>,
    profile: bool,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(config: ObservingConfig) -> Self {
        Self {
            ctx: StageContext::new(config),
            stages: Vec::new(),
            profile: false,
        }
    }

    /// Enables per-stage busy-time reporting at exit.
    pub fn with_profiling(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// The shared context (for signal handlers and tests).
    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Validates that `stage` may touch `ring` given its device binding.
    fn check_residency(stage: &dyn Stage, ring: &Ring) -> Result<()> {
        match ring.residency() {
            Residency::Host => Ok(()),
            Residency::Device(id) => {
                if stage.device() == Some(id) {
                    Ok(())
                } else {
                    Err(PipelineError::Ring(RingError::ResidencyMismatch {
                        ring: ring.name().to_string(),
                        ring_residency: ring.residency(),
                        stage: stage.name().to_string(),
                        stage_residency: match stage.device() {
                            Some(d) => Residency::Device(d),
                            None => Residency::Host,
                        },
                    }))
                }
            }
        }
    }

    /// Adds a stage, validating its ring bindings. The first stage added
    /// is the primary: its exit triggers pipeline shutdown.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> Result<()> {
        if let Some(ring) = stage.input_ring() {
            Self::check_residency(stage.as_ref(), ring)?;
        }
        if let Some(ring) = stage.output_ring() {
            Self::check_residency(stage.as_ref(), ring)?;
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Runs every stage to completion. Returns the first stage error, if
    /// any.
    pub fn run(&mut self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::config("pipeline has no stages"));
        }
        let profile = self.profile;
        let mut handles = Vec::new();
        for mut stage in self.stages.drain(..) {
            let ctx = self.ctx.clone();
            let name = stage.name().to_string();
            let core = stage.core();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || -> Result<()> {
                    if let Some(core) = core {
                        let pinned = core_affinity::get_core_ids()
                            .unwrap_or_default()
                            .into_iter()
                            .any(|id| id.id == core && core_affinity::set_for_current(id));
                        if !pinned {
                            warn!(stage = %stage.name(), core, "core pinning unavailable");
                        }
                    }
                    let started = Instant::now();
                    let result = stage.run(&ctx);
                    if profile {
                        info!(
                            stage = %stage.name(),
                            busy_secs = started.elapsed().as_secs_f64(),
                            "stage profile"
                        );
                    }
                    result
                })
                .map_err(|e| PipelineError::config(format!("spawn {name}: {e}")))?;
            handles.push((name, handle));
        }

        // The primary stage drives the lifetime of the run. When it exits
        // cleanly the downstream stages drain through the writing-ended
        // cascade; a non-primary stage exiting first is abnormal and pulls
        // the shutdown flag.
        while !self.ctx.shutting_down() {
            if handles[0].1.is_finished() {
                break;
            }
            if handles[1..].iter().any(|(_, h)| h.is_finished()) {
                warn!("downstream stage exited early; shutting down");
                self.ctx.request_shutdown();
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let mut first_error: Option<PipelineError> = None;
        for (name, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => info!(stage = %name, "joined"),
                Ok(Err(e)) => {
                    error!(stage = %name, "failed: {e}");
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    error!(stage = %name, "panicked");
                    first_error
                        .get_or_insert_with(|| PipelineError::logic(format!("{name} panicked")));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("pipeline done");
                Ok(())
            }
        }
    }
}
