//! Callbacks reported by the timeline engine.

use swarmhive_shared::{Scope, TimelineStep};
use tracing::{info, warn};

use super::timeline::StepError;

/// Every method defaults to a no-op, so implementors override only what they need.
pub trait TimelineObserver: Send + Sync {
    fn on_plan_loaded(&self, _bee_count: usize, _swarm_step_count: usize) {}

    fn on_timeline_started(&self, _swarm_id: &str) {}

    fn on_step_started(&self, _step: &TimelineStep, _target: &Scope) {}

    fn on_step_completed(&self, _step: &TimelineStep, _target: &Scope) {}

    fn on_step_failed(&self, _step: &TimelineStep, _target: &Scope, _error: &StepError) {}

    fn on_plan_completed(&self, _result: Option<&str>, _notes: Option<&str>) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl TimelineObserver for NoopObserver {}

/// Logs every callback
pub struct TracingObserver {
    swarm_id: String,
}

impl TracingObserver {
    pub fn new(swarm_id: impl Into<String>) -> Self {
        Self {
            swarm_id: swarm_id.into(),
        }
    }
}

impl TimelineObserver for TracingObserver {
    fn on_plan_loaded(&self, bee_count: usize, swarm_step_count: usize) {
        info!(
            "[TIMELINE] {}: plan loaded ({} bee groups, {} swarm steps)",
            self.swarm_id, bee_count, swarm_step_count
        );
    }

    fn on_timeline_started(&self, swarm_id: &str) {
        info!("[TIMELINE] {}: timeline started", swarm_id);
    }

    fn on_step_started(&self, step: &TimelineStep, target: &Scope) {
        info!(
            "[TIMELINE] {}: step '{}' ({}) -> {}",
            self.swarm_id, step.step_id, step.step_type, target
        );
    }

    fn on_step_completed(&self, step: &TimelineStep, _target: &Scope) {
        info!("[TIMELINE] {}: step '{}' done", self.swarm_id, step.step_id);
    }

    fn on_step_failed(&self, step: &TimelineStep, target: &Scope, error: &StepError) {
        warn!(
            "[TIMELINE] {}: step '{}' for {} failed: {}",
            self.swarm_id, step.step_id, target, error
        );
    }

    fn on_plan_completed(&self, result: Option<&str>, notes: Option<&str>) {
        match result {
            None => info!("[TIMELINE] {}: plan completed", self.swarm_id),
            Some(result) => warn!(
                "[TIMELINE] {}: plan completed with {} ({})",
                self.swarm_id,
                result,
                notes.unwrap_or("")
            ),
        }
    }
}
