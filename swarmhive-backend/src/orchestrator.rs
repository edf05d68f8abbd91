//! Orchestrator service: wires bus events into the lifecycle coordinator and
//! the confirmation tracker.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use swarmhive_shared::address_book::{CONTROLLER_ROLE, signals};
use swarmhive_shared::{ConfirmationEnvelope, ConfirmationOutcome};

use crate::bus::ControlPlaneBus;
use crate::confirmation::ConfirmationTracker;
use crate::coordinator::SwarmLifecycleCoordinator;

/// Controller readiness announcements
pub const READY_PATTERN: &str = "ev.ready.swarm-controller.#";

/// Every confirmation on the bus
pub const EVENT_PATTERN: &str = "ev.#";

pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct OrchestratorService {
    coordinator: Arc<SwarmLifecycleCoordinator>,
    tracker: Arc<ConfirmationTracker>,
    bus: Arc<dyn ControlPlaneBus>,
    eviction_interval: Duration,
}

impl OrchestratorService {
    pub fn new(
        coordinator: Arc<SwarmLifecycleCoordinator>,
        tracker: Arc<ConfirmationTracker>,
        bus: Arc<dyn ControlPlaneBus>,
    ) -> Self {
        Self {
            coordinator,
            tracker,
            bus,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
        }
    }

    pub fn with_eviction_interval(mut self, eviction_interval: Duration) -> Self {
        self.eviction_interval = eviction_interval;
        self
    }

    pub fn coordinator(&self) -> &Arc<SwarmLifecycleCoordinator> {
        &self.coordinator
    }

    /// Create the requested swarms. Failures are logged and skipped.
    pub async fn provision(&self, requests: &[(String, String)]) -> usize {
        let mut created = 0;
        for (swarm_id, scenario_id) in requests {
            match self.coordinator.create(swarm_id, scenario_id).await {
                Ok(record) => {
                    created += 1;
                    info!(
                        "[ORCHESTRATOR] Swarm {} created from {} (controller {})",
                        record.swarm_id, record.scenario_id, record.controller_instance
                    );
                }
                Err(e) => error!("[ORCHESTRATOR] Failed to create swarm {}: {}", swarm_id, e),
            }
        }
        created
    }

    /// Delete every known swarm
    pub async fn teardown(&self) {
        for record in self.coordinator.list() {
            if let Err(e) = self.coordinator.delete(&record.swarm_id).await {
                warn!("[ORCHESTRATOR] Failed to delete swarm {}: {}", record.swarm_id, e);
            }
        }
    }

    /// Run the tracker on a confirmation. Returns whether it was forwarded.
    pub fn handle_confirmation(&self, confirmation: &ConfirmationEnvelope) -> bool {
        if is_readiness_announcement(confirmation) {
            return false;
        }
        if !self.tracker.observe(confirmation) {
            return false;
        }

        match confirmation.outcome() {
            ConfirmationOutcome::Success { notes, .. } => info!(
                "[ORCHESTRATOR] {} confirmed by {}/{} in {} (correlation {}){}",
                confirmation.signal,
                confirmation.role,
                confirmation.instance,
                confirmation.swarm_id,
                confirmation.correlation_id,
                notes.as_deref().map(|n| format!(": {}", n)).unwrap_or_default()
            ),
            ConfirmationOutcome::Error { code, message } => warn!(
                "[ORCHESTRATOR] {} failed on {}/{} in {} (correlation {}): {} {}",
                confirmation.signal,
                confirmation.role,
                confirmation.instance,
                confirmation.swarm_id,
                confirmation.correlation_id,
                code.as_deref().unwrap_or("error"),
                message.as_deref().unwrap_or_default()
            ),
        }
        true
    }

    /// Consume bus events until `shutdown` resolves or a subscription closes.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ready = self
            .bus
            .subscribe(READY_PATTERN)
            .await
            .context("Failed to subscribe to readiness events")?;
        let mut events = self
            .bus
            .subscribe(EVENT_PATTERN)
            .await
            .context("Failed to subscribe to confirmations")?;
        info!("[ORCHESTRATOR] Listening for controller readiness and confirmations");

        let mut eviction = interval(self.eviction_interval);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        eviction.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[ORCHESTRATOR] Shutdown requested");
                    break;
                }
                message = ready.recv() => {
                    let Some(message) = message else { break };
                    match message.decode::<ConfirmationEnvelope>() {
                        Ok(announcement) => self.dispatch_ready(announcement.instance),
                        Err(e) => warn!("[ORCHESTRATOR] Dropping undecodable ready event: {}", e),
                    }
                }
                message = events.recv() => {
                    let Some(message) = message else { break };
                    match message.decode::<ConfirmationEnvelope>() {
                        Ok(confirmation) => {
                            self.handle_confirmation(&confirmation);
                        }
                        Err(e) => debug!("[ORCHESTRATOR] Ignoring undecodable event: {}", e),
                    }
                }
                _ = eviction.tick() => {
                    self.tracker.evict_expired(Instant::now());
                }
            }
        }
        Ok(())
    }

    /// Ready events wait on the swarm lock, which a create in flight may hold,
    /// so they run off the event loop.
    fn dispatch_ready(&self, controller_instance: String) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.on_ready_event(&controller_instance).await {
                error!(
                    "[ORCHESTRATOR] Ready event from {} not applied: {}",
                    controller_instance, e
                );
            }
        });
    }
}

fn is_readiness_announcement(confirmation: &ConfirmationEnvelope) -> bool {
    confirmation.signal == signals::SWARM_CONTROLLER && confirmation.role == CONTROLLER_ROLE
}
