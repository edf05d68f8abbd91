//! Swarm lifecycle coordinator.
//!
//! Reconciles container provisioning with controller readiness. A swarm is
//! created by starting its controller container and parking the plan under the
//! controller's instance id. When that controller announces readiness the plan
//! is sent as a swarm-scoped `swarm-start` exactly once.
//!
//! Every operation touching a swarm holds the swarm's keyed lock, so a ready
//! event racing a delete (or a second ready event) is serialized.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use swarmhive_shared::address_book::{CONTROLLER_ROLE, signals};
use swarmhive_shared::{SignalEnvelope, SwarmPlan};

use crate::bus::{BusError, ControlPlaneBus};
use crate::config::env_vars;
use crate::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError};
use crate::scenario::ScenarioRepository;

pub mod registry;
pub mod state;

pub use registry::{KeyGuard, KeyedLocks, PendingSwarm, PendingSwarms, SwarmRegistry};
pub use state::{SwarmRecord, SwarmState};

/// Origin recorded on signals the coordinator sends
pub const ORCHESTRATOR_ORIGIN: &str = "orchestrator";

static SWARM_ID: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$"));

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid swarm id '{0}': expected lowercase letters, digits and dashes")]
    InvalidSwarmId(String),

    #[error("Swarm '{0}' already exists")]
    AlreadyExists(String),

    #[error("Scenario '{0}' not found")]
    ScenarioNotFound(String),

    #[error("Swarm '{0}' not found")]
    NotFound(String),

    #[error("Failed to provision controller for swarm '{swarm_id}': {source}")]
    Provisioning {
        swarm_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to tear down swarm '{swarm_id}': {source}")]
    Teardown {
        swarm_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Swarm '{swarm_id}' is {state}")]
    InvalidState { swarm_id: String, state: SwarmState },
}

/// Static inputs for provisioning controllers
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Used when a scenario does not name its own controller image
    pub default_controller_image: String,
    pub bus_prefix: String,
    /// Zenoh endpoint controllers connect to, if any
    pub controller_connect: Option<String>,
    pub tick_interval_ms: u64,
}

pub struct SwarmLifecycleCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    bus: Arc<dyn ControlPlaneBus>,
    scenarios: Arc<dyn ScenarioRepository>,
    settings: CoordinatorSettings,
    locks: KeyedLocks,
    pending: PendingSwarms,
    registry: SwarmRegistry,
}

impl SwarmLifecycleCoordinator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        bus: Arc<dyn ControlPlaneBus>,
        scenarios: Arc<dyn ScenarioRepository>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            runtime,
            bus,
            scenarios,
            settings,
            locks: KeyedLocks::new(),
            pending: PendingSwarms::new(),
            registry: SwarmRegistry::new(),
        }
    }

    /// Provision a controller for a new swarm built from `scenario_id`.
    ///
    /// On success the swarm is `AwaitingReady` and its plan is parked until the
    /// controller announces readiness. Runtime failures are returned as-is and
    /// leave nothing registered. There is no retry.
    ///
    /// Dropping the returned future part way also unregisters the swarm; a
    /// container it already created is removed in the background.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        swarm_id: &str,
        scenario_id: &str,
    ) -> Result<SwarmRecord, CoordinatorError> {
        let swarm_id = validate_swarm_id(swarm_id)?;
        let _guard = self.locks.lock(&swarm_id).await;

        let scenario = self
            .scenarios
            .find(scenario_id)
            .ok_or_else(|| CoordinatorError::ScenarioNotFound(scenario_id.to_string()))?;
        let plan = SwarmPlan::from_scenario(
            &swarm_id,
            &scenario,
            &self.settings.default_controller_image,
        );

        let controller_instance = controller_instance_id(&swarm_id);
        let mut record = SwarmRecord::new(&swarm_id, &scenario.id, &controller_instance);
        record.transition(SwarmState::Provisioning);
        if !self.registry.try_insert(record) {
            return Err(CoordinatorError::AlreadyExists(swarm_id));
        }
        let mut rollback = CreateRollback {
            coordinator: self,
            swarm_id: &swarm_id,
            controller_instance: &controller_instance,
            container: None,
            armed: true,
        };

        let spec = self.container_spec(&plan, &controller_instance);
        info!(
            "[COORDINATOR] Provisioning controller {} for swarm {} (scenario {}, {} bees)",
            controller_instance,
            swarm_id,
            plan.scenario_id,
            plan.bees.len()
        );

        let handle = match self.runtime.create(&spec).await {
            Ok(handle) => handle,
            Err(source) => {
                warn!("[COORDINATOR] Controller create failed for {}: {}", swarm_id, source);
                drop(rollback);
                return Err(CoordinatorError::Provisioning { swarm_id, source });
            }
        };
        rollback.container = Some(handle.clone());

        // Parked before start so a ready event from the fresh controller finds
        // it; the event then waits on this swarm's lock.
        self.pending.insert(
            &controller_instance,
            PendingSwarm {
                swarm_id: swarm_id.clone(),
                plan,
            },
        );
        self.registry.update(&swarm_id, |record| {
            record.container = Some(handle.clone());
            record.transition(SwarmState::AwaitingReady);
        });

        if let Err(source) = self.runtime.start(&handle).await {
            warn!("[COORDINATOR] Controller start failed for {}: {}", swarm_id, source);
            if let Err(e) = self.runtime.remove(&handle).await {
                debug!("[COORDINATOR] Cleanup of {} failed: {}", handle, e);
            }
            rollback.container = None;
            drop(rollback);
            return Err(CoordinatorError::Provisioning { swarm_id, source });
        }
        rollback.disarm();

        info!(
            "[COORDINATOR] Swarm {} awaiting ready from {}",
            swarm_id, controller_instance
        );
        self.registry
            .get(&swarm_id)
            .ok_or(CoordinatorError::NotFound(swarm_id))
    }

    /// Handle a controller readiness announcement.
    ///
    /// Returns `Ok(true)` if this event started the swarm. Unknown or already
    /// consumed handles return `Ok(false)` without side effects. If the start
    /// signal cannot be published the plan stays pending so a redelivered ready
    /// event can retry.
    #[instrument(skip(self))]
    pub async fn on_ready_event(&self, controller_instance: &str) -> Result<bool, CoordinatorError> {
        let Some(swarm_id) = self.pending.swarm_of(controller_instance) else {
            debug!(
                "[COORDINATOR] Ready from unknown or started controller {}",
                controller_instance
            );
            return Ok(false);
        };

        let _guard = self.locks.lock(&swarm_id).await;
        // Re-check under the lock: a concurrent ready or delete may have won
        let Some(pending) = self.pending.get(controller_instance) else {
            return Ok(false);
        };

        self.registry.set_state(&swarm_id, SwarmState::Starting);
        let published = serde_json::to_value(&pending.plan)
            .map_err(|source| BusError::Encode {
                routing_key: signals::SWARM_START.to_string(),
                source,
            })
            .and_then(|payload| {
                let envelope = SignalEnvelope::swarm_wide(signals::SWARM_START, &swarm_id, payload)
                    .with_origin(ORCHESTRATOR_ORIGIN);
                self.bus.publish_signal(&envelope).map(|_| envelope)
            });

        match published {
            Ok(envelope) => {
                self.pending.remove(controller_instance);
                self.registry.set_state(&swarm_id, SwarmState::Running);
                info!(
                    "[COORDINATOR] Swarm {} started (correlation {})",
                    swarm_id, envelope.correlation_id
                );
                Ok(true)
            }
            Err(e) => {
                self.registry.set_state(&swarm_id, SwarmState::AwaitingReady);
                warn!("[COORDINATOR] Failed to send start for {}: {}", swarm_id, e);
                Err(e.into())
            }
        }
    }

    /// Ask a running swarm's controller to halt its timeline.
    #[instrument(skip(self))]
    pub async fn stop(&self, swarm_id: &str) -> Result<SwarmState, CoordinatorError> {
        let swarm_id = swarm_id.trim();
        let _guard = self.locks.lock(swarm_id).await;
        let record = self
            .registry
            .get(swarm_id)
            .ok_or_else(|| CoordinatorError::NotFound(swarm_id.to_string()))?;
        if record.state != SwarmState::Running {
            return Err(CoordinatorError::InvalidState {
                swarm_id: swarm_id.to_string(),
                state: record.state,
            });
        }

        let envelope = SignalEnvelope::swarm_wide(signals::SWARM_STOP, swarm_id, serde_json::Value::Null)
            .with_origin(ORCHESTRATOR_ORIGIN);
        self.bus.publish_signal(&envelope)?;
        self.registry.set_state(swarm_id, SwarmState::Stopping);
        info!("[COORDINATOR] Swarm {} stopping", swarm_id);
        Ok(SwarmState::Stopping)
    }

    /// Tear down a swarm in any state.
    ///
    /// The controller container is stopped and removed (a container that is
    /// already gone is fine), then the pending plan and the registry entry are
    /// dropped. A runtime failure leaves the registry untouched.
    #[instrument(skip(self))]
    pub async fn delete(&self, swarm_id: &str) -> Result<SwarmState, CoordinatorError> {
        let swarm_id = swarm_id.trim();
        let _guard = self.locks.lock(swarm_id).await;
        let record = self
            .registry
            .get(swarm_id)
            .ok_or_else(|| CoordinatorError::NotFound(swarm_id.to_string()))?;

        if let Some(handle) = &record.container {
            let teardown = async {
                tolerate_missing(self.runtime.stop(handle).await)?;
                tolerate_missing(self.runtime.remove(handle).await)
            };
            if let Err(source) = teardown.await {
                warn!("[COORDINATOR] Teardown of {} failed: {}", swarm_id, source);
                return Err(CoordinatorError::Teardown {
                    swarm_id: swarm_id.to_string(),
                    source,
                });
            }
        }

        if self.pending.remove(&record.controller_instance).is_some() {
            debug!(
                "[COORDINATOR] Dropped plan for {} that never saw a ready event",
                swarm_id
            );
        }
        self.registry.remove(swarm_id);

        info!("[COORDINATOR] Swarm {} terminated", swarm_id);
        Ok(SwarmState::Terminated)
    }

    pub fn status(&self, swarm_id: &str) -> Option<SwarmRecord> {
        self.registry.get(swarm_id.trim())
    }

    pub fn list(&self) -> Vec<SwarmRecord> {
        self.registry.list()
    }

    /// Swarm ids with a lock entry; entries go away once released
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Whether a plan is still waiting for `controller_instance` to be ready
    pub fn is_pending(&self, controller_instance: &str) -> bool {
        self.pending.contains(controller_instance)
    }

    fn container_spec(&self, plan: &SwarmPlan, controller_instance: &str) -> ContainerSpec {
        let mut env = BTreeMap::from([
            (env_vars::ROLE.to_string(), "controller".to_string()),
            (env_vars::SWARM_ID.to_string(), plan.id.clone()),
            (env_vars::INSTANCE_ID.to_string(), controller_instance.to_string()),
            (env_vars::SCENARIO_ID.to_string(), plan.scenario_id.clone()),
            (env_vars::BUS_PREFIX.to_string(), self.settings.bus_prefix.clone()),
            (
                env_vars::TICK_INTERVAL_MS.to_string(),
                self.settings.tick_interval_ms.to_string(),
            ),
        ]);
        if let Some(endpoint) = &self.settings.controller_connect {
            env.insert(env_vars::ZENOH_CONNECT.to_string(), endpoint.clone());
        }

        let labels = BTreeMap::from([
            ("swarmhive.swarm".to_string(), plan.id.clone()),
            ("swarmhive.role".to_string(), CONTROLLER_ROLE.to_string()),
            ("swarmhive.instance".to_string(), controller_instance.to_string()),
        ]);

        ContainerSpec {
            instance_id: controller_instance.to_string(),
            image: plan.controller_image.clone(),
            env,
            labels,
        }
    }
}

/// Undoes a partly provisioned swarm unless disarmed. Runs under the swarm lock
/// since it is declared after the guard.
struct CreateRollback<'a> {
    coordinator: &'a SwarmLifecycleCoordinator,
    swarm_id: &'a str,
    controller_instance: &'a str,
    container: Option<ContainerHandle>,
    armed: bool,
}

impl CreateRollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CreateRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.coordinator.pending.remove(self.controller_instance);
        self.coordinator.registry.remove(self.swarm_id);
        debug!("[COORDINATOR] Rolled back provisioning of {}", self.swarm_id);

        let Some(handle) = self.container.take() else {
            return;
        };
        let runtime = self.coordinator.runtime.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(tokio_handle) => {
                tokio_handle.spawn(async move {
                    if let Err(e) = runtime.remove(&handle).await {
                        warn!("[COORDINATOR] Orphaned controller {} not removed: {}", handle, e);
                    }
                });
            }
            Err(_) => warn!("[COORDINATOR] Orphaned controller {} left behind", handle),
        }
    }
}

fn validate_swarm_id(swarm_id: &str) -> Result<String, CoordinatorError> {
    let swarm_id = swarm_id.trim();
    let pattern = SWARM_ID
        .as_ref()
        .map_err(|_| CoordinatorError::InvalidSwarmId(swarm_id.to_string()))?;
    if pattern.is_match(swarm_id) {
        Ok(swarm_id.to_string())
    } else {
        Err(CoordinatorError::InvalidSwarmId(swarm_id.to_string()))
    }
}

fn controller_instance_id(swarm_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", swarm_id, CONTROLLER_ROLE, &suffix[..8])
}

fn tolerate_missing(result: Result<(), RuntimeError>) -> Result<(), RuntimeError> {
    match result {
        Err(RuntimeError::NotFound(_)) => Ok(()),
        other => other,
    }
}
