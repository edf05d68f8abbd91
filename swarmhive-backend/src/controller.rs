//! Swarm controller service.
//!
//! Runs inside the container the orchestrator provisions for a swarm. It
//! announces readiness until the orchestrator sends `swarm-start`, then replays
//! the plan's timeline against the swarm and confirms every signal it handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use swarmhive_shared::address_book::{CONTROLLER_ROLE, signals};
use swarmhive_shared::{ConfirmationEnvelope, Confirmer, Identity, SignalEnvelope, SwarmPlan};

use crate::bus::{BusError, ControlPlaneBus};
use crate::config::env_vars;
use crate::fanout::ConfigFanout;
use crate::scenario::{ScenarioTimeline, SwarmView, TimelineDriver, TracingObserver};

/// How often readiness is re-announced until the swarm starts
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Error code sent back when a start signal carries an unusable plan
pub const INVALID_PLAN: &str = "invalid-plan";

/// Who this controller is, as provisioned by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub swarm_id: String,
    pub instance_id: String,
}

impl ControllerIdentity {
    pub fn new(swarm_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            swarm_id: swarm_id.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Read the identity the orchestrator put in the container environment
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| -> Result<String> {
            let value = std::env::var(name)
                .with_context(|| format!("{} must be set for a controller", name))?;
            swarmhive_shared::identity::normalize(Some(value))
                .with_context(|| format!("{} must not be blank", name))
        };
        Ok(Self::new(read(env_vars::SWARM_ID)?, read(env_vars::INSTANCE_ID)?))
    }

    pub fn identity(&self) -> Identity {
        Identity::member(&self.swarm_id, CONTROLLER_ROLE, &self.instance_id)
    }

    fn confirmer(&self) -> Confirmer<'_> {
        Confirmer {
            swarm_id: &self.swarm_id,
            role: CONTROLLER_ROLE,
            instance: &self.instance_id,
        }
    }
}

pub struct ControllerService {
    me: ControllerIdentity,
    identity: Identity,
    bus: Arc<dyn ControlPlaneBus>,
    fanout: ConfigFanout,
    tick_interval: Duration,
    announce_interval: Duration,
    driver: Option<TimelineDriver>,
    /// Idempotency key of every applied start, with the state it confirmed
    applied_starts: HashMap<String, Value>,
}

impl ControllerService {
    pub fn new(me: ControllerIdentity, bus: Arc<dyn ControlPlaneBus>, tick_interval: Duration) -> Self {
        Self {
            identity: me.identity(),
            me,
            fanout: ConfigFanout::new(bus.clone()),
            bus,
            tick_interval,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            driver: None,
            applied_starts: HashMap::new(),
        }
    }

    pub fn with_announce_interval(mut self, announce_interval: Duration) -> Self {
        self.announce_interval = announce_interval;
        self
    }

    /// Whether a timeline driver is currently ticking
    pub fn is_running(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }

    /// Whether any start has been applied. Readiness is no longer announced after that.
    pub fn has_started(&self) -> bool {
        !self.applied_starts.is_empty()
    }

    /// Publish the readiness announcement the orchestrator waits for
    pub fn announce_ready(&self) -> Result<(), BusError> {
        let announcement = ConfirmationEnvelope::announce(
            signals::SWARM_CONTROLLER,
            &self.me.confirmer(),
            Some(json!({ "status": "ready" })),
        );
        self.bus.publish_event(&announcement)?;
        debug!("[CONTROLLER] Ready announced on {}", announcement.routing_key());
        Ok(())
    }

    /// Consume signals until the bus subscription closes.
    #[instrument(skip(self), fields(swarm_id = %self.me.swarm_id, instance = %self.me.instance_id))]
    pub async fn run(mut self) -> Result<()> {
        let mut signals = self
            .bus
            .subscribe("sig.#")
            .await
            .context("Failed to subscribe to control-plane signals")?;
        info!(
            "[CONTROLLER] {} listening for signals of swarm {}",
            self.me.instance_id, self.me.swarm_id
        );

        let mut announce = interval(self.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = announce.tick(), if !self.has_started() => {
                    if let Err(e) = self.announce_ready() {
                        warn!("[CONTROLLER] Failed to announce readiness: {}", e);
                    }
                }
                message = signals.recv() => {
                    let Some(message) = message else {
                        info!("[CONTROLLER] Signal subscription closed");
                        break;
                    };
                    match message.decode::<SignalEnvelope>() {
                        Ok(signal) => self.handle_signal(&signal).await,
                        Err(e) => warn!("[CONTROLLER] Dropping undecodable signal: {}", e),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Handle one signal and publish its confirmation, if it is ours.
    pub async fn handle_signal(&mut self, signal: &SignalEnvelope) {
        if !self.identity.matches(&signal.scope()) {
            return;
        }

        let confirmation = match signal.signal.as_str() {
            signals::SWARM_START => self.on_start(signal),
            signals::SWARM_STOP => self.on_stop(signal).await,
            other => {
                debug!("[CONTROLLER] Ignoring signal {}", other);
                return;
            }
        };

        if let Err(e) = self.bus.publish_event(&confirmation) {
            error!(
                "[CONTROLLER] Failed to confirm {} ({}): {}",
                signal.signal, signal.correlation_id, e
            );
        }
    }

    fn on_start(&mut self, signal: &SignalEnvelope) -> ConfirmationEnvelope {
        let by = self.me.confirmer();
        if let Some(state) = self.applied_starts.get(&signal.idempotency_key) {
            debug!(
                "[CONTROLLER] Start {} already applied, replaying its confirmation",
                signal.idempotency_key
            );
            return ConfirmationEnvelope::success(
                signal,
                &by,
                Some(state.clone()),
                Some("already started".to_string()),
            );
        }
        if self.is_running() {
            return ConfirmationEnvelope::success(
                signal,
                &by,
                None,
                Some("already running".to_string()),
            );
        }

        let plan: SwarmPlan = match serde_json::from_value(signal.payload.clone()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("[CONTROLLER] Start carried an unreadable swarm plan: {}", e);
                return ConfirmationEnvelope::error(signal, &by, INVALID_PLAN, e.to_string());
            }
        };
        if plan.id != self.me.swarm_id {
            return ConfirmationEnvelope::error(
                signal,
                &by,
                INVALID_PLAN,
                format!("plan is for swarm '{}'", plan.id),
            );
        }

        let observer = Arc::new(TracingObserver::new(self.me.swarm_id.clone()));
        let mut timeline = ScenarioTimeline::with_fanout(self.fanout.clone(), observer);
        let document = plan.timeline.clone().unwrap_or_else(|| json!({}));
        let summary = match timeline.apply_plan(&document) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("[CONTROLLER] Rejected timeline for {}: {}", self.me.swarm_id, e);
                return ConfirmationEnvelope::error(signal, &by, INVALID_PLAN, e.to_string());
            }
        };

        self.driver = Some(TimelineDriver::spawn(
            timeline,
            SwarmView::new(self.me.swarm_id.clone()),
            self.tick_interval,
        ));
        info!(
            "[CONTROLLER] Swarm {} started: {} bees, {} timeline steps",
            self.me.swarm_id,
            plan.bees.len(),
            summary.total_steps
        );

        let state = json!({
            "bees": plan.bees.len(),
            "steps": summary.total_steps,
            "loop": summary.looping,
        });
        self.applied_starts
            .insert(signal.idempotency_key.clone(), state.clone());
        ConfirmationEnvelope::success(signal, &by, Some(state), None)
    }

    async fn on_stop(&mut self, signal: &SignalEnvelope) -> ConfirmationEnvelope {
        let notes = match self.driver.take() {
            Some(driver) => {
                let status = driver.stop().await;
                info!("[CONTROLLER] Swarm {} stopped ({:?})", self.me.swarm_id, status);
                None
            }
            None => Some("not running".to_string()),
        };
        ConfirmationEnvelope::success(
            signal,
            &self.me.confirmer(),
            Some(Value::from("stopped")),
            notes,
        )
    }

    async fn shutdown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use swarmhive_shared::{ConfirmationOutcome, ConfirmationResult, Scope};

    fn controller(bus: &InMemoryBus) -> ControllerService {
        ControllerService::new(
            ControllerIdentity::new("sw1", "sw1-ctrl"),
            Arc::new(bus.clone()),
            Duration::from_millis(10),
        )
    }

    fn start_signal(plan: &SwarmPlan) -> SignalEnvelope {
        SignalEnvelope::swarm_wide(
            signals::SWARM_START,
            &plan.id,
            serde_json::to_value(plan).unwrap(),
        )
    }

    fn plan(swarm_id: &str) -> SwarmPlan {
        SwarmPlan {
            id: swarm_id.to_string(),
            scenario_id: "basic".to_string(),
            controller_image: "ctrl:1".to_string(),
            bees: vec![],
            timeline: Some(json!({"swarm": [{"stepId": "late", "time": "PT1H", "type": "start"}]})),
        }
    }

    #[tokio::test]
    async fn test_announce_routing_key() {
        let bus = InMemoryBus::new();
        let mut events = bus.subscribe("ev.ready.swarm-controller.#").await.unwrap();
        controller(&bus).announce_ready().unwrap();

        let message = events.recv().await.unwrap();
        assert_eq!(
            message.routing_key,
            "ev.ready.swarm-controller.sw1.swarm-controller.sw1-ctrl"
        );
        let announcement: ConfirmationEnvelope = message.decode().unwrap();
        assert_eq!(announcement.instance, "sw1-ctrl");
    }

    #[tokio::test]
    async fn test_start_confirms_with_same_correlation() {
        let bus = InMemoryBus::new();
        let mut events = bus.subscribe("ev.#").await.unwrap();
        let mut controller = controller(&bus);
        let signal = start_signal(&plan("sw1"));

        controller.handle_signal(&signal).await;
        assert!(controller.is_running());

        let confirmation: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        assert_eq!(confirmation.result(), ConfirmationResult::Success);
        assert_eq!(confirmation.correlation_id, signal.correlation_id);
        assert_eq!(
            confirmation.idempotency_key.as_deref(),
            Some(signal.idempotency_key.as_str())
        );

        // Redelivery does not start a second timeline
        controller.handle_signal(&signal.resend()).await;
        let again: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        assert!(matches!(
            again.outcome(),
            ConfirmationOutcome::Success { notes: Some(n), .. } if n == "already started"
        ));

        // A different start while the timeline runs is refused as well
        controller.handle_signal(&start_signal(&plan("sw1"))).await;
        let other: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        assert!(matches!(
            other.outcome(),
            ConfirmationOutcome::Success { notes: Some(n), .. } if n == "already running"
        ));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_timeline_is_reported() {
        let bus = InMemoryBus::new();
        let mut events = bus.subscribe("ev.error.#").await.unwrap();
        let mut controller = controller(&bus);
        let mut bad = plan("sw1");
        bad.timeline = Some(json!({"swarm": [{"time": "PT0S", "type": "explode"}]}));

        controller.handle_signal(&start_signal(&bad)).await;
        assert!(!controller.is_running());

        let confirmation: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        assert!(matches!(
            confirmation.outcome(),
            ConfirmationOutcome::Error { code: Some(c), .. } if c == INVALID_PLAN
        ));
    }

    #[tokio::test]
    async fn test_signals_for_other_swarms_are_ignored() {
        let bus = InMemoryBus::new();
        let mut events = bus.subscribe("ev.#").await.unwrap();
        let mut controller = controller(&bus);

        controller.handle_signal(&start_signal(&plan("sw2"))).await;
        let stop = SignalEnvelope::targeted(
            signals::SWARM_STOP,
            &Scope::instance("sw1", "generator", "gen-1"),
            Value::Null,
        );
        controller.handle_signal(&stop).await;

        assert!(!controller.is_running());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_halts_driver() {
        let bus = InMemoryBus::new();
        let mut events = bus.subscribe("ev.#").await.unwrap();
        let mut controller = controller(&bus);
        controller.handle_signal(&start_signal(&plan("sw1"))).await;
        events.recv().await.unwrap();

        let stop = SignalEnvelope::swarm_wide(signals::SWARM_STOP, "sw1", Value::Null);
        controller.handle_signal(&stop).await;
        assert!(!controller.is_running());

        let confirmation: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        assert_eq!(confirmation.signal, signals::SWARM_STOP);
        assert_eq!(confirmation.result(), ConfirmationResult::Success);
    }

    fn immediate_plan() -> SwarmPlan {
        let mut plan = plan("sw1");
        plan.timeline = Some(json!({"swarm": [{"stepId": "go", "time": "PT0S", "type": "start"}]}));
        plan
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn drain_config_updates(signals: &mut crate::bus::BusSubscription) -> usize {
        let mut count = 0;
        while signals.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_redelivered_start_after_completion_replays_nothing() {
        let bus = InMemoryBus::new();
        let mut updates = bus.subscribe("sig.config-update.#").await.unwrap();
        let mut events = bus.subscribe("ev.#").await.unwrap();
        let mut controller = controller(&bus);
        let signal = start_signal(&immediate_plan());

        controller.handle_signal(&signal).await;
        settle().await;
        assert!(!controller.is_running());
        assert_eq!(drain_config_updates(&mut updates), 1);
        let first: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();

        controller.handle_signal(&signal.resend()).await;
        settle().await;
        assert_eq!(drain_config_updates(&mut updates), 0);

        let again: ConfirmationEnvelope = events.recv().await.unwrap().decode().unwrap();
        match (first.outcome(), again.outcome()) {
            (
                ConfirmationOutcome::Success { state: first_state, .. },
                ConfirmationOutcome::Success { state, notes },
            ) => {
                assert_eq!(state, first_state);
                assert_eq!(notes.as_deref(), Some("already started"));
            }
            other => panic!("unexpected outcomes {:?}", other),
        }
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_redelivered_start_after_stop_does_not_restart() {
        let bus = InMemoryBus::new();
        let mut updates = bus.subscribe("sig.config-update.#").await.unwrap();
        let mut controller = controller(&bus);
        let signal = start_signal(&plan("sw1"));

        controller.handle_signal(&signal).await;
        let stop = SignalEnvelope::swarm_wide(signals::SWARM_STOP, "sw1", Value::Null);
        controller.handle_signal(&stop).await;
        assert!(!controller.is_running());

        controller.handle_signal(&signal.resend()).await;
        assert!(!controller.is_running());
        assert!(controller.has_started());
        settle().await;
        assert_eq!(drain_config_updates(&mut updates), 0);
    }
}
