//! Turns (scope, document) into `config-update` signals on the bus.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use swarmhive_shared::address_book::signals;
use swarmhive_shared::{Scope, SignalEnvelope};

use crate::bus::{BusError, ControlPlaneBus};

/// Stateless; clone freely.
#[derive(Clone)]
pub struct ConfigFanout {
    bus: Arc<dyn ControlPlaneBus>,
}

impl ConfigFanout {
    pub fn new(bus: Arc<dyn ControlPlaneBus>) -> Self {
        Self { bus }
    }

    /// Publish `document` unchanged as a `config-update` for `scope`.
    ///
    /// Every call gets fresh correlation, idempotency and message ids.
    pub fn publish_config_update(
        &self,
        scope: &Scope,
        document: Value,
        origin: &str,
    ) -> Result<SignalEnvelope, BusError> {
        let envelope =
            SignalEnvelope::targeted(signals::CONFIG_UPDATE, scope, document).with_origin(origin);
        self.bus.publish_signal(&envelope)?;
        debug!(
            origin,
            correlation_id = %envelope.correlation_id,
            "config-update -> {}",
            envelope.routing_key()
        );
        Ok(envelope)
    }

    /// Switch the workers selected by `scope` on or off.
    pub fn set_enabled(
        &self,
        scope: &Scope,
        enabled: bool,
        origin: &str,
    ) -> Result<SignalEnvelope, BusError> {
        self.publish_config_update(scope, json!({ "enabled": enabled }), origin)
    }
}
