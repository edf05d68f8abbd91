use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::runtime::ContainerHandle;

/// Lifecycle of one swarm as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwarmState {
    Requested,
    Provisioning,
    AwaitingReady,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl fmt::Display for SwarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwarmState::Requested => "requested",
            SwarmState::Provisioning => "provisioning",
            SwarmState::AwaitingReady => "awaiting-ready",
            SwarmState::Starting => "starting",
            SwarmState::Running => "running",
            SwarmState::Stopping => "stopping",
            SwarmState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Registry entry for a swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmRecord {
    pub swarm_id: String,
    pub scenario_id: String,
    /// Provisioning handle the controller announces readiness under
    pub controller_instance: String,
    /// Set once the runtime created the controller container
    pub container: Option<ContainerHandle>,
    pub state: SwarmState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwarmRecord {
    pub fn new(swarm_id: &str, scenario_id: &str, controller_instance: &str) -> Self {
        let now = Utc::now();
        Self {
            swarm_id: swarm_id.to_string(),
            scenario_id: scenario_id.to_string(),
            controller_instance: controller_instance.to_string(),
            container: None,
            state: SwarmState::Requested,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, state: SwarmState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
