//! Shared types and message definitions for swarmhive.
//!
//! This crate contains the control-plane vocabulary used by the orchestrator,
//! swarm controllers and bees: how participants are addressed, what the
//! messages they exchange look like, and the plan documents that drive a swarm.
//!
//! # Key Components
//!
//! * [`address_book`] - Routing keys (`sig.*` / `ev.*`) and subscription patterns
//! * [`identity`] - Participant [`Identity`] and addressing [`Scope`]
//! * [`envelope`] - [`SignalEnvelope`] commands and [`ConfirmationEnvelope`] reports
//! * [`swarm_plan`] - Scenario templates and the per-swarm [`SwarmPlan`]
//! * [`timeline`] - Timeline plan documents replayed by swarm controllers
//! * [`topics`] - Zenoh key expressions carrying the control plane
//!
//! # Communication Patterns
//!
//! ```text
//! Orchestrator                 Controller                    Bees
//!    │ ── create container ──►    │                            │
//!    │ ◄── ev.ready.swarm-controller                           │
//!    │ ── sig.swarm-start ──────► │                            │
//!    │                            │ ── sig.config-update ────► │
//!    │ ◄─────────────── ev.ready / ev.error ────────────────── │
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zenoh::config::WhatAmI;

pub mod address_book;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod swarm_plan;
pub mod timeline;

pub use address_book::{AddressBook, ParsedKey, RoutingPattern};
pub use envelope::{ConfirmationEnvelope, ConfirmationOutcome, ConfirmationResult, Confirmer, SignalEnvelope};
pub use identity::{Identity, Scope};
pub use swarm_plan::{Bee, BeeTemplate, ScenarioPlan, SwarmPlan, WorkEndpoints};
pub use timeline::{PlanError, StepType, TimelinePlan, TimelineStep};

/// Zenoh key expressions carrying control-plane routing keys
pub mod topics {
    use super::errors::SwarmhiveError;
    use zenoh::key_expr::{
        OwnedKeyExpr,
        format::{kedefine, keformat},
    };

    // A routing key is a single chunk: its segments are `.`-separated.
    kedefine!(
        pub control_plane_keys: "${prefix:*}/cp/${routing_key:*}",
    );

    /// Key expression a routing key is published on
    pub fn control_plane(prefix: &str, routing_key: &str) -> Result<OwnedKeyExpr, SwarmhiveError> {
        keformat!(
            control_plane_keys::formatter(),
            prefix = prefix,
            routing_key = routing_key
        )
        .map_err(|e| SwarmhiveError::InvalidRoutingKey {
            key: routing_key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Wildcard covering every control-plane message under `prefix`
    pub fn control_plane_all(prefix: &str) -> Result<OwnedKeyExpr, SwarmhiveError> {
        control_plane(prefix, "*")
    }

    /// Extract the routing key from a control-plane key expression
    pub fn extract_routing_key(key_expr: &str) -> Option<String> {
        let parts: Vec<&str> = key_expr.split('/').collect();
        if parts.len() == 3 && parts[1] == "cp" {
            Some(parts[2].to_string())
        } else {
            None
        }
    }
}

/// Quality of Service configuration for control-plane traffic
pub mod qos {
    use zenoh::qos::{CongestionControl, Priority};

    /// Control messages must not be dropped under congestion
    pub const CONTROL_PLANE_CONGESTION: CongestionControl = CongestionControl::Block;

    /// Control messages jump ahead of bulk data
    pub const CONTROL_PLANE_PRIORITY: Priority = Priority::InteractiveHigh;
}

/// Zenoh session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZenohConfig {
    /// Session mode (Peer or Client)
    pub mode: ZenohMode,
    /// Connection endpoints, prefixed with `connect/` or `listen/`
    pub endpoints: Vec<String>,
    /// Additional zenoh configuration properties
    pub properties: HashMap<String, String>,
}

/// Zenoh session modes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ZenohMode {
    /// Peer mode - can connect to and be connected from other nodes
    Peer,
    /// Client mode - only connects to other nodes, cannot accept connections
    Client,
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self::new_peer()
    }
}

impl ZenohConfig {
    /// Create a new peer mode configuration
    pub fn new_peer() -> Self {
        Self {
            mode: ZenohMode::Peer,
            endpoints: vec![],
            properties: HashMap::new(),
        }
    }

    /// Create a new client mode configuration
    pub fn new_client() -> Self {
        Self {
            mode: ZenohMode::Client,
            endpoints: vec![],
            properties: HashMap::new(),
        }
    }

    /// Disable multicast scouting discovery
    pub fn disable_multicast_scouting(mut self) -> Self {
        self.properties.insert(
            "scouting/multicast/enabled".to_string(),
            "false".to_string(),
        );
        self
    }

    /// Add a listen endpoint (for peer mode)
    pub fn add_listen_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("listen/{}", endpoint));
        self
    }

    /// Add a connect endpoint (for both peer and client modes)
    pub fn add_connect_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoints.push(format!("connect/{}", endpoint));
        self
    }

    /// Connect endpoints without their `connect/` prefix, comma-joined.
    ///
    /// Handed to controller containers so they join the same bus.
    pub fn connect_endpoints(&self) -> Vec<&str> {
        self.endpoints
            .iter()
            .filter_map(|e| e.strip_prefix("connect/"))
            .collect()
    }

    /// Validate mode/endpoint compatibility and endpoint syntax
    pub fn validate(&self) -> errors::ZenohConfigResult<()> {
        use errors::ZenohConfigError;

        if matches!(self.mode, ZenohMode::Client)
            && self.endpoints.iter().any(|e| e.starts_with("listen/"))
        {
            return Err(ZenohConfigError::client_cannot_listen());
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint) {
                return Err(ZenohConfigError::ValidationError {
                    message: format!("Duplicate endpoint found: '{}'.", endpoint),
                });
            }

            let address = endpoint
                .strip_prefix("connect/")
                .or_else(|| endpoint.strip_prefix("listen/"))
                .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;

            let (protocol, socket) = address
                .split_once('/')
                .ok_or_else(|| ZenohConfigError::unsupported_endpoint_format(endpoint))?;
            if !matches!(protocol, "tcp" | "udp" | "tls" | "quic") {
                return Err(ZenohConfigError::InvalidProtocol {
                    protocol: protocol.to_string(),
                    endpoint: endpoint.to_string(),
                });
            }
            if socket.rsplit_once(':').is_none() {
                return Err(ZenohConfigError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: "missing ':<port>'".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Convert to zenoh::Config
    pub fn to_zenoh_config(&self) -> errors::ZenohConfigResult<zenoh::Config> {
        use errors::ZenohConfigError;

        self.validate()?;

        let mut config = zenoh::Config::default();

        let mode = match self.mode {
            ZenohMode::Peer => WhatAmI::Peer,
            ZenohMode::Client => WhatAmI::Client,
        };
        config
            .set_mode(Some(mode))
            .map_err(|e| ZenohConfigError::ZenohConfigCreationError {
                reason: format!("Failed to set mode: {:?}", e),
            })?;

        for (section, prefix) in [("connect/endpoints", "connect/"), ("listen/endpoints", "listen/")] {
            let endpoints: Vec<String> = self
                .endpoints
                .iter()
                .filter_map(|e| e.strip_prefix(prefix))
                .map(|e| format!("\"{}\"", e))
                .collect();
            if endpoints.is_empty() {
                continue;
            }
            config
                .insert_json5(section, &format!("[{}]", endpoints.join(",")))
                .map_err(|e| ZenohConfigError::ZenohConfigCreationError {
                    reason: format!("Failed to set {}: {}", section, e),
                })?;
        }

        for (key, value) in &self.properties {
            // Booleans and numbers go in bare, everything else quoted
            let json_value = if value == "true" || value == "false" || value.parse::<f64>().is_ok() {
                value.to_string()
            } else {
                format!("\"{}\"", value)
            };
            config
                .insert_json5(key, &json_value)
                .map_err(|e| ZenohConfigError::ZenohConfigCreationError {
                    reason: format!("Failed to set '{}': {}", key, e),
                })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_plane_topic_keeps_routing_key_in_one_chunk() {
        let key = topics::control_plane("swarmhive", "sig.config-update.sw1.ALL.ALL").unwrap();
        assert_eq!(key.as_str(), "swarmhive/cp/sig.config-update.sw1.ALL.ALL");
        assert_eq!(
            topics::extract_routing_key(key.as_str()).as_deref(),
            Some("sig.config-update.sw1.ALL.ALL")
        );
    }

    #[test]
    fn test_control_plane_wildcard() {
        let key = topics::control_plane_all("swarmhive").unwrap();
        assert_eq!(key.as_str(), "swarmhive/cp/*");
    }

    #[test]
    fn test_zenoh_config_validation() {
        let ok = ZenohConfig::new_peer()
            .add_listen_endpoint("tcp/127.0.0.1:7447")
            .add_connect_endpoint("tcp/10.0.0.2:7447");
        assert!(ok.validate().is_ok());
        assert_eq!(ok.connect_endpoints(), vec!["tcp/10.0.0.2:7447"]);

        let client = ZenohConfig::new_client().add_listen_endpoint("tcp/0.0.0.0:7447");
        assert!(client.validate().is_err());

        let bad_proto = ZenohConfig::new_peer().add_connect_endpoint("ftp/10.0.0.2:21");
        assert!(bad_proto.validate().is_err());

        let dup = ZenohConfig::new_peer()
            .add_connect_endpoint("tcp/10.0.0.2:7447")
            .add_connect_endpoint("tcp/10.0.0.2:7447");
        assert!(dup.validate().is_err());
    }
}
