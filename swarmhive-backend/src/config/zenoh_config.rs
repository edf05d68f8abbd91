//! Zenoh configuration management for the swarmhive backend.
//!
//! This module handles Zenoh-specific configuration including endpoint parsing,
//! session mode configuration, and validation of Zenoh connectivity settings.

use anyhow::Result;
use swarmhive_shared::errors::ZenohConfigError;
use swarmhive_shared::{ZenohConfig, ZenohMode};

use super::app_config::ServiceRole;
use super::cli::CliConfig;

/// Port the orchestrator listens on when running as a peer
pub const DEFAULT_ORCHESTRATOR_LISTEN: &str = "tcp/0.0.0.0:7447";

/// Zenoh configuration manager
pub struct ZenohConfigManager;

impl ZenohConfigManager {
    /// Create Zenoh configuration from CLI config
    pub fn from_cli(cli_config: &CliConfig) -> Result<ZenohConfig> {
        let mut zenoh_config = match cli_config.zenoh_mode.to_lowercase().as_str() {
            "peer" => ZenohConfig::new_peer(),
            "client" => ZenohConfig::new_client(),
            _ => {
                tracing::error!("Invalid zenoh mode: {}, using peer", cli_config.zenoh_mode);
                ZenohConfig::new_peer()
            }
        };

        // The orchestrator listens on a fixed port so controllers can reach it.
        // Client mode cannot have listen endpoints.
        let role: ServiceRole = cli_config.role.parse()?;
        if role == ServiceRole::Orchestrator
            && matches!(zenoh_config.mode, ZenohMode::Peer)
            && cli_config.zenoh_listen.is_none()
        {
            zenoh_config = zenoh_config.add_listen_endpoint(DEFAULT_ORCHESTRATOR_LISTEN);
        }

        if let Some(connect_endpoints) = &cli_config.zenoh_connect {
            for endpoint in split_endpoints(connect_endpoints) {
                zenoh_config = zenoh_config.add_connect_endpoint(endpoint);
            }
        }

        if let Some(listen_endpoints) = &cli_config.zenoh_listen {
            for endpoint in split_endpoints(listen_endpoints) {
                zenoh_config = zenoh_config.add_listen_endpoint(endpoint);
            }
        }

        if cli_config.no_multicast {
            zenoh_config = zenoh_config.disable_multicast_scouting();
        }

        Ok(zenoh_config)
    }

    /// Validate and handle zenoh configuration errors with detailed reporting
    pub fn validate_and_report(zenoh_config: &ZenohConfig) -> Result<()> {
        if let Err(e) = zenoh_config.validate() {
            let error_message = match e {
                ZenohConfigError::InvalidEndpoint { endpoint, reason } => {
                    format!("Invalid endpoint '{}' - {}", endpoint, reason)
                }
                ZenohConfigError::InvalidProtocol { protocol, endpoint } => {
                    format!(
                        "Unsupported protocol '{}' in endpoint '{}'. Supported: tcp, udp, tls, quic",
                        protocol, endpoint
                    )
                }
                ZenohConfigError::ModeEndpointMismatch { mode, reason } => {
                    format!("{:?} mode {}", mode, reason)
                }
                _ => format!("Invalid zenoh configuration: {}", e),
            };

            tracing::error!("{}", error_message);
            return Err(anyhow::anyhow!(
                "Zenoh configuration validation failed: {}",
                error_message
            ));
        }

        Ok(())
    }

    /// Endpoints a provisioned controller should connect to, comma-joined.
    pub fn controller_connect(zenoh_config: &ZenohConfig) -> Option<String> {
        let endpoints = zenoh_config.connect_endpoints();
        if endpoints.is_empty() {
            None
        } else {
            Some(endpoints.join(","))
        }
    }
}

fn split_endpoints(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliConfig {
        let matches = CliConfig::build_cli().try_get_matches_from(args).unwrap();
        CliConfig::from_matches(&matches).unwrap()
    }

    #[test]
    fn test_orchestrator_peer_listens_by_default() {
        let config = ZenohConfigManager::from_cli(&cli(&["swarmhive"])).unwrap();
        assert_eq!(config.mode, ZenohMode::Peer);
        assert!(
            config
                .endpoints
                .contains(&format!("listen/{}", DEFAULT_ORCHESTRATOR_LISTEN))
        );
        assert!(ZenohConfigManager::validate_and_report(&config).is_ok());
    }

    #[test]
    fn test_controller_does_not_listen() {
        let config = ZenohConfigManager::from_cli(&cli(&[
            "swarmhive",
            "--role",
            "controller",
            "--zenoh-connect",
            "tcp/10.0.0.1:7447, tcp/10.0.0.2:7447",
        ]))
        .unwrap();
        assert!(config.endpoints.iter().all(|e| e.starts_with("connect/")));
        assert_eq!(
            ZenohConfigManager::controller_connect(&config).as_deref(),
            Some("tcp/10.0.0.1:7447,tcp/10.0.0.2:7447")
        );
    }

    #[test]
    fn test_client_mode_with_listen_is_reported() {
        let config = ZenohConfigManager::from_cli(&cli(&[
            "swarmhive",
            "--zenoh-mode",
            "client",
            "--zenoh-listen",
            "tcp/0.0.0.0:7447",
        ]))
        .unwrap();
        assert!(ZenohConfigManager::validate_and_report(&config).is_err());
    }

    #[test]
    fn test_no_multicast_sets_property() {
        let config =
            ZenohConfigManager::from_cli(&cli(&["swarmhive", "--no-multicast"])).unwrap();
        assert_eq!(
            config
                .properties
                .get("scouting/multicast/enabled")
                .map(String::as_str),
            Some("false")
        );
    }
}
