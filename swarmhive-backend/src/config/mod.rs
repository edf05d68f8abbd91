//! Configuration for both services.
//!
//! Flags come from the command line; the ones a provisioned controller needs
//! can also arrive through `SWARMHIVE_*` environment variables.

pub mod app_config;
pub mod cli;
pub mod zenoh_config;

pub use app_config::{AppConfig, AppConfigBuilder, LogLevel, ServiceRole};
pub use cli::CliConfig;
pub use zenoh_config::ZenohConfigManager;

use anyhow::Result;
use swarmhive_shared::ZenohConfig;

/// Environment variables a provisioned controller reads its identity from
pub mod env_vars {
    pub const ROLE: &str = "SWARMHIVE_ROLE";
    pub const SWARM_ID: &str = "SWARMHIVE_SWARM_ID";
    pub const INSTANCE_ID: &str = "SWARMHIVE_INSTANCE_ID";
    pub const SCENARIO_ID: &str = "SWARMHIVE_SCENARIO_ID";
    pub const BUS_PREFIX: &str = "SWARMHIVE_BUS_PREFIX";
    pub const ZENOH_CONNECT: &str = "SWARMHIVE_ZENOH_CONNECT";
    pub const TICK_INTERVAL_MS: &str = "SWARMHIVE_TICK_INTERVAL_MS";
}

/// Main configuration manager that combines all configuration sources
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub app: AppConfig,
    pub zenoh: ZenohConfig,
    pub swarm_requests: Vec<(String, String)>,
}

impl ConfigManager {
    /// Creates a new configuration manager from CLI arguments and environment
    pub fn from_cli_and_env() -> Result<Self> {
        let cli_config = CliConfig::from_args()?;
        Self::from_cli(&cli_config)
    }

    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        cli_config.validate()?;
        Ok(Self {
            app: AppConfig::from_cli(cli_config)?,
            zenoh: ZenohConfigManager::from_cli(cli_config)?,
            swarm_requests: cli_config.swarm_requests()?,
        })
    }

    /// Validates the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;
        self.zenoh
            .validate()
            .map_err(|e| anyhow::anyhow!("Zenoh configuration error: {}", e))?;
        if self.app.role == ServiceRole::Controller && !self.swarm_requests.is_empty() {
            return Err(anyhow::anyhow!("--swarm is only valid for the orchestrator"));
        }
        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        self.app.init_logging()
    }
}
