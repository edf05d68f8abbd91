//! Process-level settings: which service runs, how it logs, and its timings.

use anyhow::{Result, anyhow};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use super::cli::CliConfig;

/// Crates that are too chatty below `warn`
const NOISY_CRATES: &str = "zenoh=warn,zenoh_transport=warn,zenoh_runtime=warn,zenoh_protocol=warn,bollard=warn,hyper=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Default level of a `RUST_LOG` style directive list such as
    /// `debug,zenoh=warn`. Anything unrecognised counts as `info`.
    pub fn from_directive(directive: &str) -> Self {
        let head = directive.split(',').next().unwrap_or_default();
        if head.contains('=') {
            return LogLevel::Info;
        }
        match head.trim().to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Which service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Orchestrator,
    Controller,
}

impl FromStr for ServiceRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "orchestrator" => Ok(ServiceRole::Orchestrator),
            "controller" | "swarm-controller" => Ok(ServiceRole::Controller),
            other => Err(anyhow!("unknown service role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub role: ServiceRole,
    pub name: String,
    pub log_level: LogLevel,
    pub bus_prefix: String,
    pub controller_image: String,
    pub tick_interval_ms: u64,
    pub confirmation_retention_secs: u64,
    pub scenario_dirs: Vec<String>,
    pub no_default_scenarios: bool,
}

impl AppConfig {
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        let log_level = if cli_config.verbose {
            LogLevel::Debug
        } else {
            env::var("RUST_LOG")
                .map(|directive| LogLevel::from_directive(&directive))
                .unwrap_or(LogLevel::Info)
        };

        Ok(Self {
            role: cli_config.role.parse()?,
            name: cli_config.name.clone(),
            log_level,
            bus_prefix: cli_config.bus_prefix.clone(),
            controller_image: cli_config.controller_image.clone(),
            tick_interval_ms: cli_config.tick_interval_ms,
            confirmation_retention_secs: cli_config.confirmation_retention_secs,
            scenario_dirs: cli_config.scenario_dirs.clone(),
            no_default_scenarios: cli_config.no_default_scenarios,
        })
    }

    /// Filter directive handed to the subscriber
    fn log_filter(&self) -> String {
        let base = match env::var("RUST_LOG") {
            Ok(directive) if !directive.is_empty() && self.log_level < LogLevel::Debug => directive,
            _ => self.log_level.as_str().to_string(),
        };
        format!("{},{}", base, NOISY_CRATES)
    }

    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.log_filter())
            .map_err(|e| anyhow!("bad log filter: {}", e))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(true)
            .compact()
            .try_init()
            .map_err(|e| anyhow!("logging already initialised: {}", e))?;

        tracing::debug!("[CONFIG] Logging at {}", self.log_level.as_str());
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn confirmation_retention(&self) -> Duration {
        Duration::from_secs(self.confirmation_retention_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow!("Instance name cannot be empty"));
        }

        if self.bus_prefix.is_empty() || self.bus_prefix.contains(['/', '*', '$', '#', '?']) {
            return Err(anyhow!(
                "Bus prefix '{}' must be a single non-empty key chunk",
                self.bus_prefix
            ));
        }

        if self.controller_image.trim().is_empty() {
            return Err(anyhow!("Controller image cannot be empty"));
        }

        if self.tick_interval_ms == 0 {
            return Err(anyhow!("Tick interval must be greater than 0"));
        }

        if self.confirmation_retention_secs == 0 {
            return Err(anyhow!(
                "Confirmation retention must be greater than 0"
            ));
        }

        Ok(())
    }
}

/// Builds an [`AppConfig`] without going through the command line
pub struct AppConfigBuilder {
    role: Option<ServiceRole>,
    name: Option<String>,
    log_level: Option<LogLevel>,
    bus_prefix: Option<String>,
    controller_image: Option<String>,
    tick_interval_ms: Option<u64>,
    confirmation_retention_secs: Option<u64>,
    scenario_dirs: Option<Vec<String>>,
    no_default_scenarios: Option<bool>,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self {
            role: None,
            name: None,
            log_level: None,
            bus_prefix: None,
            controller_image: None,
            tick_interval_ms: None,
            confirmation_retention_secs: None,
            scenario_dirs: None,
            no_default_scenarios: None,
        }
    }

    pub fn role(mut self, role: ServiceRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn bus_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.bus_prefix = Some(prefix.into());
        self
    }

    pub fn controller_image<S: Into<String>>(mut self, image: S) -> Self {
        self.controller_image = Some(image.into());
        self
    }

    pub fn tick_interval_ms(mut self, millis: u64) -> Self {
        self.tick_interval_ms = Some(millis);
        self
    }

    pub fn confirmation_retention_secs(mut self, secs: u64) -> Self {
        self.confirmation_retention_secs = Some(secs);
        self
    }

    pub fn scenario_dirs(mut self, dirs: Vec<String>) -> Self {
        self.scenario_dirs = Some(dirs);
        self
    }

    pub fn no_default_scenarios(mut self, no_defaults: bool) -> Self {
        self.no_default_scenarios = Some(no_defaults);
        self
    }

    pub fn build(self) -> Result<AppConfig> {
        let config = AppConfig {
            role: self.role.unwrap_or(ServiceRole::Orchestrator),
            name: self
                .name
                .ok_or_else(|| anyhow!("Instance name is required"))?,
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            bus_prefix: self.bus_prefix.unwrap_or_else(|| "swarmhive".to_string()),
            controller_image: self
                .controller_image
                .unwrap_or_else(|| "swarmhive/controller:latest".to_string()),
            tick_interval_ms: self.tick_interval_ms.unwrap_or(250),
            confirmation_retention_secs: self.confirmation_retention_secs.unwrap_or(600),
            scenario_dirs: self.scenario_dirs.unwrap_or_default(),
            no_default_scenarios: self.no_default_scenarios.unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_of_a_directive() {
        assert_eq!(LogLevel::from_directive("warn"), LogLevel::Warn);
        assert_eq!(LogLevel::from_directive("TRACE"), LogLevel::Trace);
        assert_eq!(LogLevel::from_directive("nonsense"), LogLevel::Info);
        assert_eq!(
            LogLevel::from_directive("debug,zenoh_transport=warn"),
            LogLevel::Debug
        );
        assert_eq!(
            LogLevel::from_directive("swarmhive_backend=trace"),
            LogLevel::Info
        );
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(
            "orchestrator".parse::<ServiceRole>().unwrap(),
            ServiceRole::Orchestrator
        );
        assert_eq!(
            " Controller ".parse::<ServiceRole>().unwrap(),
            ServiceRole::Controller
        );
        assert!("bee".parse::<ServiceRole>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = AppConfigBuilder::new().name("hive").build().unwrap();
        assert_eq!(config.role, ServiceRole::Orchestrator);
        assert_eq!(config.bus_prefix, "swarmhive");
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.confirmation_retention(), Duration::from_secs(600));
    }

    #[test]
    fn test_builder_requires_name() {
        assert!(AppConfigBuilder::new().build().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(
            AppConfigBuilder::new()
                .name("hive")
                .tick_interval_ms(0)
                .build()
                .is_err()
        );
        assert!(
            AppConfigBuilder::new()
                .name("hive")
                .bus_prefix("a/b")
                .build()
                .is_err()
        );
        assert!(
            AppConfigBuilder::new()
                .name("hive")
                .controller_image("  ")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_verbose_filter_pins_noisy_crates() {
        let config = AppConfigBuilder::new()
            .name("hive")
            .log_level(LogLevel::Debug)
            .build()
            .unwrap();
        let filter = config.log_filter();
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("zenoh_transport=warn"));
    }
}
