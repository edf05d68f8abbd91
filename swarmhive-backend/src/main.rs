use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use swarmhive_backend::bus::{ControlPlaneBus, ZenohBus};
use swarmhive_backend::config::{self, ConfigManager, ServiceRole};
use swarmhive_backend::confirmation::ConfirmationTracker;
use swarmhive_backend::controller::{ControllerIdentity, ControllerService};
use swarmhive_backend::coordinator::{CoordinatorSettings, SwarmLifecycleCoordinator};
use swarmhive_backend::orchestrator::OrchestratorService;
use swarmhive_backend::runtime::DockerRuntime;
use swarmhive_backend::scenario::{InMemoryScenarios, ScenarioLoader};
use swarmhive_shared::errors::SwarmhiveError;

async fn open_bus(config_manager: &ConfigManager) -> Result<Arc<dyn ControlPlaneBus>> {
    let zenoh_config = config_manager
        .zenoh
        .to_zenoh_config()
        .map_err(|e| SwarmhiveError::Session {
            message: format!("Zenoh configuration error: {}", e),
        })?;
    let session = zenoh::open(zenoh_config)
        .await
        .map_err(|e| SwarmhiveError::Session {
            message: format!("Failed to open Zenoh session: {}", e),
        })?;
    info!(
        "[MAIN] Zenoh session opened with mode: {:?}, endpoints: {:?}",
        config_manager.zenoh.mode, config_manager.zenoh.endpoints
    );
    Ok(Arc::new(ZenohBus::new(
        session,
        config_manager.app.bus_prefix.clone(),
    )))
}

async fn run_orchestrator(config_manager: ConfigManager, bus: Arc<dyn ControlPlaneBus>) -> Result<()> {
    let app = &config_manager.app;

    let scenario_dirs: Vec<PathBuf> = app.scenario_dirs.iter().map(PathBuf::from).collect();
    let loader = ScenarioLoader::with_options(scenario_dirs, !app.no_default_scenarios);
    let scenarios = InMemoryScenarios::from_loader(&loader);
    info!(
        "[ORCHESTRATOR] {} scenario(s) available: {:?}",
        scenarios.len(),
        scenarios.ids()
    );

    let runtime = DockerRuntime::connect()
        .await
        .context("No container runtime available")?;

    let settings = CoordinatorSettings {
        default_controller_image: app.controller_image.clone(),
        bus_prefix: app.bus_prefix.clone(),
        controller_connect: config::ZenohConfigManager::controller_connect(&config_manager.zenoh),
        tick_interval_ms: app.tick_interval_ms,
    };
    let coordinator = Arc::new(SwarmLifecycleCoordinator::new(
        Arc::new(runtime),
        bus.clone(),
        Arc::new(scenarios),
        settings,
    ));
    let tracker = Arc::new(ConfirmationTracker::new(app.confirmation_retention()));
    let orchestrator = OrchestratorService::new(coordinator, tracker, bus);

    // Subscriptions must exist before controllers can announce readiness
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[ORCHESTRATOR] Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let event_loop = orchestrator.run(shutdown);
    tokio::pin!(event_loop);

    let provisioning = orchestrator.provision(&config_manager.swarm_requests);
    let result = tokio::select! {
        result = &mut event_loop => result,
        created = provisioning => {
            info!("[ORCHESTRATOR] {} swarm(s) provisioned", created);
            event_loop.await
        }
    };

    orchestrator.teardown().await;
    result
}

async fn run_controller(config_manager: ConfigManager, bus: Arc<dyn ControlPlaneBus>) -> Result<()> {
    let identity = ControllerIdentity::from_env()?;
    info!(
        "[CONTROLLER] Starting controller {} for swarm {}",
        identity.instance_id, identity.swarm_id
    );
    let controller = ControllerService::new(identity, bus, config_manager.app.tick_interval());

    tokio::select! {
        result = controller.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("[CONTROLLER] Shutdown requested");
            Ok(())
        }
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    // Load configuration from CLI and environment
    let config_manager = ConfigManager::from_cli_and_env()?;

    config_manager.validate()?;
    config_manager.init_logging()?;

    // Validate zenoh configuration with detailed error reporting
    config::ZenohConfigManager::validate_and_report(&config_manager.zenoh)?;

    info!(
        "[MAIN] Starting swarmhive {:?} '{}' on bus prefix '{}'",
        config_manager.app.role, config_manager.app.name, config_manager.app.bus_prefix
    );

    let bus = open_bus(&config_manager).await?;
    match config_manager.app.role {
        ServiceRole::Orchestrator => run_orchestrator(config_manager, bus).await,
        ServiceRole::Controller => run_controller(config_manager, bus).await,
    }
}
