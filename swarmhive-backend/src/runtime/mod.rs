//! Container runtime abstraction used to provision swarm controllers.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod docker;

pub use docker::DockerRuntime;

/// Failures reported by a container runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be reached at all
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime answered but refused the request
    #[error("Container runtime rejected request: {0}")]
    Rejected(String),

    #[error("Container not found: {0}")]
    NotFound(String),
}

/// What to run for one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Controller instance id; the runtime derives the container name from it
    pub instance_id: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Runtime-assigned reference to a created container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Process-management calls the lifecycle coordinator needs
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}

/// Container name used for a controller instance
pub fn container_name(instance_id: &str) -> String {
    format!("swarmhive-{}", instance_id)
}
