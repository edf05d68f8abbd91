//! Docker/Podman runtime over the Docker-compatible HTTP API.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use super::{ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError, container_name};

/// Seconds a controller gets to exit before it is killed
const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Connect to the first Docker or Podman socket that answers a ping.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let mut socket_paths = vec![
            PathBuf::from("/var/run/docker.sock"),
            PathBuf::from("/run/docker.sock"),
            PathBuf::from("/run/podman/podman.sock"),
        ];
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            socket_paths.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
        }

        for path in socket_paths {
            if !path.exists() {
                continue;
            }
            let path_str = path.to_string_lossy();
            match Docker::connect_with_unix(&path_str, 120, bollard::API_DEFAULT_VERSION) {
                Ok(client) => match client.ping().await {
                    Ok(_) => {
                        info!("[RUNTIME] Connected to container runtime at {}", path_str);
                        return Ok(Self { client });
                    }
                    Err(e) => {
                        debug!("Socket exists at {} but ping failed: {}", path_str, e);
                    }
                },
                Err(e) => {
                    debug!("Failed to connect to {}: {}", path_str, e);
                }
            }
        }

        Err(RuntimeError::Unavailable(
            "no Docker or Podman socket answered".to_string(),
        ))
    }

    /// Pull `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => match classify(e) {
                RuntimeError::NotFound(_) => {}
                other => return Err(other),
            },
        }

        info!("[RUNTIME] Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut pull = self.client.create_image(Some(options), None, None);
        while let Some(progress) = pull.next().await {
            let progress = progress.map_err(classify)?;
            if let Some(status) = progress.status {
                debug!("[RUNTIME] {}: {}", image, status);
            }
        }
        Ok(())
    }
}

/// Map a bollard error onto the runtime's failure classes
fn classify(error: bollard::errors::Error) -> RuntimeError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Rejected(format!("{} ({})", message, status_code)),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, spec), fields(instance = %spec.instance_id, image = %spec.image))]
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let name = container_name(&spec.instance_id);
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        let labels: HashMap<String, String> = spec.labels.clone().into_iter().collect();

        let options = CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(classify)?;
        for warning in &response.warnings {
            warn!("[RUNTIME] {}: {}", name, warning);
        }

        info!("[RUNTIME] Created container {} ({})", name, response.id);
        Ok(ContainerHandle {
            id: response.id,
            name,
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.client
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)?;
        info!("[RUNTIME] Started container {}", handle);
        Ok(())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.client.stop_container(&handle.id, Some(options)).await {
            Ok(()) => {}
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => return Err(classify(e)),
        }
        info!("[RUNTIME] Stopped container {}", handle);
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.client
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(classify)?;
        info!("[RUNTIME] Removed container {}", handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "no such container".to_string(),
        };
        assert!(matches!(classify(not_found), RuntimeError::NotFound(_)));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "name in use".to_string(),
        };
        assert_eq!(
            classify(conflict),
            RuntimeError::Rejected("name in use (409)".to_string())
        );
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("ctrl-1"), "swarmhive-ctrl-1");
    }
}
