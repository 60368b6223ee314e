/// Docker integration
///
/// Container liveness is read from the Docker Engine API rather than by
/// parsing `docker ps` output.

use async_trait::async_trait;
use bollard::container::InspectContainerOptions;
use bollard::errors::Error as DockerError;
use bollard::Docker;
use tracing::{debug, warn};

use crate::core::error::{BackupError, Result};
use crate::utils::ContainerState;

/// Answers whether a named service container is up
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerCheck: Send + Sync {
    async fn is_running(&self, name: &str) -> bool;
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    /// Connect to the local Docker daemon and make sure it answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackupError::Docker(format!("{}. Is Docker running?", e)))?;

        docker
            .ping()
            .await
            .map_err(|e| BackupError::Docker(format!("{}. Is Docker running?", e)))?;

        Ok(Self { docker })
    }

    /// Current state of a container, `Missing` if no container has that name
    pub async fn container_state(&self, name: &str) -> Result<ContainerState> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                if state.running == Some(true) {
                    return Ok(ContainerState::Running);
                }
                Ok(state
                    .status
                    .map(|s| ContainerState::from(s.to_string().as_str()))
                    .unwrap_or(ContainerState::Unknown))
            }
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(ContainerState::Missing)
            }
            Err(e) => Err(BackupError::Docker(e.to_string())),
        }
    }
}

#[async_trait]
impl ContainerCheck for DockerManager {
    async fn is_running(&self, name: &str) -> bool {
        match self.container_state(name).await {
            Ok(state) => {
                debug!(container = name, state = state.as_str(), "inspected container");
                state.is_running()
            }
            Err(e) => {
                warn!(container = name, error = %e, "could not inspect container");
                false
            }
        }
    }
}
