//! The container execution seam.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::{ContainerSpec, ContainerState, Output, WaitCondition};

/// Container execution interface consumed by the volume plugin.
///
/// Every call is a blocking round-trip to the engine with no cancellation;
/// only [`Engine::exec`] takes a bound, and it applies to reading the
/// command's output.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Pull `image` (a `name[:tag]` or `name@digest` reference).
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Start a created container. Starting a running container succeeds.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Run `cmd` inside a running container as `user` and collect its output,
    /// giving up with [`EngineError::Timeout`] after `timeout`.
    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        user: &str,
        timeout: Duration,
    ) -> Result<Output, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, EngineError>;

    /// Remove a container. `force` kills it first, `volumes` also removes the
    /// anonymous volumes it created.
    async fn remove_container(&self, id: &str, force: bool, volumes: bool)
    -> Result<(), EngineError>;

    /// Block until `condition` holds and return the exit code.
    async fn wait_container(&self, id: &str, condition: WaitCondition)
    -> Result<i64, EngineError>;

    async fn container_logs(&self, id: &str, stdout: bool, stderr: bool)
    -> Result<Output, EngineError>;

    /// Pull the image, then create and start the container.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.pull_image(&spec.image).await?;
        let id = self.create_container(spec).await?;
        self.start_container(&id).await?;
        Ok(id)
    }
}
