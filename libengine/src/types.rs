//! Container specification, state and output types.
//!
//! These are engine-neutral: [`DockerEngine`](crate::DockerEngine) maps them
//! onto the Docker Engine API wire format.

// ---------------------------------------------------------------------------
// Container spec
// ---------------------------------------------------------------------------

/// Mount propagation mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Private,
    RShared,
}

impl Propagation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::RShared => "rshared",
        }
    }
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Path on the host.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub read_only: bool,
    pub propagation: Propagation,
}

/// A host device exposed to the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    /// Cgroup permissions, e.g. `"rwm"`.
    pub cgroup_permissions: String,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name; `None` lets the engine pick one.
    pub name: Option<String>,
    pub image: String,
    /// User to run as (`uid` or `uid:gid`).
    pub user: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// Linux capabilities to add, e.g. `SYS_ADMIN`.
    pub cap_add: Vec<String>,
    pub devices: Vec<DeviceMapping>,
    pub mounts: Vec<BindMount>,
    pub security_opt: Vec<String>,
    /// Networks to attach; the first one becomes the network mode.
    pub networks: Vec<String>,
    /// Remove the container once it exits.
    pub auto_remove: bool,
}

// ---------------------------------------------------------------------------
// Container state
// ---------------------------------------------------------------------------

/// Result of inspecting a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    /// Engine status string, e.g. `running`, `exited`.
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
}

/// Condition to wait for in [`Engine::wait_container`](crate::Engine::wait_container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCondition {
    #[default]
    NotRunning,
}

impl WaitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRunning => "not-running",
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Captured output of an exec or of container logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Output {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
