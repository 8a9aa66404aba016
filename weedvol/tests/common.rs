#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libengine::{ContainerSpec, ContainerState, Engine, EngineError, Output, WaitCondition};
use tempfile::TempDir;
use weedvol::registry::local::LocalRegistry;
use weedvol::{Controller, HelperSettings, MountOrchestrator, PluginDir};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Pull(String),
    Create(ContainerSpec),
    Start(String),
    Exec { id: String, cmd: Vec<String>, user: String },
    Inspect(String),
    Remove { id: String, force: bool, volumes: bool },
    Wait(String),
    Logs(String),
}

/// In-memory engine that records every call. Containers are keyed by their
/// name (or a generated id) and stay "running" until removed.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<Call>>,
    containers: Mutex<HashMap<String, ContainerSpec>>,
    pub fail_start: AtomicBool,
    pub fail_remove: AtomicBool,
    /// Plugin directory the probe container pretends to find the marker in.
    pub probe_dir: Mutex<Option<String>>,
    probe_output: Mutex<Vec<u8>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn starts(&self) -> usize {
        self.count(|c| matches!(c, Call::Start(_)))
    }

    pub fn removes(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove { .. }))
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    pub fn running(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }

    /// Drop a container without recording a call, as the engine does when an
    /// auto-remove container exits.
    pub fn forget(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn no_such_container(id: &str) -> EngineError {
    EngineError::NotFound(format!("No such container: {id}"))
}

#[async_trait]
impl Engine for RecordingEngine {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(Call::Pull(image.to_owned()));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(Call::Create(spec.clone()));
        let mut containers = self.containers.lock().unwrap();
        let id = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("anon-{}", containers.len()));

        if spec.entrypoint == ["find"] {
            let marker = std::env::temp_dir().join(&spec.cmd[2]);
            let out = match self.probe_dir.lock().unwrap().as_deref() {
                Some(dir) => format!("{dir}/rootfs{}\n", marker.display()),
                None => String::new(),
            };
            *self.probe_output.lock().unwrap() = out.into_bytes();
        }

        containers.insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Start(id.to_owned()));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                status: 500,
                message: "error gathering device information".into(),
            });
        }
        Ok(())
    }

    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        user: &str,
        _timeout: Duration,
    ) -> Result<Output, EngineError> {
        self.record(Call::Exec {
            id: id.to_owned(),
            cmd: cmd.to_vec(),
            user: user.to_owned(),
        });
        if !self.running(id) {
            return Err(no_such_container(id));
        }
        Ok(Output::default())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, EngineError> {
        self.record(Call::Inspect(id.to_owned()));
        if !self.running(id) {
            return Err(no_such_container(id));
        }
        Ok(ContainerState {
            id: id.to_owned(),
            name: id.to_owned(),
            status: "running".into(),
            running: true,
            exit_code: 0,
        })
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        volumes: bool,
    ) -> Result<(), EngineError> {
        self.record(Call::Remove {
            id: id.to_owned(),
            force,
            volumes,
        });
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(EngineError::Api {
                status: 409,
                message: "removal already in progress".into(),
            });
        }
        match self.containers.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(no_such_container(id)),
        }
    }

    async fn wait_container(
        &self,
        id: &str,
        _condition: WaitCondition,
    ) -> Result<i64, EngineError> {
        self.record(Call::Wait(id.to_owned()));
        Ok(0)
    }

    async fn container_logs(
        &self,
        id: &str,
        _stdout: bool,
        _stderr: bool,
    ) -> Result<Output, EngineError> {
        self.record(Call::Logs(id.to_owned()));
        Ok(Output {
            stdout: self.probe_output.lock().unwrap().clone(),
            stderr: Vec::new(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<RecordingEngine>,
    pub controller: Arc<Controller>,
}

impl Harness {
    pub fn state_path(&self) -> PathBuf {
        state_path(self.dir.path())
    }

    pub fn volume_root(&self) -> PathBuf {
        volume_root(self.dir.path())
    }

    /// A fresh controller over the same state file and engine, as after a
    /// plugin restart.
    pub async fn restart(self) -> Harness {
        let controller =
            controller_at(self.dir.path(), self.engine.clone(), PluginDir::unresolved()).await;
        Harness {
            dir: self.dir,
            engine: self.engine,
            controller,
        }
    }
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join("state").join("seaweedfs-state.json")
}

pub fn volume_root(root: &Path) -> PathBuf {
    root.join("docker-volumes")
}

pub async fn controller_at(
    root: &Path,
    engine: Arc<RecordingEngine>,
    plugin_dir: PluginDir,
) -> Arc<Controller> {
    let registry = LocalRegistry::open(state_path(root)).await.unwrap();
    let orchestrator = MountOrchestrator::new(
        engine,
        HelperSettings::default(),
        plugin_dir,
        volume_root(root),
    );
    Arc::new(Controller::new(
        Arc::new(registry),
        orchestrator,
        volume_root(root),
    ))
}

pub async fn harness() -> Harness {
    harness_with(PluginDir::unresolved()).await
}

pub async fn harness_with(plugin_dir: PluginDir) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let engine = RecordingEngine::new();
    let controller = controller_at(dir.path(), engine.clone(), plugin_dir).await;
    Harness {
        dir,
        engine,
        controller,
    }
}
