//! Container runtime seam.
//!
//! Every manager talks to the container engine through [`ContainerRuntime`].
//! The production implementation shells out to the `docker` CLI
//! ([`docker::DockerCli`]); tests plug in an in-memory fake.
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::errors::RuntimeError;

pub mod discovery;
pub mod docker;

pub use discovery::container_runtime_path;
pub use docker::DockerCli;

/// Grace period given to containers on stop/restart before they are killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: String,
    pub container: String,
    /// `rw` or `ro`; `None` leaves the runtime default.
    pub mode: Option<String>,
}

impl VolumeMount {
    pub fn new(host: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// `host:container[:mode]` as accepted by `docker -v`.
    pub fn to_bind(&self) -> String {
        match &self.mode {
            Some(m) => format!("{}:{}:{}", self.host, self.container, m),
            None => format!("{}:{}", self.host, self.container),
        }
    }
}

/// A container port to publish; `host_port: None` lets the runtime pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPublish {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

/// Everything needed to create (not start) a container.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Option<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortPublish>,
    pub network: Option<String>,
    pub network_aliases: Vec<String>,
    pub hostname: Option<String>,
    pub tty: bool,
    pub stdin_open: bool,
}

// Environment values routinely hold API keys; keep them out of debug output.
impl std::fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("command", &self.command)
            .field("entrypoint", &self.entrypoint)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("labels", &self.labels)
            .field("volumes", &self.volumes)
            .field("ports", &self.ports)
            .field("network", &self.network)
            .field("network_aliases", &self.network_aliases)
            .field("hostname", &self.hostname)
            .field("tty", &self.tty)
            .field("stdin_open", &self.stdin_open)
            .finish()
    }
}

/// Snapshot of a container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw runtime status: `created`, `running`, `exited`, `paused`, ...
    pub status: String,
    pub labels: BTreeMap<String, String>,
    /// RFC 3339 creation timestamp as reported by the runtime.
    pub created: String,
    /// Configured bindings, `"8080/tcp"` -> host ports. Present even when stopped.
    pub port_bindings: BTreeMap<String, Vec<u16>>,
    /// Live published ports, container port -> host port. Empty unless running.
    pub published_ports: BTreeMap<u16, u16>,
    pub networks: Vec<String>,
    pub exposed_ports: Vec<String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Host ports configured for `<port>/tcp`.
    pub fn bound_host_ports(&self, container_port: u16) -> Vec<u16> {
        self.port_bindings
            .get(&format!("{container_port}/tcp"))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub code: i32,
    pub output: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Blocking container engine operations.
///
/// "Not found" is reported as [`RuntimeError::NotFound`], except for
/// `inspect_container` which answers `Ok(None)`.
pub trait ContainerRuntime: Send + Sync {
    fn ping(&self) -> Result<(), RuntimeError>;

    fn network_exists(&self, name: &str) -> Result<bool, RuntimeError>;
    fn create_network(&self, name: &str) -> Result<(), RuntimeError>;
    /// Attach a container to a network; already-attached is success.
    fn connect_network(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> Result<(), RuntimeError>;

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;
    fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its id.
    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;
    fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;
    fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;
    fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;
    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError>;
    /// All containers (any state) carrying `label` (`key` or `key=value`).
    fn list_containers(&self, label: &str) -> Result<Vec<ContainerInfo>, RuntimeError>;

    fn container_logs(
        &self,
        id: &str,
        tail: Option<usize>,
        timestamps: bool,
    ) -> Result<String, RuntimeError>;
    /// Stream logs into `out` until the container stops or the stream is closed.
    fn follow_logs(&self, id: &str, out: &mut dyn Write) -> Result<(), RuntimeError>;

    fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecResult, RuntimeError>;
    /// Run `cmd` and stream its output into `out`; returns the exit code.
    fn exec_follow(&self, id: &str, cmd: &[String], out: &mut dyn Write)
        -> Result<i32, RuntimeError>;
    /// Replace the current process with an interactive exec in the container.
    ///
    /// Returns only when the exec could not be launched.
    fn exec_interactive(&self, id: &str, cmd: &[String]) -> RuntimeError;
}

/// Create `name` unless it exists. Returns true when this call created it.
///
/// A concurrent creator winning the race is not an error.
pub fn ensure_network(rt: &dyn ContainerRuntime, name: &str) -> Result<bool, RuntimeError> {
    if rt.network_exists(name)? {
        return Ok(false);
    }
    match rt.create_network(name) {
        Ok(()) => {
            tracing::info!(network = name, "created network");
            Ok(true)
        }
        Err(e) => {
            if rt.network_exists(name).unwrap_or(false) {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}
