/*!
MCP sidecar lifecycle.

- configuration: list/get/add/remove over the `mcps` list in `config.yaml`
- containers: start (create lazily, reuse unless the proxy port binding
  changed), stop, restart (falls back to start), status, logs
- every MCP container joins the shared MCP network and its own dedicated
  network, aliased by the MCP name
*/
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value;

use super::proxy::{build_proxy_image, DOCKER_SOCKET};
use super::{
    container_name, dedicated_network, next_proxy_port, DockerMcp, McpConfig, McpKind, ProxyMcp,
    ProxyOptions, RemoteMcp, LABEL_MCP, LABEL_MCP_NAME, LABEL_MCP_TYPE, MCP_NETWORK,
};
use crate::errors::{McError, RuntimeError};
use crate::runtime::{
    ensure_network, ContainerInfo, ContainerRuntime, ContainerSpec, PortPublish, VolumeMount,
    STOP_TIMEOUT,
};
use crate::user_config::UserConfig;
use crate::util::shell_like_split_args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpState {
    Running,
    Stopped,
    NotFound,
    Failed,
    NotApplicable,
}

impl McpState {
    pub fn as_str(self) -> &'static str {
        match self {
            McpState::Running => "running",
            McpState::Stopped => "stopped",
            McpState::NotFound => "not_found",
            McpState::Failed => "failed",
            McpState::NotApplicable => "not_applicable",
        }
    }

    fn of(info: &ContainerInfo) -> Self {
        if info.is_running() {
            McpState::Running
        } else {
            McpState::Stopped
        }
    }
}

impl std::fmt::Display for McpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `start`/`restart`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpStartStatus {
    pub name: String,
    pub kind: McpKind,
    pub state: McpState,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpStatusReport {
    pub name: String,
    pub kind: McpKind,
    pub state: McpState,
    pub container_id: Option<String>,
    pub image: Option<String>,
    /// `"8080/tcp"` -> published host port (None when only exposed).
    pub ports: BTreeMap<String, Option<u16>>,
    pub created: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
}

impl McpStatusReport {
    fn bare(name: &str, kind: McpKind, state: McpState) -> Self {
        Self {
            name: name.to_string(),
            kind,
            state,
            container_id: None,
            image: None,
            ports: BTreeMap::new(),
            created: None,
            url: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpLogs {
    Logs(String),
    NotApplicable,
    NotFound,
    Failed(String),
}

/// A container carrying the `mc.mcp` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpContainer {
    pub name: String,
    pub container_id: String,
    pub state: McpState,
    pub image: String,
    pub ports: BTreeMap<String, Option<u16>>,
    pub created_at: String,
    pub kind: String,
}

fn port_map(info: &ContainerInfo) -> BTreeMap<String, Option<u16>> {
    let mut ports: BTreeMap<String, Option<u16>> = info
        .exposed_ports
        .iter()
        .map(|p| (p.clone(), None))
        .collect();
    for (cport, hport) in &info.published_ports {
        ports.insert(format!("{cport}/tcp"), Some(*hport));
    }
    ports
}

fn mcp_labels(name: &str, kind: McpKind) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MCP.to_string(), "true".to_string());
    labels.insert(LABEL_MCP_NAME.to_string(), name.to_string());
    labels.insert(LABEL_MCP_TYPE.to_string(), kind.as_str().to_string());
    labels
}

fn decode_list(v: Value) -> Vec<McpConfig> {
    let Value::Sequence(items) = v else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match McpConfig::from_value(item) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::warn!(error = %e, "skipping invalid MCP entry");
                None
            }
        })
        .collect()
}

fn raw_entries(v: Value) -> Vec<Value> {
    match v {
        Value::Sequence(items) => items,
        _ => Vec::new(),
    }
}

fn entry_name(v: &Value) -> Option<&str> {
    v.get("name").and_then(Value::as_str)
}

pub struct McpManager {
    runtime: Arc<dyn ContainerRuntime>,
    config_path: PathBuf,
}

impl McpManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn load_config(&self) -> Result<UserConfig, McError> {
        UserConfig::load(&self.config_path)
    }

    /// Configured MCPs in stored order. Invalid entries are skipped.
    pub fn list(&self) -> Result<Vec<McpConfig>, McError> {
        Ok(decode_list(self.load_config()?.mcps_value()))
    }

    pub fn get(&self, name: &str) -> Result<Option<McpConfig>, McError> {
        Ok(self.list()?.into_iter().find(|m| m.name() == name))
    }

    pub fn require(&self, name: &str) -> Result<McpConfig, McError> {
        self.get(name)?
            .ok_or_else(|| McError::McpNotFound(name.to_string()))
    }

    /// Store `mcp`, replacing any entry with the same name. A proxy without a
    /// host port gets the next free one.
    pub fn add(&self, mcp: McpConfig) -> Result<McpConfig, McError> {
        mcp.validate()?;
        let mut cfg = self.load_config()?;
        // Entries this build cannot decode are carried over untouched.
        let stored = cfg.modify(|c| {
            let mut entries = raw_entries(c.mcps_value());
            let mut mcp = mcp;
            if let McpConfig::Proxy(p) = &mut mcp {
                if p.host_port.is_none() {
                    let known: Vec<McpConfig> = entries
                        .iter()
                        .filter_map(|e| McpConfig::from_value(e.clone()).ok())
                        .collect();
                    p.host_port = Some(next_proxy_port(&known)?);
                }
            }
            entries.retain(|e| entry_name(e) != Some(mcp.name()));
            entries.push(serde_yaml::to_value(&mcp)?);
            c.set_mcps_value(Value::Sequence(entries));
            Ok(mcp)
        })?;
        tracing::info!(mcp = stored.name(), kind = %stored.kind(), "saved MCP configuration");
        Ok(stored)
    }

    pub fn add_remote(
        &self,
        name: &str,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> Result<McpConfig, McError> {
        self.add(McpConfig::Remote(RemoteMcp::new(name, url, headers)?))
    }

    pub fn add_docker(
        &self,
        name: &str,
        image: &str,
        command: &str,
        env: BTreeMap<String, String>,
    ) -> Result<McpConfig, McError> {
        self.add(McpConfig::Docker(DockerMcp::new(name, image, command, env)?))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_proxy(
        &self,
        name: &str,
        base_image: &str,
        proxy_image: &str,
        command: &str,
        proxy_options: ProxyOptions,
        env: BTreeMap<String, String>,
        host_port: Option<u16>,
    ) -> Result<McpConfig, McError> {
        self.add(McpConfig::Proxy(ProxyMcp::new(
            name,
            base_image,
            proxy_image,
            command,
            proxy_options,
            env,
            host_port,
        )?))
    }

    /// Drop the configuration and destroy its container. False when unknown.
    pub fn remove(&self, name: &str) -> Result<bool, McError> {
        let mut cfg = self.load_config()?;
        let removed = cfg.modify(|c| {
            let mut entries = raw_entries(c.mcps_value());
            let before = entries.len();
            let mut kinds = Vec::new();
            entries.retain(|e| {
                if entry_name(e) != Some(name) {
                    return true;
                }
                kinds.push(e.get("type").and_then(Value::as_str).map(str::to_string));
                false
            });
            if entries.len() == before {
                return Ok(None);
            }
            c.set_mcps_value(Value::Sequence(entries));
            Ok(Some(kinds))
        })?;
        let Some(kinds) = removed else {
            return Ok(false);
        };
        let remote_only = kinds
            .iter()
            .all(|k| k.as_deref() == Some(McpKind::Remote.as_str()));
        if !remote_only {
            match self.runtime.remove_container(&container_name(name), true) {
                Ok(()) => tracing::info!(mcp = name, "removed MCP container"),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(mcp = name, error = %e, "could not remove MCP container"),
            }
        }
        Ok(true)
    }

    fn attach_networks(&self, name: &str, container: &str) {
        let aliases = vec![name.to_string()];
        for net in [MCP_NETWORK.to_string(), dedicated_network(name)] {
            let res = ensure_network(self.runtime.as_ref(), &net)
                .and_then(|_| self.runtime.connect_network(&net, container, &aliases));
            match res {
                Ok(()) => tracing::debug!(mcp = name, network = %net, "connected MCP to network"),
                Err(e) => {
                    tracing::warn!(mcp = name, network = %net, error = %e, "could not connect MCP to network")
                }
            }
        }
    }

    fn running(name: &str, kind: McpKind, id: String) -> McpStartStatus {
        McpStartStatus {
            name: name.to_string(),
            kind,
            state: McpState::Running,
            container_id: Some(id),
        }
    }

    fn not_applicable(name: &str) -> McpStartStatus {
        McpStartStatus {
            name: name.to_string(),
            kind: McpKind::Remote,
            state: McpState::NotApplicable,
            container_id: None,
        }
    }

    // Proxy containers bind their SSE port to a fixed host port; a changed
    // setting means the existing container is stale.
    fn needs_recreate(mcp: &McpConfig, info: &ContainerInfo) -> bool {
        match mcp {
            McpConfig::Proxy(p) => match p.host_port {
                Some(hp) => info.bound_host_ports(p.proxy_options.sse_port).first() != Some(&hp),
                None => false,
            },
            _ => false,
        }
    }

    /// Ensure the MCP container is running. Remote MCPs have no container and
    /// report `NotApplicable`.
    pub fn start(&self, name: &str) -> Result<McpStartStatus, McError> {
        let mcp = self.require(name)?;
        if mcp.kind() == McpKind::Remote {
            return Ok(Self::not_applicable(name));
        }
        let rt = self.runtime.as_ref();
        let cname = container_name(name);

        if let Some(info) = rt.inspect_container(&cname)? {
            if !Self::needs_recreate(&mcp, &info) {
                if !info.is_running() {
                    rt.start_container(&info.id)?;
                    tracing::info!(mcp = name, container = %info.id, "started existing MCP container");
                }
                self.attach_networks(name, &info.id);
                return Ok(Self::running(name, mcp.kind(), info.id));
            }
            tracing::info!(mcp = name, "port binding changed, recreating MCP container");
            rt.remove_container(&info.id, true)?;
        }

        let spec = match &mcp {
            McpConfig::Remote(_) => return Ok(Self::not_applicable(name)),
            McpConfig::Docker(d) => {
                if !rt.image_exists(&d.image)? {
                    tracing::info!(mcp = name, image = %d.image, "pulling MCP image");
                    rt.pull_image(&d.image)?;
                }
                ContainerSpec {
                    name: cname,
                    image: d.image.clone(),
                    command: shell_like_split_args(&d.command),
                    env: d.env.clone(),
                    labels: mcp_labels(name, McpKind::Docker),
                    ..ContainerSpec::default()
                }
            }
            McpConfig::Proxy(p) => {
                let image = build_proxy_image(rt, p)?;
                ContainerSpec {
                    name: cname,
                    image,
                    labels: mcp_labels(name, McpKind::Proxy),
                    volumes: vec![VolumeMount::new(DOCKER_SOCKET, DOCKER_SOCKET).with_mode("rw")],
                    ports: p
                        .host_port
                        .map(|hp| PortPublish {
                            container_port: p.proxy_options.sse_port,
                            host_port: Some(hp),
                        })
                        .into_iter()
                        .collect(),
                    ..ContainerSpec::default()
                }
            }
        };

        let id = rt.create_container(&spec)?;
        if let Err(e) = rt.start_container(&id) {
            if let Err(rm) = rt.remove_container(&id, true) {
                tracing::warn!(mcp = name, container = %id, error = %rm, "could not clean up MCP container");
            }
            return Err(e.into());
        }
        tracing::info!(mcp = name, container = %id, kind = %mcp.kind(), "started MCP container");
        self.attach_networks(name, &id);
        Ok(Self::running(name, mcp.kind(), id))
    }

    /// Stop a running MCP container. True when it was stopped by this call;
    /// false when already stopped, absent, or the stop failed. Remote: true.
    pub fn stop(&self, name: &str) -> Result<bool, McError> {
        let mcp = self.require(name)?;
        if mcp.kind() == McpKind::Remote {
            return Ok(true);
        }
        let rt = self.runtime.as_ref();
        let info = match rt.inspect_container(&container_name(name)) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::error!(mcp = name, error = %e, "could not inspect MCP container");
                return Ok(false);
            }
        };
        if !info.is_running() {
            return Ok(false);
        }
        match rt.stop_container(&info.id, STOP_TIMEOUT) {
            Ok(()) => {
                tracing::info!(mcp = name, container = %info.id, "stopped MCP container");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(mcp = name, error = %e, "could not stop MCP container");
                Ok(false)
            }
        }
    }

    /// Restart the container, or start it when it does not exist yet.
    pub fn restart(&self, name: &str) -> Result<McpStartStatus, McError> {
        let mcp = self.require(name)?;
        if mcp.kind() == McpKind::Remote {
            return Ok(Self::not_applicable(name));
        }
        let rt = self.runtime.as_ref();
        match rt.inspect_container(&container_name(name))? {
            Some(info) => match rt.restart_container(&info.id, STOP_TIMEOUT) {
                Ok(()) => Ok(Self::running(name, mcp.kind(), info.id)),
                Err(e) if e.is_not_found() => self.start(name),
                Err(e) => Err(e.into()),
            },
            None => self.start(name),
        }
    }

    /// Read-only status; runtime failures become `Failed`.
    pub fn status(&self, name: &str) -> Result<McpStatusReport, McError> {
        let mcp = self.require(name)?;
        let kind = mcp.kind();
        if let McpConfig::Remote(r) = &mcp {
            let mut report = McpStatusReport::bare(name, kind, McpState::NotApplicable);
            report.url = Some(r.url.clone());
            return Ok(report);
        }
        match self.runtime.inspect_container(&container_name(name)) {
            Ok(Some(info)) => Ok(McpStatusReport {
                name: name.to_string(),
                kind,
                state: McpState::of(&info),
                ports: port_map(&info),
                container_id: Some(info.id),
                image: Some(info.image),
                created: Some(info.created),
                url: None,
                error: None,
            }),
            Ok(None) => Ok(McpStatusReport::bare(name, kind, McpState::NotFound)),
            Err(e) => {
                tracing::error!(mcp = name, error = %e, "could not inspect MCP container");
                let mut report = McpStatusReport::bare(name, kind, McpState::Failed);
                report.error = Some(e.to_string());
                Ok(report)
            }
        }
    }

    /// Recent log lines (with timestamps); runtime failures become `Failed`.
    pub fn logs(&self, name: &str, tail: usize) -> Result<McpLogs, McError> {
        let mcp = self.require(name)?;
        if mcp.kind() == McpKind::Remote {
            return Ok(McpLogs::NotApplicable);
        }
        let rt = self.runtime.as_ref();
        let info = match rt.inspect_container(&container_name(name)) {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(McpLogs::NotFound),
            Err(e) => return Ok(McpLogs::Failed(e.to_string())),
        };
        match rt.container_logs(&info.id, Some(tail), true) {
            Ok(text) => Ok(McpLogs::Logs(text)),
            Err(RuntimeError::NotFound(_)) => Ok(McpLogs::NotFound),
            Err(e) => {
                tracing::error!(mcp = name, error = %e, "could not read MCP logs");
                Ok(McpLogs::Failed(e.to_string()))
            }
        }
    }

    /// Every container labelled as an MCP, configured or not.
    pub fn list_containers(&self) -> Result<Vec<McpContainer>, McError> {
        let containers = self.runtime.list_containers(LABEL_MCP)?;
        Ok(containers
            .into_iter()
            .map(|info| McpContainer {
                name: info.label(LABEL_MCP_NAME).unwrap_or("unknown").to_string(),
                kind: info.label(LABEL_MCP_TYPE).unwrap_or("unknown").to_string(),
                state: McpState::of(&info),
                ports: port_map(&info),
                container_id: info.id,
                image: info.image,
                created_at: info.created,
            })
            .collect())
    }
}
