/*!
Session lifecycle: create, list, close, close_all, connect, logs.

`create` runs strictly in order: resolve driver and MCPs, allocate the id,
ensure the primary network, build the environment and mounts, start MCP
sidecars, create and start the container, join the extra networks, and
persist the record. A container created by this call is removed again if a
later step fails (starting, persisting); network joins are best-effort.
*/
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::env::{effective_ids, mcp_environment, seed_environment, split_model_provider};
use super::store::SessionStore;
use super::{
    Session, SessionStatus, APP_MOUNT, LABEL_DRIVER, LABEL_MCPS, LABEL_PROJECT, LABEL_SESSION,
    LABEL_SESSION_ID, LABEL_SESSION_NAME,
};
use crate::driver::{Driver, DriverRegistry};
use crate::errors::{McError, RuntimeError};
use crate::mcp::{dedicated_network, McpConfig, McpKind, McpManager};
use crate::paths::McPaths;
use crate::project::{
    local_project_dir, persistent_links_env, ProjectConfigLocator, CONTAINER_CONFIG_ROOT,
};
use crate::runtime::{
    ensure_network, ContainerInfo, ContainerRuntime, ContainerSpec, PortPublish, VolumeMount,
    STOP_TIMEOUT,
};
use crate::user_config::{UserConfig, DEFAULT_NETWORK};
use crate::util::id::create_session_id;

/// Upper bound on parallel workers in `close_all`.
pub const MAX_CLOSE_WORKERS: usize = 10;

pub const DEFAULT_ENTRYPOINT: &str = "/mc-init.sh";
pub const DEFAULT_SHELL: &str = "/bin/bash";

const INIT_STATUS_CHECK: &str = "grep -q 'INIT_COMPLETE=true' /init.status";

type HostEnv = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Parameters of `create`. `CreateRequest::new(driver)` gives the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub driver: String,
    pub project: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub name: Option<String>,
    pub mount_local: bool,
    pub volumes: Vec<VolumeMount>,
    pub networks: Vec<String>,
    pub mcps: Vec<String>,
    pub run_command: Option<String>,
    pub no_shell: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub ssh: bool,
}

impl CreateRequest {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            mount_local: true,
            ..Self::default()
        }
    }
}

/// Snapshot of a session's initialization log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitLog {
    pub complete: bool,
    pub text: String,
}

// Removes a freshly created container unless disarmed.
struct ContainerGuard<'a> {
    runtime: &'a dyn ContainerRuntime,
    id: String,
    armed: bool,
}

impl ContainerGuard<'_> {
    fn disarm(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.id)
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.runtime.remove_container(&self.id, true) {
            Ok(()) => tracing::info!(container = %self.id, "removed container after failed create"),
            Err(e) => tracing::warn!(container = %self.id, error = %e, "could not remove container after failed create"),
        }
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}

fn session_from_container(info: &ContainerInfo) -> Session {
    let mcps = info
        .label(LABEL_MCPS)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Session {
        id: info.label(LABEL_SESSION_ID).unwrap_or_default().to_string(),
        name: info
            .label(LABEL_SESSION_NAME)
            .map(str::to_string)
            .unwrap_or_else(|| info.name.clone()),
        driver: info.label(LABEL_DRIVER).unwrap_or_default().to_string(),
        status: SessionStatus::from_runtime(&info.status),
        container_id: Some(info.id.clone()),
        environment: BTreeMap::new(),
        project: info
            .label(LABEL_PROJECT)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        created_at: info.created.clone(),
        ports: info.published_ports.clone(),
        mcps,
        run_command: None,
        uid: None,
        gid: None,
        model: None,
        provider: None,
        ssh: false,
    }
}

pub struct SessionManager {
    runtime: Arc<dyn ContainerRuntime>,
    drivers: DriverRegistry,
    mcps: McpManager,
    store: SessionStore,
    locator: ProjectConfigLocator,
    network: String,
    host_env: HostEnv,
}

impl SessionManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        drivers: DriverRegistry,
        mcps: McpManager,
        store: SessionStore,
        locator: ProjectConfigLocator,
    ) -> Self {
        Self {
            runtime,
            drivers,
            mcps,
            store,
            locator,
            network: DEFAULT_NETWORK.to_string(),
            host_env: Box::new(|k| std::env::var(k).ok()),
        }
    }

    /// Wire every collaborator from the standard on-host locations.
    pub fn from_paths(runtime: Arc<dyn ContainerRuntime>, paths: &McPaths) -> Result<Self, McError> {
        let config = UserConfig::load(&paths.config_file())?;
        let mcps = McpManager::new(runtime.clone(), paths.config_file());
        Ok(Self::new(
            runtime,
            DriverRegistry::load(paths),
            mcps,
            SessionStore::new(paths.sessions_file()),
            ProjectConfigLocator::from_paths(paths),
        )
        .with_network(config.network()))
    }

    /// Primary network sessions are created on.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Source of host values for API key passthrough.
    pub fn with_host_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.host_env = Box::new(lookup);
        self
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn mcps(&self) -> &McpManager {
        &self.mcps
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    fn resolve_mcps(&self, names: &[String]) -> Result<Vec<McpConfig>, McError> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for name in names {
            if seen.insert(name.as_str()) {
                out.push(self.mcps.require(name)?);
            }
        }
        Ok(out)
    }

    // Sidecar failures drop the MCP; the session goes ahead without it.
    fn start_mcps(&self, session_id: &str, wanted: Vec<McpConfig>) -> Vec<McpConfig> {
        let mut attached = Vec::with_capacity(wanted.len());
        for mcp in wanted {
            match self.mcps.start(mcp.name()) {
                Ok(status) => {
                    tracing::debug!(session = session_id, mcp = mcp.name(), state = %status.state, "MCP ready");
                    attached.push(mcp);
                }
                Err(e) => {
                    tracing::warn!(session = session_id, mcp = mcp.name(), error = %e, "MCP failed to start; continuing without it");
                }
            }
        }
        attached
    }

    fn build_volumes(
        &self,
        req: &CreateRequest,
        local_dir: Option<&std::path::Path>,
    ) -> Vec<VolumeMount> {
        let mut volumes = Vec::new();
        let explicit_app = req.volumes.iter().any(|v| v.container == APP_MOUNT);
        if let Some(dir) = local_dir.filter(|_| req.mount_local) {
            if explicit_app {
                tracing::warn!(dir = %dir.display(), "explicit {APP_MOUNT} volume replaces the project mount");
            } else {
                volumes.push(VolumeMount::new(dir.display().to_string(), APP_MOUNT).with_mode("rw"));
            }
        }
        volumes.extend(req.volumes.iter().cloned());
        volumes
    }

    fn internal_environment(
        &self,
        req: &CreateRequest,
        driver: &Driver,
        remote_project: Option<&str>,
        links: &str,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("MC_CONFIG_DIR".to_string(), CONTAINER_CONFIG_ROOT.to_string());
        env.insert(
            "MC_DRIVER_CONFIG_DIR".to_string(),
            format!("{CONTAINER_CONFIG_ROOT}/{}", driver.name),
        );
        if !links.is_empty() {
            env.insert("MC_PERSISTENT_LINKS".to_string(), links.to_string());
        }
        if let Some(url) = remote_project {
            env.insert("MC_PROJECT_URL".to_string(), url.to_string());
        }
        if let Some(cmd) = driver.init.as_ref().and_then(|i| i.command.as_deref()) {
            env.insert("MC_INIT_COMMAND".to_string(), cmd.to_string());
        }
        if let Some(cmd) = req.run_command.as_deref().filter(|c| !c.trim().is_empty()) {
            env.insert("MC_RUN_COMMAND".to_string(), cmd.to_string());
        }
        env.insert("MC_NO_SHELL".to_string(), req.no_shell.to_string());
        let (model, provider) = split_model_provider(req.model.as_deref(), req.provider.as_deref());
        if let Some(m) = model {
            env.insert("MC_MODEL".to_string(), m);
        }
        if let Some(p) = provider {
            env.insert("MC_PROVIDER".to_string(), p);
        }
        env
    }

    /// Create and start a session container and record it.
    pub fn create(&self, req: &CreateRequest) -> Result<Session, McError> {
        let rt = self.runtime.as_ref();
        let driver = self.drivers.require(&req.driver)?.clone();
        let wanted_mcps = self.resolve_mcps(&req.mcps)?;

        let id = create_session_id();
        let name = req
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("mc-{id}"));
        tracing::info!(session = %id, name = %name, driver = %driver.name, "creating session");

        ensure_network(rt, &self.network)?;

        let (uid, gid) = effective_ids(req.uid, req.gid);
        let host_env = &self.host_env;
        let mut env = seed_environment(&req.environment, uid, gid, req.ssh, &|k| host_env(k));

        let project = req.project.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let local_dir = project.and_then(local_project_dir);
        let remote_project = match (project, &local_dir) {
            (Some(p), None) => Some(p),
            _ => None,
        };
        let mut volumes = self.build_volumes(req, local_dir.as_deref());

        let config_root = self.locator.resolve(project);
        let driver_config = config_root.join(&driver.name);
        if let Err(e) = std::fs::create_dir_all(&driver_config) {
            tracing::warn!(dir = %driver_config.display(), error = %e, "could not create driver config directory");
        }
        volumes.push(
            VolumeMount::new(config_root.display().to_string(), CONTAINER_CONFIG_ROOT)
                .with_mode("rw"),
        );
        let links = ProjectConfigLocator::prepare_persistent(&config_root, &driver.persistent_configs);

        env.extend(self.internal_environment(
            req,
            &driver,
            remote_project,
            &persistent_links_env(&links),
        ));

        let attached = self.start_mcps(&id, wanted_mcps);
        env.extend(mcp_environment(&attached));
        let mcp_names: Vec<String> = attached.iter().map(|m| m.name().to_string()).collect();

        if !rt.image_exists(&driver.image)? {
            tracing::info!(image = %driver.image, "pulling driver image");
            rt.pull_image(&driver.image)?;
        }

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_SESSION.to_string(), "true".to_string());
        labels.insert(LABEL_SESSION_ID.to_string(), id.clone());
        labels.insert(LABEL_SESSION_NAME.to_string(), name.clone());
        labels.insert(LABEL_DRIVER.to_string(), driver.name.clone());
        if let Some(p) = project {
            labels.insert(LABEL_PROJECT.to_string(), p.to_string());
        }
        labels.insert(LABEL_MCPS.to_string(), mcp_names.join(","));

        let entrypoint = driver
            .init
            .as_ref()
            .and_then(|i| i.pre_command.clone())
            .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string());

        let spec = ContainerSpec {
            name: name.clone(),
            image: driver.image.clone(),
            command: vec![DEFAULT_SHELL.to_string()],
            entrypoint: Some(entrypoint),
            env: env.clone(),
            labels,
            volumes,
            ports: driver
                .ports
                .iter()
                .map(|p| PortPublish {
                    container_port: *p,
                    host_port: None,
                })
                .collect(),
            network: Some(self.network.clone()),
            network_aliases: vec![name.clone()],
            hostname: Some(name.clone()),
            tty: true,
            stdin_open: true,
        };

        let container_id = rt.create_container(&spec)?;
        let guard = ContainerGuard {
            runtime: rt,
            id: container_id.clone(),
            armed: true,
        };
        rt.start_container(&container_id)?;

        self.join_networks(&id, &name, &container_id, &attached, &req.networks);

        let info = match rt.inspect_container(&container_id) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "could not reload container state");
                None
            }
        };
        let session = Session {
            id: id.clone(),
            name,
            driver: driver.name.clone(),
            status: info
                .as_ref()
                .map(|i| SessionStatus::from_runtime(&i.status))
                .unwrap_or(SessionStatus::Running),
            container_id: Some(container_id),
            environment: env,
            project: project.map(str::to_string),
            created_at: info
                .as_ref()
                .map(|i| i.created.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(now_rfc3339),
            ports: info.map(|i| i.published_ports).unwrap_or_default(),
            mcps: mcp_names,
            run_command: req.run_command.clone(),
            uid: Some(uid),
            gid: Some(gid),
            model: req.model.clone(),
            provider: req.provider.clone(),
            ssh: req.ssh,
        };
        self.store.put(&session)?;
        guard.disarm();
        tracing::info!(session = %id, "session created");
        Ok(session)
    }

    // Order: each non-remote MCP's dedicated network, then caller networks.
    // The primary network was joined at creation.
    fn join_networks(
        &self,
        session_id: &str,
        alias: &str,
        container: &str,
        mcps: &[McpConfig],
        extra: &[String],
    ) {
        let aliases = vec![alias.to_string()];
        let mut joined = BTreeSet::new();
        joined.insert(self.network.clone());
        let targets = mcps
            .iter()
            .filter(|m| m.kind() != McpKind::Remote)
            .map(|m| dedicated_network(m.name()))
            .chain(extra.iter().map(|n| n.trim().to_string()))
            .filter(|n| !n.is_empty());
        for net in targets {
            if !joined.insert(net.clone()) {
                continue;
            }
            match self.runtime.connect_network(&net, container, &aliases) {
                Ok(()) => tracing::info!(session = session_id, network = %net, "joined network"),
                Err(e) => {
                    tracing::warn!(session = session_id, network = %net, error = %e, "could not join network")
                }
            }
        }
    }

    /// Live sessions as reported by the runtime (label `mc.session`).
    pub fn list(&self) -> Result<Vec<Session>, McError> {
        let containers = self.runtime.list_containers(LABEL_SESSION)?;
        let mut sessions: Vec<Session> = containers
            .iter()
            .filter(|c| c.label(LABEL_SESSION_ID).is_some())
            .map(session_from_container)
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    fn find_live(&self, id: &str) -> Option<Session> {
        match self.list() {
            Ok(sessions) => sessions.into_iter().find(|s| s.id == id),
            Err(e) => {
                tracing::error!(session = id, error = %e, "could not list sessions");
                None
            }
        }
    }

    fn purge_record(&self, id: &str) {
        match self.store.remove(id) {
            Ok(true) => tracing::info!(session = id, "purged stale session record"),
            Ok(false) => {}
            Err(e) => tracing::warn!(session = id, error = %e, "could not update session store"),
        }
    }

    // Stop and remove one live session; the record goes too.
    fn close_one(&self, session: &Session) -> bool {
        let Some(cid) = session.container_id.as_deref() else {
            return false;
        };
        let rt = self.runtime.as_ref();
        let result = rt
            .stop_container(cid, STOP_TIMEOUT)
            .and_then(|_| rt.remove_container(cid, false));
        match result {
            Ok(()) => {
                self.purge_record(&session.id);
                tracing::info!(session = %session.id, "session closed");
                true
            }
            Err(e) => {
                if e.is_not_found() {
                    self.purge_record(&session.id);
                }
                tracing::error!(session = %session.id, error = %e, "could not close session");
                false
            }
        }
    }

    /// Stop and remove a session. False when it is not live; a stale store
    /// record for it is purged.
    pub fn close(&self, id: &str) -> bool {
        match self.find_live(id) {
            Some(session) => self.close_one(&session),
            None => {
                tracing::info!(session = id, "session not found");
                if matches!(self.store.get(id), Ok(Some(_))) {
                    self.purge_record(id);
                }
                false
            }
        }
    }

    /// Close every live session on up to [`MAX_CLOSE_WORKERS`] threads.
    /// `progress(session, ok)` runs once per session. Returns the number
    /// closed and whether any closed.
    pub fn close_all(&self, progress: &(dyn Fn(&Session, bool) + Sync)) -> (usize, bool) {
        let sessions = match self.list() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "could not list sessions");
                return (0, false);
            }
        };
        if sessions.is_empty() {
            return (0, false);
        }
        let workers = MAX_CLOSE_WORKERS.min(sessions.len());
        let next = AtomicUsize::new(0);
        let closed = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(session) = sessions.get(i) else {
                        break;
                    };
                    let ok = self.close_one(session);
                    if ok {
                        closed.fetch_add(1, Ordering::SeqCst);
                    }
                    progress(session, ok);
                });
            }
        });
        let n = closed.load(Ordering::SeqCst);
        (n, n > 0)
    }

    fn resolve_container(&self, id: &str) -> Result<String, McError> {
        match self.store.get(id) {
            Ok(Some(record)) => {
                if let Some(cid) = record.container_id {
                    return Ok(cid);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(session = id, error = %e, "could not read session store"),
        }
        self.find_live(id)
            .and_then(|s| s.container_id)
            .ok_or_else(|| McError::SessionNotFound(id.to_string()))
    }

    /// Replace this process with an interactive shell in the session.
    ///
    /// Never returns on success; an `Err` means the shell could not be reached.
    pub fn connect(&self, id: &str) -> Result<Infallible, McError> {
        let rt = self.runtime.as_ref();
        let cid = self.resolve_container(id)?;
        let info = match rt.inspect_container(&cid)? {
            Some(info) => info,
            None => {
                self.purge_record(id);
                return Err(McError::SessionNotFound(id.to_string()));
            }
        };
        if !info.is_running() {
            return Err(McError::SessionNotRunning {
                id: id.to_string(),
                status: info.status,
            });
        }
        tracing::info!(session = id, container = %cid, "connecting");
        let err = rt.exec_interactive(&cid, &["bash".to_string(), "-l".to_string()]);
        Err(McError::Runtime(err))
    }

    fn live_container(&self, id: &str) -> Option<String> {
        let found = self.find_live(id).and_then(|s| s.container_id);
        if found.is_none() {
            tracing::info!(session = id, "session not found");
        }
        found
    }

    /// Snapshot of the session's container output; `None` if not found.
    pub fn logs(&self, id: &str, tail: Option<usize>) -> Option<String> {
        let cid = self.live_container(id)?;
        match self.runtime.container_logs(&cid, tail, false) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(session = id, error = %e, "could not read session logs");
                None
            }
        }
    }

    /// Stream container output into `out` until it ends. False if not found.
    pub fn follow_logs(&self, id: &str, out: &mut dyn Write) -> bool {
        let Some(cid) = self.live_container(id) else {
            return false;
        };
        match self.runtime.follow_logs(&cid, out) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session = id, error = %e, "log stream failed");
                false
            }
        }
    }

    fn init_complete(&self, cid: &str) -> Result<bool, RuntimeError> {
        let check = vec!["sh".to_string(), "-c".to_string(), INIT_STATUS_CHECK.to_string()];
        Ok(self.runtime.exec(cid, &check)?.success())
    }

    /// Current `/init.log` and whether initialization has finished.
    pub fn init_logs(&self, id: &str) -> Option<InitLog> {
        let cid = self.live_container(id)?;
        let run = || -> Result<InitLog, RuntimeError> {
            let complete = self.init_complete(&cid)?;
            let cat = vec!["cat".to_string(), "/init.log".to_string()];
            let text = self.runtime.exec(&cid, &cat)?.output;
            Ok(InitLog { complete, text })
        };
        match run() {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::error!(session = id, error = %e, "could not read init logs");
                None
            }
        }
    }

    fn stream_init_log(&self, cid: &str, out: &mut dyn Write) -> Result<(), RuntimeError> {
        if self.init_complete(cid)? {
            let cat = vec!["cat".to_string(), "/init.log".to_string()];
            let text = self.runtime.exec(cid, &cat)?.output;
            out.write_all(text.as_bytes())?;
        } else {
            let tail = vec!["tail".to_string(), "-f".to_string(), "/init.log".to_string()];
            self.runtime.exec_follow(cid, &tail, out)?;
        }
        Ok(())
    }

    /// Print a finished init log, or follow it while initialization runs.
    pub fn follow_init_logs(&self, id: &str, out: &mut dyn Write) -> bool {
        let Some(cid) = self.live_container(id) else {
            return false;
        };
        match self.stream_init_log(&cid, out) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(session = id, error = %e, "could not read init logs");
                false
            }
        }
    }

    /// Drop store records whose container no longer exists. Returns their ids.
    pub fn prune_stale(&self) -> Result<Vec<String>, McError> {
        let live = self.runtime.list_containers(LABEL_SESSION)?;
        let live_ids: BTreeSet<&str> = live
            .iter()
            .filter_map(|c| c.label(LABEL_SESSION_ID))
            .collect();
        let live_containers: BTreeSet<&str> = live.iter().map(|c| c.id.as_str()).collect();
        let removed = self.store.retain(|s| {
            live_ids.contains(s.id.as_str())
                || s
                    .container_id
                    .as_deref()
                    .map(|c| live_containers.contains(c))
                    .unwrap_or(false)
        })?;
        for id in &removed {
            tracing::info!(session = %id, "pruned stale session record");
        }
        Ok(removed)
    }
}
