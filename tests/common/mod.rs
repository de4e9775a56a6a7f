#![allow(dead_code)]
//! In-memory container runtime and fixtures shared by the integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mcontainer::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ExecResult};
use mcontainer::{
    DriverRegistry, McPaths, McpManager, ProjectConfigLocator, RuntimeError, SessionManager,
    SessionStore,
};

#[derive(Default)]
struct State {
    next_id: u32,
    next_host_port: u16,
    containers: BTreeMap<String, ContainerInfo>,
    specs: BTreeMap<String, ContainerSpec>,
    // network -> (container id, aliases), in join order
    networks: BTreeMap<String, Vec<(String, Vec<String>)>>,
    images: BTreeSet<String>,
    built: Vec<String>,
    pulled: Vec<String>,
    calls: Vec<String>,
    failures: BTreeSet<String>,
    logs: BTreeMap<String, String>,
    exec_results: BTreeMap<String, ExecResult>,
}

/// Docker stand-in: containers, networks, images and logs live in memory.
///
/// Failures are injected per operation (`"start_container"`) or per
/// operation and argument (`"connect_network:extra-net"`).
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_host_port: 49153,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn fail_on(&self, op: &str) {
        self.lock().failures.insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn add_image(&self, image: &str) {
        self.lock().images.insert(image.to_string());
    }

    pub fn set_logs(&self, id: &str, text: &str) {
        self.lock().logs.insert(id.to_string(), text.to_string());
    }

    /// Canned result for an exec whose argv joined by spaces equals `cmd`.
    pub fn set_exec(&self, cmd: &str, code: i32, output: &str) {
        self.lock().exec_results.insert(
            cmd.to_string(),
            ExecResult {
                code,
                output: output.to_string(),
            },
        );
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.lock().containers.values().cloned().collect()
    }

    pub fn container(&self, id_or_name: &str) -> Option<ContainerInfo> {
        let st = self.lock();
        find(&st, id_or_name).and_then(|id| st.containers.get(&id).cloned())
    }

    pub fn spec(&self, id: &str) -> Option<ContainerSpec> {
        self.lock().specs.get(id).cloned()
    }

    pub fn network_exists_now(&self, name: &str) -> bool {
        self.lock().networks.contains_key(name)
    }

    /// Container ids on `network`, in join order.
    pub fn members(&self, network: &str) -> Vec<String> {
        self.lock()
            .networks
            .get(network)
            .map(|m| m.iter().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default()
    }

    pub fn aliases(&self, network: &str, container: &str) -> Vec<String> {
        self.lock()
            .networks
            .get(network)
            .and_then(|m| m.iter().find(|(c, _)| c == container))
            .map(|(_, a)| a.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.lock().built.clone()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    /// Delete a container behind the manager's back.
    pub fn remove_out_of_band(&self, id: &str) {
        let mut st = self.lock();
        st.containers.remove(id);
        for members in st.networks.values_mut() {
            members.retain(|(c, _)| c != id);
        }
    }

    /// Mark a container exited behind the manager's back.
    pub fn stop_out_of_band(&self, id: &str) {
        if let Some(c) = self.lock().containers.get_mut(id) {
            c.status = "exited".to_string();
            c.published_ports.clear();
        }
    }
}

fn find(st: &State, id_or_name: &str) -> Option<String> {
    if st.containers.contains_key(id_or_name) {
        return Some(id_or_name.to_string());
    }
    st.containers
        .values()
        .find(|c| c.name == id_or_name)
        .map(|c| c.id.clone())
}

fn failed(op: &str, arg: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: format!("docker {op} {arg}"),
        code: Some(1),
        stderr: "injected failure".to_string(),
    }
}

fn not_found(what: &str) -> RuntimeError {
    RuntimeError::NotFound(what.to_string())
}

impl FakeRuntime {
    // Record the call and apply injected failures.
    fn enter(&self, st: &mut State, op: &str, arg: &str) -> Result<(), RuntimeError> {
        st.calls.push(format!("{op} {arg}"));
        if st.failures.contains(op) || st.failures.contains(&format!("{op}:{arg}")) {
            return Err(failed(op, arg));
        }
        Ok(())
    }

    fn existing(st: &State, id: &str) -> Result<String, RuntimeError> {
        find(st, id).ok_or_else(|| not_found(id))
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "ping", "")
    }

    fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let st = self.lock();
        Ok(st.networks.contains_key(name))
    }

    fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "create_network", name)?;
        st.networks.entry(name.to_string()).or_default();
        Ok(())
    }

    fn connect_network(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "connect_network", network)?;
        let id = Self::existing(&st, container)?;
        let members = st
            .networks
            .get_mut(network)
            .ok_or_else(|| not_found(network))?;
        if !members.iter().any(|(c, _)| *c == id) {
            members.push((id.clone(), aliases.to_vec()));
        }
        if let Some(c) = st.containers.get_mut(&id) {
            if !c.networks.iter().any(|n| n == network) {
                c.networks.push(network.to_string());
            }
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let st = self.lock();
        Ok(st.images.contains(image))
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "pull_image", image)?;
        st.pulled.push(image.to_string());
        st.images.insert(image.to_string());
        Ok(())
    }

    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "build_image", tag)?;
        if !context_dir.join("Dockerfile").is_file() {
            return Err(failed("build_image", "missing Dockerfile"));
        }
        st.built.push(tag.to_string());
        st.images.insert(tag.to_string());
        Ok(())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "create_container", &spec.name)?;
        if !spec.name.is_empty() && find(&st, &spec.name).is_some() {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker create --name {}", spec.name),
                code: Some(125),
                stderr: "Conflict. The container name is already in use".to_string(),
            });
        }
        st.next_id += 1;
        let n = st.next_id;
        let id = format!("fake{n:04}");
        let mut info = ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            status: "created".to_string(),
            labels: spec.labels.clone(),
            created: format!("2024-01-01T00:{:02}:{:02}Z", n / 60, n % 60),
            ..ContainerInfo::default()
        };
        for p in &spec.ports {
            let host = match p.host_port {
                Some(h) => h,
                None => {
                    let h = st.next_host_port;
                    st.next_host_port += 1;
                    h
                }
            };
            info.port_bindings
                .insert(format!("{}/tcp", p.container_port), vec![host]);
            info.exposed_ports.push(format!("{}/tcp", p.container_port));
        }
        if let Some(net) = &spec.network {
            let members = st
                .networks
                .get_mut(net)
                .ok_or_else(|| not_found(net))?;
            members.push((id.clone(), spec.network_aliases.clone()));
            info.networks.push(net.clone());
        }
        st.containers.insert(id.clone(), info);
        st.specs.insert(id.clone(), spec.clone());
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "start_container", id)?;
        let id = Self::existing(&st, id)?;
        if let Some(c) = st.containers.get_mut(&id) {
            c.status = "running".to_string();
            c.published_ports = c
                .port_bindings
                .iter()
                .filter_map(|(k, v)| {
                    let cport = k.split('/').next()?.parse::<u16>().ok()?;
                    Some((cport, *v.first()?))
                })
                .collect();
        }
        Ok(())
    }

    fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "stop_container", id)?;
        let id = Self::existing(&st, id)?;
        if let Some(c) = st.containers.get_mut(&id) {
            c.status = "exited".to_string();
            c.published_ports.clear();
        }
        Ok(())
    }

    fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.stop_container(id, timeout)?;
        self.start_container(id)
    }

    fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "remove_container", id)?;
        let id = Self::existing(&st, id)?;
        let running = st
            .containers
            .get(&id)
            .map(ContainerInfo::is_running)
            .unwrap_or(false);
        if running && !force {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker rm {id}"),
                code: Some(1),
                stderr: "cannot remove a running container".to_string(),
            });
        }
        st.containers.remove(&id);
        for members in st.networks.values_mut() {
            members.retain(|(c, _)| *c != id);
        }
        Ok(())
    }

    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "inspect_container", id)?;
        Ok(find(&st, id).and_then(|id| st.containers.get(&id).cloned()))
    }

    fn list_containers(&self, label: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "list_containers", label)?;
        let (key, value) = match label.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (label, None),
        };
        Ok(st
            .containers
            .values()
            .filter(|c| match (c.labels.get(key), value) {
                (Some(_), None) => true,
                (Some(v), Some(want)) => v == want,
                (None, _) => false,
            })
            .cloned()
            .collect())
    }

    fn container_logs(
        &self,
        id: &str,
        tail: Option<usize>,
        _timestamps: bool,
    ) -> Result<String, RuntimeError> {
        let mut st = self.lock();
        self.enter(&mut st, "container_logs", id)?;
        let id = Self::existing(&st, id)?;
        let text = st.logs.get(&id).cloned().unwrap_or_default();
        Ok(match tail {
            Some(n) => {
                let lines: Vec<&str> = text.lines().collect();
                let start = lines.len().saturating_sub(n);
                lines[start..]
                    .iter()
                    .map(|l| format!("{l}\n"))
                    .collect()
            }
            None => text,
        })
    }

    fn follow_logs(&self, id: &str, out: &mut dyn Write) -> Result<(), RuntimeError> {
        let text = {
            let mut st = self.lock();
            self.enter(&mut st, "follow_logs", id)?;
            let id = Self::existing(&st, id)?;
            st.logs.get(&id).cloned().unwrap_or_default()
        };
        out.write_all(text.as_bytes())?;
        Ok(())
    }

    fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecResult, RuntimeError> {
        let mut st = self.lock();
        let joined = cmd.join(" ");
        self.enter(&mut st, "exec", &joined)?;
        let cid = Self::existing(&st, id)?;
        if !st.containers.get(&cid).map(ContainerInfo::is_running).unwrap_or(false) {
            return Err(failed("exec", "container is not running"));
        }
        Ok(st.exec_results.get(&joined).cloned().unwrap_or(ExecResult {
            code: 0,
            output: String::new(),
        }))
    }

    fn exec_follow(
        &self,
        id: &str,
        cmd: &[String],
        out: &mut dyn Write,
    ) -> Result<i32, RuntimeError> {
        let res = self.exec(id, cmd)?;
        out.write_all(res.output.as_bytes())?;
        Ok(res.code)
    }

    fn exec_interactive(&self, id: &str, cmd: &[String]) -> RuntimeError {
        let mut st = self.lock();
        st.calls.push(format!("exec_interactive {id} {}", cmd.join(" ")));
        RuntimeError::CommandFailed {
            command: format!("docker exec -it {id}"),
            code: None,
            stderr: "no terminal in tests".to_string(),
        }
    }
}

/// Isolated on-host layout under a temp dir.
pub fn paths(root: &Path) -> McPaths {
    McPaths::under(root)
}

pub fn mcp_manager(rt: &Arc<FakeRuntime>, paths: &McPaths) -> McpManager {
    McpManager::new(rt.clone(), paths.config_file())
}

/// Session manager over the fake runtime; host API keys come from `host_env`.
pub fn session_manager_with_env(
    rt: &Arc<FakeRuntime>,
    paths: &McPaths,
    host_env: &[(&str, &str)],
) -> SessionManager {
    let host: BTreeMap<String, String> = host_env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    SessionManager::new(
        rt.clone(),
        DriverRegistry::from_sources(true, None, Some(&paths.user_drivers_dir())),
        mcp_manager(rt, paths),
        SessionStore::new(paths.sessions_file()),
        ProjectConfigLocator::from_paths(paths),
    )
    .with_host_env(move |k| host.get(k).cloned())
}

pub fn session_manager(rt: &Arc<FakeRuntime>, paths: &McPaths) -> SessionManager {
    session_manager_with_env(rt, paths, &[])
}
