/*!
`docker` CLI backed implementation of [`ContainerRuntime`].

- argv builders are pure functions (`build_create_args`, `build_connect_args`, ...)
  so the exact command lines are testable without a daemon
- `docker inspect` JSON is decoded by `parse_inspect_output`
- environment values are handed to `docker create` through the child's
  environment (`-e KEY`), never on the command line
*/
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::Value;

use super::{container_runtime_path, ContainerInfo, ContainerRuntime, ContainerSpec, ExecResult};
use crate::errors::RuntimeError;
use crate::util::exec::{ExecOutput, ExecRequest, ExecService};
use crate::util::shell_join;

/// `docker create` invocation: argv plus the variables referenced by `-e KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCommand {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

pub fn build_create_args(spec: &ContainerSpec) -> CreateCommand {
    let mut args: Vec<String> = vec!["create".to_string()];
    if !spec.name.is_empty() {
        args.push("--name".to_string());
        args.push(spec.name.clone());
    }
    if let Some(h) = &spec.hostname {
        args.push("--hostname".to_string());
        args.push(h.clone());
    }
    if spec.stdin_open {
        args.push("-i".to_string());
    }
    if spec.tty {
        args.push("-t".to_string());
    }
    if let Some(ep) = &spec.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(ep.clone());
    }
    if let Some(net) = &spec.network {
        args.push("--network".to_string());
        args.push(net.clone());
        for alias in &spec.network_aliases {
            args.push("--network-alias".to_string());
            args.push(alias.clone());
        }
    }
    let mut env = Vec::with_capacity(spec.env.len());
    for (k, v) in &spec.env {
        args.push("-e".to_string());
        args.push(k.clone());
        env.push((k.clone(), v.clone()));
    }
    for (k, v) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{k}={v}"));
    }
    for vol in &spec.volumes {
        args.push("-v".to_string());
        args.push(vol.to_bind());
    }
    for p in &spec.ports {
        args.push("-p".to_string());
        match p.host_port {
            Some(h) => args.push(format!("{h}:{}", p.container_port)),
            None => args.push(p.container_port.to_string()),
        }
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    CreateCommand { args, env }
}

pub fn build_connect_args(network: &str, container: &str, aliases: &[String]) -> Vec<String> {
    let mut args = vec!["network".to_string(), "connect".to_string()];
    for a in aliases {
        args.push("--alias".to_string());
        args.push(a.clone());
    }
    args.push(network.to_string());
    args.push(container.to_string());
    args
}

pub fn build_logs_args(id: &str, tail: Option<usize>, timestamps: bool, follow: bool) -> Vec<String> {
    let mut args = vec!["logs".to_string()];
    if follow {
        args.push("--follow".to_string());
    }
    if let Some(n) = tail {
        args.push("--tail".to_string());
        args.push(n.to_string());
    }
    if timestamps {
        args.push("--timestamps".to_string());
    }
    args.push(id.to_string());
    args
}

pub fn build_exec_args(id: &str, cmd: &[String], interactive: bool) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if interactive {
        args.push("-it".to_string());
    }
    args.push(id.to_string());
    args.extend(cmd.iter().cloned());
    args
}

fn is_not_found_message(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such container")
        || s.contains("no such object")
        || s.contains("no such image")
        || s.contains("no such network")
        || (s.contains("network") && s.contains("not found"))
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("error during connect")
}

/// Turn a failed docker invocation into a typed error.
pub fn classify_failure(args: &[String], code: Option<i32>, stderr: &str) -> RuntimeError {
    if is_not_found_message(stderr) {
        return RuntimeError::NotFound(stderr.trim().to_string());
    }
    if is_daemon_unreachable(stderr) {
        return RuntimeError::Unavailable(stderr.trim().to_string());
    }
    let mut full = vec!["docker".to_string()];
    full.extend(args.iter().cloned());
    RuntimeError::CommandFailed {
        command: shell_join(&full),
        code,
        stderr: stderr.to_string(),
    }
}

fn str_at<'a>(v: &'a Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        match cur.get(key) {
            Some(next) => cur = next,
            None => return "",
        }
    }
    cur.as_str().unwrap_or("")
}

fn host_ports(bindings: &Value) -> Vec<u16> {
    bindings
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|b| b.get("HostPort").and_then(Value::as_str))
                .filter_map(|p| p.parse::<u16>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn container_port_number(key: &str) -> Option<u16> {
    key.split('/').next().and_then(|p| p.parse::<u16>().ok())
}

fn parse_container(v: &Value) -> ContainerInfo {
    let labels: BTreeMap<String, String> = v
        .pointer("/Config/Labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .map(|(k, val)| (k.clone(), val.as_str().unwrap_or("").to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut port_bindings = BTreeMap::new();
    if let Some(m) = v.pointer("/HostConfig/PortBindings").and_then(Value::as_object) {
        for (k, b) in m {
            port_bindings.insert(k.clone(), host_ports(b));
        }
    }

    let mut published_ports = BTreeMap::new();
    if let Some(m) = v.pointer("/NetworkSettings/Ports").and_then(Value::as_object) {
        for (k, b) in m {
            if let (Some(cport), Some(hport)) = (container_port_number(k), host_ports(b).first()) {
                published_ports.insert(cport, *hport);
            }
        }
    }

    let networks = v
        .pointer("/NetworkSettings/Networks")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let exposed_ports = v
        .pointer("/Config/ExposedPorts")
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();

    ContainerInfo {
        id: str_at(v, &["Id"]).to_string(),
        name: str_at(v, &["Name"]).trim_start_matches('/').to_string(),
        image: str_at(v, &["Config", "Image"]).to_string(),
        status: str_at(v, &["State", "Status"]).to_string(),
        labels,
        created: str_at(v, &["Created"]).to_string(),
        port_bindings,
        published_ports,
        networks,
        exposed_ports,
    }
}

/// Decode the JSON array printed by `docker inspect --type container`.
pub fn parse_inspect_output(json: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
    let v: Value = serde_json::from_str(json.trim())
        .map_err(|e| RuntimeError::Parse(format!("docker inspect: {e}")))?;
    let arr = v
        .as_array()
        .ok_or_else(|| RuntimeError::Parse("docker inspect: expected a JSON array".to_string()))?;
    Ok(arr.iter().map(parse_container).collect())
}

#[derive(Debug, Clone)]
pub struct DockerCli {
    docker: PathBuf,
    exec: ExecService,
}

impl DockerCli {
    pub fn new(docker: PathBuf) -> Self {
        Self {
            docker,
            exec: ExecService::default(),
        }
    }

    /// Find `docker` on PATH.
    pub fn discover() -> Result<Self, RuntimeError> {
        let path = container_runtime_path()?;
        Ok(Self::new(path))
    }

    pub fn binary(&self) -> &Path {
        &self.docker
    }

    fn run_raw(
        &self,
        args: &[String],
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, RuntimeError> {
        tracing::debug!(command = %shell_join(args), "docker");
        let mut req = ExecRequest::new(self.docker.as_os_str()).args(args.iter());
        for (k, v) in env {
            req = req.env(k, v);
        }
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let out = self.exec.run(req).map_err(|e| {
            let unavailable = e
                .downcast_ref::<io::Error>()
                .map(|ioe| ioe.kind() == io::ErrorKind::NotFound)
                .unwrap_or(false);
            if unavailable {
                RuntimeError::Unavailable(e.to_string())
            } else {
                RuntimeError::Io(io::Error::other(format!("{e:#}")))
            }
        })?;
        tracing::trace!(
            subcommand = args.first().map(String::as_str).unwrap_or(""),
            code = ?out.status.code(),
            elapsed_ms = out.duration.as_millis() as u64,
            "docker finished"
        );
        Ok(out)
    }

    fn run(&self, args: &[String], timeout: Option<Duration>) -> Result<String, RuntimeError> {
        let out = self.run_raw(args, &[], timeout)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(classify_failure(args, out.status.code(), &out.stderr))
        }
    }

    fn inspect_many(&self, ids: &[String]) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
        ];
        args.extend(ids.iter().cloned());
        let out = self.run(&args, None)?;
        parse_inspect_output(&out)
    }

    fn stream(&self, args: &[String], out: &mut dyn Write) -> Result<i32, RuntimeError> {
        tracing::debug!(command = %shell_join(args), "docker (streaming)");
        let mut child = Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        if let Some(mut stdout) = child.stdout.take() {
            let mut buf = [0u8; 8192];
            loop {
                let n = match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                if out.write_all(&buf[..n]).and_then(|_| out.flush()).is_err() {
                    // reader went away (e.g. closed pipe); stop streaming
                    let _ = child.kill();
                    break;
                }
            }
        }
        let status = child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> Result<(), RuntimeError> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        self.run(&args, Some(Duration::from_secs(10))).map(|_| ())
    }

    fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let args = vec!["network".to_string(), "inspect".to_string(), name.to_string()];
        match self.run(&args, None) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        let args = vec!["network".to_string(), "create".to_string(), name.to_string()];
        match self.run(&args, None) {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn connect_network(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> Result<(), RuntimeError> {
        let args = build_connect_args(network, container, aliases);
        match self.run(&args, None) {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. })
                if stderr.contains("already exists in network") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let args = vec!["image".to_string(), "inspect".to_string(), image.to_string()];
        match self.run(&args, None) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let args = vec!["pull".to_string(), image.to_string()];
        self.run(&args, Some(Duration::ZERO)).map(|_| ())
    }

    fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            context_dir.display().to_string(),
        ];
        self.run(&args, Some(Duration::ZERO)).map(|_| ())
    }

    fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let cmd = build_create_args(spec);
        let out = self.run_raw(&cmd.args, &cmd.env, None)?;
        if !out.success() {
            return Err(classify_failure(&cmd.args, out.status.code(), &out.stderr));
        }
        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse("docker create printed no id".to_string()));
        }
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["start".to_string(), id.to_string()], None)
            .map(|_| ())
    }

    fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ];
        self.run(&args, Some(timeout + Duration::from_secs(30)))
            .map(|_| ())
    }

    fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let args = vec![
            "restart".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ];
        self.run(&args, Some(timeout + Duration::from_secs(30)))
            .map(|_| ())
    }

    fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(id.to_string());
        self.run(&args, None).map(|_| ())
    }

    fn inspect_container(&self, id: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        match self.inspect_many(&[id.to_string()]) {
            Ok(mut v) => Ok(if v.is_empty() { None } else { Some(v.remove(0)) }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_containers(&self, label: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "-q".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={label}"),
        ];
        let out = self.run(&args, None)?;
        let ids: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        match self.inspect_many(&ids) {
            Ok(v) => Ok(v),
            // A container vanished between `ps` and `inspect`; fall back to one by one.
            Err(e) if e.is_not_found() => {
                let mut v = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(info) = self.inspect_container(id)? {
                        v.push(info);
                    }
                }
                Ok(v)
            }
            Err(e) => Err(e),
        }
    }

    fn container_logs(
        &self,
        id: &str,
        tail: Option<usize>,
        timestamps: bool,
    ) -> Result<String, RuntimeError> {
        let args = build_logs_args(id, tail, timestamps, false);
        let out = self.run_raw(&args, &[], None)?;
        if !out.success() {
            return Err(classify_failure(&args, out.status.code(), &out.stderr));
        }
        // docker replays the container's stderr on ours; keep both streams.
        let mut text = out.stdout;
        text.push_str(&out.stderr);
        Ok(text)
    }

    fn follow_logs(&self, id: &str, out: &mut dyn Write) -> Result<(), RuntimeError> {
        let args = build_logs_args(id, None, false, true);
        let code = self.stream(&args, out)?;
        if code == 0 {
            Ok(())
        } else {
            Err(classify_failure(&args, Some(code), ""))
        }
    }

    fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecResult, RuntimeError> {
        let args = build_exec_args(id, cmd, false);
        let out = self.run_raw(&args, &[], None)?;
        if !out.success() && is_not_found_message(&out.stderr) {
            return Err(RuntimeError::NotFound(out.stderr.trim().to_string()));
        }
        let mut output = out.stdout;
        output.push_str(&out.stderr);
        Ok(ExecResult {
            code: out.status.code().unwrap_or(-1),
            output,
        })
    }

    fn exec_follow(
        &self,
        id: &str,
        cmd: &[String],
        out: &mut dyn Write,
    ) -> Result<i32, RuntimeError> {
        let args = build_exec_args(id, cmd, false);
        self.stream(&args, out)
    }

    fn exec_interactive(&self, id: &str, cmd: &[String]) -> RuntimeError {
        let args = build_exec_args(id, cmd, true);
        tracing::debug!(command = %shell_join(&args), "docker (exec)");
        let mut command = Command::new(&self.docker);
        command.args(&args);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = command.exec();
            RuntimeError::from(err)
        }
        #[cfg(not(unix))]
        {
            match command.status() {
                Ok(status) => std::process::exit(status.code().unwrap_or(1)),
                Err(e) => RuntimeError::from(e),
            }
        }
    }
}
