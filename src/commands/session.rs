use std::io::Write;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};

use mcontainer::project::expand_tilde;
use mcontainer::runtime::VolumeMount;
use mcontainer::{CreateRequest, McError, Session, SessionManager};

use super::{format_table, key_values, Context};
use crate::cli::SessionCmd;

/// Parse `HOST:CONTAINER[:MODE]`; a relative host path is made absolute.
pub(crate) fn parse_volume(spec: &str) -> Result<VolumeMount, String> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (host, container, mode) = match parts.as_slice() {
        [h, c] => (*h, *c, None),
        [h, c, m] => (*h, *c, Some(*m)),
        _ => return Err(format!("expected HOST:CONTAINER[:MODE], got '{spec}'")),
    };
    if host.is_empty() || !container.starts_with('/') {
        return Err(format!("invalid volume '{spec}'"));
    }
    let mut host_path = expand_tilde(host);
    if host_path.is_relative() {
        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        host_path = cwd.join(host_path);
    }
    let mut v = VolumeMount::new(host_path.display().to_string(), container);
    if let Some(m) = mode {
        if !matches!(m, "ro" | "rw") {
            return Err(format!("invalid volume mode '{m}' in '{spec}'"));
        }
        v = v.with_mode(m);
    }
    Ok(v)
}

fn manager(ctx: &Context) -> Result<SessionManager, McError> {
    SessionManager::from_paths(ctx.runtime()?, &ctx.paths)
}

fn ports_cell(s: &Session) -> String {
    if s.ports.is_empty() {
        return "-".to_string();
    }
    s.ports
        .iter()
        .map(|(c, h)| format!("{h}->{c}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn print_sessions(ctx: &Context, sessions: &[Session]) {
    if sessions.is_empty() {
        ctx.info("No active sessions.");
        return;
    }
    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.name.clone(),
                s.driver.clone(),
                s.status.to_string(),
                ports_cell(s),
                if s.mcps.is_empty() { "-".to_string() } else { s.mcps.join(",") },
                s.project.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    let header = ["ID", "NAME", "DRIVER", "STATUS", "PORTS", "MCPS", "PROJECT"];
    let decorate = |col: usize, cell: &str| {
        if col == 3 {
            ctx.status_word(cell)
        } else {
            cell.to_string()
        }
    };
    for line in format_table(&header, &rows, &decorate) {
        println!("{line}");
    }
}

fn connect(ctx: &Context, mgr: &SessionManager, id: &str) -> ExitCode {
    match mgr.connect(id) {
        Ok(never) => match never {},
        Err(e) => ctx.fail(&e),
    }
}

fn create(ctx: &Context, cmd: SessionCmd) -> ExitCode {
    let SessionCmd::Create {
        project,
        driver,
        name,
        env,
        volumes,
        networks,
        mcps,
        run_command,
        no_shell,
        no_mount,
        no_connect,
        uid,
        gid,
        model,
        provider,
        ssh,
    } = cmd
    else {
        return ExitCode::from(2);
    };
    let cfg = match ctx.user_config() {
        Ok(c) => c,
        Err(e) => return ctx.fail(&e),
    };
    let mut mounts = Vec::with_capacity(volumes.len());
    for v in &volumes {
        match parse_volume(v) {
            Ok(m) => mounts.push(m),
            Err(msg) => {
                ctx.error(&format!("mc: {msg}"));
                return ExitCode::from(2);
            }
        }
    }

    let mut req = CreateRequest::new(driver.unwrap_or_else(|| cfg.default_driver()));
    req.project = project;
    req.name = name;
    req.environment = cfg.service_environment();
    req.environment.extend(key_values(&env));
    req.mount_local = cfg.mount_local() && !no_mount;
    req.volumes = mounts;
    req.networks = cfg.default_networks();
    req.networks.extend(networks);
    req.mcps = mcps;
    req.run_command = run_command;
    req.no_shell = no_shell;
    req.uid = uid;
    req.gid = gid;
    req.model = model.or_else(|| cfg.default_model());
    req.provider = provider.or_else(|| cfg.default_provider());
    req.ssh = ssh;

    let mgr = match manager(ctx) {
        Ok(m) => m,
        Err(e) => return ctx.fail(&e),
    };
    ctx.info(&format!("Creating {} session...", req.driver));
    let session = match mgr.create(&req) {
        Ok(s) => s,
        Err(e) => return ctx.fail(&e),
    };
    let dropped: Vec<&String> = req
        .mcps
        .iter()
        .filter(|m| !session.mcps.contains(m))
        .collect();
    for m in dropped {
        ctx.warn(&format!("MCP '{m}' could not be started; session continues without it"));
    }
    println!("Session created: {} ({})", session.id, session.name);
    for (c, h) in &session.ports {
        println!("  port {c} -> localhost:{h}");
    }
    if no_connect || !cfg.get_bool("defaults.connect", true) {
        return ExitCode::SUCCESS;
    }
    connect(ctx, &mgr, &session.id)
}

fn close(ctx: &Context, id: Option<String>, all: bool) -> ExitCode {
    let mgr = match manager(ctx) {
        Ok(m) => m,
        Err(e) => return ctx.fail(&e),
    };
    if all {
        let use_err = ctx.use_err;
        let failed = AtomicUsize::new(0);
        let (count, _) = mgr.close_all(&|s: &Session, ok: bool| {
            if ok {
                mcontainer::log_info_stderr(use_err, &format!("closed {}", s.id));
            } else {
                failed.fetch_add(1, Ordering::SeqCst);
                mcontainer::log_warn_stderr(use_err, &format!("failed to close {}", s.id));
            }
        });
        let failed = failed.load(Ordering::SeqCst);
        if count == 0 && failed == 0 {
            ctx.info("No active sessions.");
        } else {
            ctx.info(&format!("Closed {count} session(s)."));
        }
        return if failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        };
    }
    let Some(id) = id else {
        return ExitCode::from(2);
    };
    if mgr.close(&id) {
        ctx.info(&format!("Session {id} closed."));
        ExitCode::SUCCESS
    } else {
        ctx.error(&format!("mc: session '{id}' not found or could not be closed"));
        ExitCode::from(1)
    }
}

fn logs(ctx: &Context, id: &str, init: bool, follow: bool, tail: Option<usize>) -> ExitCode {
    let mgr = match manager(ctx) {
        Ok(m) => m,
        Err(e) => return ctx.fail(&e),
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let ok = match (init, follow) {
        (true, true) => mgr.follow_init_logs(id, &mut out),
        (true, false) => match mgr.init_logs(id) {
            Some(log) => {
                let _ = out.write_all(log.text.as_bytes());
                if !log.complete {
                    ctx.info("Initialization still running; use -f to follow.");
                }
                true
            }
            None => false,
        },
        (false, true) => mgr.follow_logs(id, &mut out),
        (false, false) => match mgr.logs(id, tail) {
            Some(text) => {
                let _ = out.write_all(text.as_bytes());
                true
            }
            None => false,
        },
    };
    let _ = out.flush();
    if ok {
        ExitCode::SUCCESS
    } else {
        ctx.error(&format!("mc: no logs for session '{id}'"));
        ExitCode::from(1)
    }
}

pub(crate) fn run(ctx: &Context, cmd: SessionCmd) -> ExitCode {
    match cmd {
        c @ SessionCmd::Create { .. } => create(ctx, c),
        SessionCmd::List => match manager(ctx).and_then(|m| m.list()) {
            Ok(sessions) => {
                print_sessions(ctx, &sessions);
                ExitCode::SUCCESS
            }
            Err(e) => ctx.fail(&e),
        },
        SessionCmd::Close { id, all } => close(ctx, id, all),
        SessionCmd::Connect { id } => match manager(ctx) {
            Ok(mgr) => connect(ctx, &mgr, &id),
            Err(e) => ctx.fail(&e),
        },
        SessionCmd::Logs {
            id,
            init,
            follow,
            tail,
        } => logs(ctx, &id, init, follow, tail),
        SessionCmd::Prune => match manager(ctx).and_then(|m| m.prune_stale()) {
            Ok(ids) if ids.is_empty() => {
                ctx.info("Session store is up to date.");
                ExitCode::SUCCESS
            }
            Ok(ids) => {
                for id in &ids {
                    println!("{id}");
                }
                ctx.info(&format!("Pruned {} stale record(s).", ids.len()));
                ExitCode::SUCCESS
            }
            Err(e) => ctx.fail(&e),
        },
    }
}
