use std::process::ExitCode;

use mcontainer::mcp::{McpLogs, McpManager, McpState, ProxyOptions};
use mcontainer::{McError, McpConfig};

use super::{format_table, key_values, plain, Context};
use crate::cli::McpCmd;

fn manager(ctx: &Context) -> Result<McpManager, McError> {
    Ok(McpManager::new(ctx.runtime()?, ctx.paths.config_file()))
}

// Listing and editing definitions does not need a daemon.
fn offline_manager(ctx: &Context) -> McpManager {
    McpManager::new(
        std::sync::Arc::new(mcontainer::runtime::docker::DockerCli::new("docker".into())),
        ctx.paths.config_file(),
    )
}

fn target(mcp: &McpConfig) -> String {
    match mcp {
        McpConfig::Remote(r) => r.url.clone(),
        McpConfig::Docker(d) => d.image.clone(),
        McpConfig::Proxy(p) => match p.host_port {
            Some(port) => format!("{} (localhost:{port})", p.base_image),
            None => p.base_image.clone(),
        },
    }
}

fn list(ctx: &Context) -> ExitCode {
    let mcps = match offline_manager(ctx).list() {
        Ok(m) => m,
        Err(e) => return ctx.fail(&e),
    };
    if mcps.is_empty() {
        ctx.info("No MCP servers configured.");
        return ExitCode::SUCCESS;
    }
    let rows: Vec<Vec<String>> = mcps
        .iter()
        .map(|m| vec![m.name().to_string(), m.kind().to_string(), target(m)])
        .collect();
    for line in format_table(&["NAME", "TYPE", "TARGET"], &rows, &plain) {
        println!("{line}");
    }
    ExitCode::SUCCESS
}

fn saved(ctx: &Context, result: Result<McpConfig, McError>) -> ExitCode {
    match result {
        Ok(m) => {
            ctx.info(&format!("Saved {} MCP '{}'.", m.kind(), m.name()));
            ExitCode::SUCCESS
        }
        Err(e) => ctx.fail(&e),
    }
}

fn status(ctx: &Context, name: &str) -> ExitCode {
    let report = match manager(ctx).and_then(|m| m.status(name)) {
        Ok(r) => r,
        Err(e) => return ctx.fail(&e),
    };
    println!("name:    {}", report.name);
    println!("type:    {}", report.kind);
    println!("state:   {}", ctx.status_word(report.state.as_str()));
    if let Some(url) = &report.url {
        println!("url:     {url}");
    }
    if let Some(id) = &report.container_id {
        println!("id:      {id}");
    }
    if let Some(image) = &report.image {
        println!("image:   {image}");
    }
    if let Some(created) = &report.created {
        println!("created: {created}");
    }
    for (port, host) in &report.ports {
        match host {
            Some(h) => println!("port:    {port} -> localhost:{h}"),
            None => println!("port:    {port}"),
        }
    }
    if let Some(err) = &report.error {
        ctx.error(&format!("mc: {err}"));
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn containers(ctx: &Context) -> ExitCode {
    let items = match manager(ctx).and_then(|m| m.list_containers()) {
        Ok(c) => c,
        Err(e) => return ctx.fail(&e),
    };
    if items.is_empty() {
        ctx.info("No MCP containers.");
        return ExitCode::SUCCESS;
    }
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|c| {
            let ports = c
                .ports
                .iter()
                .map(|(p, h)| match h {
                    Some(h) => format!("{h}->{p}"),
                    None => p.clone(),
                })
                .collect::<Vec<_>>()
                .join(",");
            vec![
                c.name.clone(),
                c.kind.clone(),
                c.state.as_str().to_string(),
                c.image.clone(),
                if ports.is_empty() { "-".to_string() } else { ports },
                c.container_id.chars().take(12).collect(),
            ]
        })
        .collect();
    let decorate = |col: usize, cell: &str| {
        if col == 2 {
            ctx.status_word(cell)
        } else {
            cell.to_string()
        }
    };
    for line in format_table(&["NAME", "TYPE", "STATE", "IMAGE", "PORTS", "CONTAINER"], &rows, &decorate) {
        println!("{line}");
    }
    ExitCode::SUCCESS
}

pub(crate) fn run(ctx: &Context, cmd: McpCmd) -> ExitCode {
    match cmd {
        McpCmd::List => list(ctx),
        McpCmd::AddRemote { name, url, headers } => saved(
            ctx,
            offline_manager(ctx).add_remote(&name, &url, key_values(&headers)),
        ),
        McpCmd::AddDocker {
            name,
            image,
            command,
            env,
        } => saved(
            ctx,
            offline_manager(ctx).add_docker(&name, &image, &command, key_values(&env)),
        ),
        McpCmd::AddProxy {
            name,
            base_image,
            proxy_image,
            command,
            sse_port,
            sse_host,
            allow_origin,
            host_port,
            env,
        } => {
            let options = ProxyOptions {
                sse_port,
                sse_host,
                allow_origin,
            };
            saved(
                ctx,
                offline_manager(ctx).add_proxy(
                    &name,
                    &base_image,
                    &proxy_image,
                    &command,
                    options,
                    key_values(&env),
                    host_port,
                ),
            )
        }
        McpCmd::Remove { name } => match manager(ctx).and_then(|m| m.remove(&name)) {
            Ok(true) => {
                ctx.info(&format!("Removed MCP '{name}'."));
                ExitCode::SUCCESS
            }
            Ok(false) => ctx.fail(&McError::McpNotFound(name)),
            Err(e) => ctx.fail(&e),
        },
        McpCmd::Start { name } => match manager(ctx).and_then(|m| m.start(&name)) {
            Ok(st) if st.state == McpState::NotApplicable => {
                ctx.info(&format!("MCP '{name}' is remote; nothing to start."));
                ExitCode::SUCCESS
            }
            Ok(st) => {
                ctx.info(&format!("MCP '{name}' is {}.", st.state));
                ExitCode::SUCCESS
            }
            Err(e) => ctx.fail(&e),
        },
        McpCmd::Stop { name } => match manager(ctx).and_then(|m| m.stop(&name)) {
            Ok(true) => {
                ctx.info(&format!("Stopped MCP '{name}'."));
                ExitCode::SUCCESS
            }
            Ok(false) => {
                ctx.info(&format!("MCP '{name}' was not running."));
                ExitCode::SUCCESS
            }
            Err(e) => ctx.fail(&e),
        },
        McpCmd::Restart { name } => match manager(ctx).and_then(|m| m.restart(&name)) {
            Ok(st) => {
                ctx.info(&format!("MCP '{name}' is {}.", st.state));
                ExitCode::SUCCESS
            }
            Err(e) => ctx.fail(&e),
        },
        McpCmd::Status { name } => status(ctx, &name),
        McpCmd::Logs { name, tail } => match manager(ctx).and_then(|m| m.logs(&name, tail)) {
            Ok(McpLogs::Logs(text)) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Ok(McpLogs::NotApplicable) => {
                ctx.info(&format!("MCP '{name}' is remote; it has no container logs."));
                ExitCode::SUCCESS
            }
            Ok(McpLogs::NotFound) => {
                ctx.error(&format!("mc: no container for MCP '{name}'; start it first"));
                ExitCode::from(1)
            }
            Ok(McpLogs::Failed(msg)) => {
                ctx.error(&format!("mc: {msg}"));
                ExitCode::from(1)
            }
            Err(e) => ctx.fail(&e),
        },
        McpCmd::Containers => containers(ctx),
    }
}
