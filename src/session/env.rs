/*!
Session container environment.

Layering, lowest precedence first:
1. seed values: `MC_USER_ID`, `MC_GROUP_ID`, `MC_SSH_ENABLED`
2. host passthrough of provider API keys the caller did not set
3. caller-supplied variables
4. values owned by `mc` itself (config mount, persistent links, run command,
   model/provider, MCP endpoints)
*/
use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::mcp::McpConfig;

/// Provider keys copied from the host when present and not set by the caller.
pub static PASSTHROUGH_KEYS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "OPENAI_API_KEY",
        "ANTHROPIC_API_KEY",
        "OPENROUTER_API_KEY",
        "GOOGLE_API_KEY",
    ]
});

/// Effective uid/gid: explicit values, else the invoking user.
pub fn effective_ids(uid: Option<u32>, gid: Option<u32>) -> (u32, u32) {
    #[cfg(unix)]
    {
        (
            uid.unwrap_or_else(|| nix::unistd::getuid().as_raw()),
            gid.unwrap_or_else(|| nix::unistd::getgid().as_raw()),
        )
    }
    #[cfg(not(unix))]
    {
        (uid.unwrap_or(1000), gid.unwrap_or(1000))
    }
}

/// Layers 1-3.
pub fn seed_environment(
    caller: &BTreeMap<String, String>,
    uid: u32,
    gid: u32,
    ssh: bool,
    host_lookup: &dyn Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("MC_USER_ID".to_string(), uid.to_string());
    env.insert("MC_GROUP_ID".to_string(), gid.to_string());
    env.insert("MC_SSH_ENABLED".to_string(), ssh.to_string());
    for key in PASSTHROUGH_KEYS.iter() {
        if caller.contains_key(*key) {
            continue;
        }
        if let Some(v) = host_lookup(key).filter(|v| !v.is_empty()) {
            env.insert((*key).to_string(), v);
        }
    }
    for (k, v) in caller {
        env.insert(k.clone(), v.clone());
    }
    env
}

/// Split `provider/model` when no explicit provider is given.
pub fn split_model_provider(
    model: Option<&str>,
    provider: Option<&str>,
) -> (Option<String>, Option<String>) {
    let provider = provider.map(str::trim).filter(|s| !s.is_empty());
    let model = model.map(str::trim).filter(|s| !s.is_empty());
    match (model, provider) {
        (Some(m), None) => match m.split_once('/') {
            Some((p, rest)) if !p.is_empty() && !rest.is_empty() => {
                (Some(rest.to_string()), Some(p.to_string()))
            }
            _ => (Some(m.to_string()), None),
        },
        (m, p) => (m.map(str::to_string), p.map(str::to_string)),
    }
}

/// `http://<name>:<port>/sse`
pub fn mcp_sse_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}/sse")
}

/// Indexed `MCP_<i>_*` variables plus `MCP_COUNT` / `MCP_NAMES`.
pub fn mcp_environment(mcps: &[McpConfig]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("MCP_COUNT".to_string(), mcps.len().to_string());
    let names: Vec<&str> = mcps.iter().map(McpConfig::name).collect();
    env.insert(
        "MCP_NAMES".to_string(),
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string()),
    );
    for (i, mcp) in mcps.iter().enumerate() {
        let p = format!("MCP_{i}_");
        env.insert(format!("{p}TYPE"), mcp.kind().as_str().to_string());
        env.insert(format!("{p}NAME"), mcp.name().to_string());
        match mcp {
            McpConfig::Remote(r) => {
                env.insert(format!("{p}URL"), r.url.clone());
                if !r.headers.is_empty() {
                    if let Ok(h) = serde_json::to_string(&r.headers) {
                        env.insert(format!("{p}HEADERS"), h);
                    }
                }
            }
            McpConfig::Docker(_) | McpConfig::Proxy(_) => {
                let port = mcp.sse_port().unwrap_or(crate::mcp::DOCKER_MCP_PORT);
                env.insert(format!("{p}HOST"), mcp.name().to_string());
                env.insert(format!("{p}PORT"), port.to_string());
                env.insert(format!("{p}URL"), mcp_sse_url(mcp.name(), port));
            }
        }
    }
    env
}
