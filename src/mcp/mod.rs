/*!
MCP server definitions.

Three transports, stored under the `mcps` key of `config.yaml` as a list
tagged by `type`:

- `remote`: an existing SSE endpoint; sessions only receive its URL
- `docker`: an image that already speaks SSE, run as one container
- `proxy`: a stdio server image wrapped by an SSE proxy image built on demand

Fields are validated when a definition is constructed or loaded, so the
manager never meets a half-formed entry.
*/
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::McError;
use crate::util::reject_newlines;

pub mod manager;
pub mod proxy;

pub use manager::{McpContainer, McpLogs, McpManager, McpStartStatus, McpState, McpStatusReport};

/// Shared network every MCP container joins (alias = MCP name).
pub const MCP_NETWORK: &str = "mc-mcp-network";
/// Port an MCP `docker` image is expected to serve SSE on.
pub const DOCKER_MCP_PORT: u16 = 8080;
/// Proxy host ports are auto-assigned above this value.
pub const PROXY_PORT_BASE: u16 = 5100;

pub const LABEL_MCP: &str = "mc.mcp";
pub const LABEL_MCP_NAME: &str = "mc.mcp.name";
pub const LABEL_MCP_TYPE: &str = "mc.mcp.type";

pub fn container_name(name: &str) -> String {
    format!("mc_mcp_{name}")
}

/// Per-MCP network sessions join to resolve the MCP by its short name.
pub fn dedicated_network(name: &str) -> String {
    format!("mc-mcp-{name}-network")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum McpKind {
    Remote,
    Docker,
    Proxy,
}

impl McpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            McpKind::Remote => "remote",
            McpKind::Docker => "docker",
            McpKind::Proxy => "proxy",
        }
    }
}

impl std::fmt::Display for McpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMcp {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerMcp {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_sse_port() -> u16 {
    8080
}

fn default_sse_host() -> String {
    "0.0.0.0".to_string()
}

fn default_allow_origin() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    #[serde(default = "default_sse_port")]
    pub sse_port: u16,
    #[serde(default = "default_sse_host")]
    pub sse_host: String,
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            sse_port: default_sse_port(),
            sse_host: default_sse_host(),
            allow_origin: default_allow_origin(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyMcp {
    pub name: String,
    pub base_image: String,
    pub proxy_image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub proxy_options: ProxyOptions,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpConfig {
    Remote(RemoteMcp),
    Docker(DockerMcp),
    Proxy(ProxyMcp),
}

fn invalid(msg: impl Into<String>) -> McError {
    McError::InvalidMcp(msg.into())
}

/// MCP names double as container, network and DNS names, and end up in
/// image repository names, which must be lowercase.
pub fn validate_name(name: &str) -> Result<(), McError> {
    let lower_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let mut chars = name.chars();
    let ok_first = chars.next().map(lower_alnum).unwrap_or(false);
    let ok_rest = chars.all(|c| lower_alnum(c) || matches!(c, '_' | '-' | '.'));
    if ok_first && ok_rest {
        Ok(())
    } else {
        Err(invalid(format!(
            "name '{name}' must start with a lowercase letter or digit and contain only [a-z0-9_.-]"
        )))
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), McError> {
    if value.trim().is_empty() {
        Err(invalid(format!("'{field}' is required")))
    } else {
        Ok(())
    }
}

fn validate_env(env: &BTreeMap<String, String>) -> Result<(), McError> {
    for (k, v) in env {
        if k.is_empty() || k.contains('=') || k.chars().any(char::is_whitespace) {
            return Err(invalid(format!("invalid environment variable name '{k}'")));
        }
        reject_newlines(v, &format!("value of {k}")).map_err(invalid)?;
    }
    Ok(())
}

impl RemoteMcp {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Result<Self, McError> {
        let m = Self {
            name: name.into(),
            url: url.into(),
            headers,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<(), McError> {
        validate_name(&self.name)?;
        require_non_empty("url", &self.url)?;
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| invalid(format!("url '{}': {e}", self.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "url '{}' must use http or https",
                self.url
            )));
        }
        Ok(())
    }
}

impl DockerMcp {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        command: impl Into<String>,
        env: BTreeMap<String, String>,
    ) -> Result<Self, McError> {
        let m = Self {
            name: name.into(),
            image: image.into(),
            command: command.into(),
            env,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<(), McError> {
        validate_name(&self.name)?;
        require_non_empty("image", &self.image)?;
        validate_env(&self.env)
    }
}

impl ProxyMcp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        base_image: impl Into<String>,
        proxy_image: impl Into<String>,
        command: impl Into<String>,
        proxy_options: ProxyOptions,
        env: BTreeMap<String, String>,
        host_port: Option<u16>,
    ) -> Result<Self, McError> {
        let m = Self {
            name: name.into(),
            base_image: base_image.into(),
            proxy_image: proxy_image.into(),
            command: command.into(),
            proxy_options,
            env,
            host_port,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<(), McError> {
        validate_name(&self.name)?;
        require_non_empty("base_image", &self.base_image)?;
        require_non_empty("proxy_image", &self.proxy_image)?;
        if self.proxy_options.sse_port == 0 {
            return Err(invalid("'proxy_options.sse_port' must be non-zero"));
        }
        if self.host_port == Some(0) {
            return Err(invalid("'host_port' must be non-zero"));
        }
        // These end up in a generated Dockerfile.
        for (field, v) in [
            ("command", &self.command),
            ("base_image", &self.base_image),
            ("proxy_image", &self.proxy_image),
            ("proxy_options.sse_host", &self.proxy_options.sse_host),
            ("proxy_options.allow_origin", &self.proxy_options.allow_origin),
        ] {
            reject_newlines(v, field).map_err(invalid)?;
        }
        validate_env(&self.env)
    }
}

impl McpConfig {
    pub fn name(&self) -> &str {
        match self {
            McpConfig::Remote(m) => &m.name,
            McpConfig::Docker(m) => &m.name,
            McpConfig::Proxy(m) => &m.name,
        }
    }

    pub fn kind(&self) -> McpKind {
        match self {
            McpConfig::Remote(_) => McpKind::Remote,
            McpConfig::Docker(_) => McpKind::Docker,
            McpConfig::Proxy(_) => McpKind::Proxy,
        }
    }

    pub fn validate(&self) -> Result<(), McError> {
        match self {
            McpConfig::Remote(m) => m.validate(),
            McpConfig::Docker(m) => m.validate(),
            McpConfig::Proxy(m) => m.validate(),
        }
    }

    /// Port the MCP serves SSE on inside its container; `None` for remote.
    pub fn sse_port(&self) -> Option<u16> {
        match self {
            McpConfig::Remote(_) => None,
            McpConfig::Docker(_) => Some(DOCKER_MCP_PORT),
            McpConfig::Proxy(p) => Some(p.proxy_options.sse_port),
        }
    }

    /// Decode and validate one stored entry.
    pub fn from_value(v: serde_yaml::Value) -> Result<Self, McError> {
        let cfg: McpConfig =
            serde_yaml::from_value(v).map_err(|e| McError::InvalidMcp(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Next free proxy host port: one above the highest assigned, starting at 5101.
pub fn next_proxy_port(existing: &[McpConfig]) -> Result<u16, McError> {
    let highest = existing
        .iter()
        .filter_map(|m| match m {
            McpConfig::Proxy(p) => p.host_port,
            _ => None,
        })
        .fold(PROXY_PORT_BASE, u16::max);
    highest
        .checked_add(1)
        .ok_or_else(|| invalid("no free proxy host port left; pass one explicitly"))
}
