#![allow(clippy::module_name_repetitions)]
//! mcontainer: local session manager for containerized AI coding assistants.
//!
//! Layout:
//! - `runtime`: the `ContainerRuntime` seam and its `docker` CLI implementation
//! - `driver`: bundled and user driver manifests
//! - `project`: per-project persistent config directories
//! - `mcp`: MCP sidecar definitions and lifecycle
//! - `session`: session lifecycle and the on-disk session store
//! - `user_config`, `paths`, `lock`: on-host configuration and its safe mutation
//! - `color`, `telemetry`: CLI presentation and logging setup

pub mod color;
pub mod driver;
pub mod errors;
pub mod lock;
pub mod mcp;
pub mod paths;
pub mod project;
pub mod runtime;
pub mod session;
pub mod telemetry;
pub mod user_config;
pub mod util;

pub use color::*;
pub use driver::{Driver, DriverRegistry};
pub use errors::{exit_code_for_error, McError, RuntimeError};
pub use mcp::{McpConfig, McpKind, McpManager};
pub use paths::McPaths;
pub use project::ProjectConfigLocator;
pub use runtime::docker::DockerCli;
pub use runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
pub use session::{CreateRequest, InitLog, Session, SessionManager, SessionStatus, SessionStore};
pub use user_config::UserConfig;
