//! Sessions: one driver container plus its recorded metadata.
//!
//! Two sources of truth, each trusted for one question:
//! - the container runtime (label `mc.session`) answers "is it alive" and backs `list`
//! - the session store answers "what was it configured with" and backs `connect`/`close` lookups
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod env;
pub mod manager;
pub mod store;

pub use manager::{CreateRequest, InitLog, SessionManager};
pub use store::SessionStore;

pub const LABEL_SESSION: &str = "mc.session";
pub const LABEL_SESSION_ID: &str = "mc.session.id";
pub const LABEL_SESSION_NAME: &str = "mc.session.name";
pub const LABEL_DRIVER: &str = "mc.driver";
pub const LABEL_PROJECT: &str = "mc.project";
pub const LABEL_MCPS: &str = "mc.mcps";

/// Where a local project directory is mounted.
pub const APP_MOUNT: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Creating,
    Running,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Map a raw runtime status: exited -> stopped, created -> creating, else running.
    pub fn from_runtime(status: &str) -> Self {
        match status {
            "exited" => SessionStatus::Stopped,
            "created" => SessionStatus::Creating,
            _ => SessionStatus::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Creating => "creating",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub container_id: Option<String>,
    /// Full container environment; holds secrets.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub project: Option<String>,
    pub created_at: String,
    /// Container port -> published host port.
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub mcps: Vec<String>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub ssh: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked: BTreeMap<&str, &str> = self
            .environment
            .keys()
            .map(|k| (k.as_str(), "*****"))
            .collect();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("status", &self.status)
            .field("container_id", &self.container_id)
            .field("environment", &masked)
            .field("project", &self.project)
            .field("created_at", &self.created_at)
            .field("ports", &self.ports)
            .field("mcps", &self.mcps)
            .field("run_command", &self.run_command)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("ssh", &self.ssh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_runtime() {
        assert_eq!(SessionStatus::from_runtime("exited"), SessionStatus::Stopped);
        assert_eq!(SessionStatus::from_runtime("created"), SessionStatus::Creating);
        assert_eq!(SessionStatus::from_runtime("running"), SessionStatus::Running);
        assert_eq!(SessionStatus::from_runtime("paused"), SessionStatus::Running);
    }

    #[test]
    fn test_debug_masks_environment() {
        let mut s = Session {
            id: "abcd1234".into(),
            name: "mc-abcd1234".into(),
            driver: "goose".into(),
            status: SessionStatus::Running,
            container_id: None,
            environment: BTreeMap::new(),
            project: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            ports: BTreeMap::new(),
            mcps: vec![],
            run_command: None,
            uid: None,
            gid: None,
            model: None,
            provider: None,
            ssh: false,
        };
        s.environment
            .insert("ANTHROPIC_API_KEY".into(), "sk-ant-secret".into());
        let dbg = format!("{s:?}");
        assert!(dbg.contains("ANTHROPIC_API_KEY"));
        assert!(!dbg.contains("sk-ant-secret"));
    }
}
