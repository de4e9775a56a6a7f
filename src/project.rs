/*!
Project configuration locator.

Maps a project identifier (local path or repository URL) to a stable
on-host directory `<MC_HOME>/projects/<md5(identifier)>/config`, mounted
into sessions at `/mc-config`. Without a project the current working
directory is the identifier, so repeated sessions from one directory share
their configuration.
*/
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::driver::{PersistentConfig, PersistentKind};
use crate::paths::McPaths;

/// Where the project config directory is mounted inside session containers.
pub const CONTAINER_CONFIG_ROOT: &str = "/mc-config";

/// Hex md5 of a project identifier.
pub fn project_hash(identifier: &str) -> String {
    let mut h = Md5::new();
    h.update(identifier.as_bytes());
    format!("{:x}", h.finalize())
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_tilde(p: &str) -> PathBuf {
    if let Some(rest) = p.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(p)
}

/// An existing local directory, canonicalized; `None` for anything else (URLs).
pub fn local_project_dir(project: &str) -> Option<PathBuf> {
    let p = expand_tilde(project);
    if p.is_dir() {
        Some(fs::canonicalize(&p).unwrap_or(p))
    } else {
        None
    }
}

fn current_dir_identifier() -> String {
    env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

/// Identifier hashed for a project: the absolute path for local directories,
/// the string itself for remote references, the CWD when absent.
pub fn project_identifier(project: Option<&str>) -> String {
    match project.map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => local_project_dir(p)
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| p.to_string()),
        None => current_dir_identifier(),
    }
}

/// A persistent-config entry resolved against a host config root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentLink {
    pub source: String,
    pub target: String,
    pub kind: PersistentKind,
    pub host_path: PathBuf,
}

impl PersistentLink {
    /// `source:target:kind`, as consumed by the container init script.
    pub fn to_env_entry(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.kind.as_str())
    }
}

/// Join `MC_PERSISTENT_LINKS` entries.
pub fn persistent_links_env(links: &[PersistentLink]) -> String {
    links
        .iter()
        .map(PersistentLink::to_env_entry)
        .collect::<Vec<_>>()
        .join(";")
}

#[derive(Debug, Clone)]
pub struct ProjectConfigLocator {
    projects_dir: PathBuf,
}

impl ProjectConfigLocator {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    pub fn from_paths(paths: &McPaths) -> Self {
        Self::new(paths.projects_dir())
    }

    /// Host directory for a project, created if absent. Never fails;
    /// creation errors are logged and the path is still returned.
    pub fn resolve(&self, project: Option<&str>) -> PathBuf {
        let identifier = project_identifier(project);
        let dir = self
            .projects_dir
            .join(project_hash(&identifier))
            .join("config");
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not create project config directory");
        } else {
            tracing::debug!(project = %identifier, dir = %dir.display(), "project config directory");
        }
        dir
    }

    /// Host path backing an in-container target under `/mc-config`.
    pub fn host_path_for_target(config_root: &Path, target: &str) -> PathBuf {
        let rel = target
            .strip_prefix(CONTAINER_CONFIG_ROOT)
            .unwrap_or(target)
            .trim_start_matches('/');
        config_root.join(rel)
    }

    /// Create host directories (or file parents) for the driver's persistent
    /// configs and return the links for the init script.
    pub fn prepare_persistent(
        config_root: &Path,
        configs: &[PersistentConfig],
    ) -> Vec<PersistentLink> {
        let mut links = Vec::with_capacity(configs.len());
        for c in configs {
            let host_path = Self::host_path_for_target(config_root, &c.target);
            let to_create = match c.kind {
                PersistentKind::Directory => Some(host_path.as_path()),
                PersistentKind::File => host_path.parent(),
            };
            if let Some(dir) = to_create {
                if let Err(e) = fs::create_dir_all(dir) {
                    tracing::warn!(path = %dir.display(), error = %e, "could not prepare persistent config path");
                }
            }
            links.push(PersistentLink {
                source: c.source.clone(),
                target: c.target.clone(),
                kind: c.kind,
                host_path,
            });
        }
        links
    }
}
