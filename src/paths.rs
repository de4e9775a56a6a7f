//! On-host locations used by `mc`.
//!
//! - `MC_CONFIG_DIR` (default `~/.config/mc`): `config.yaml`, `sessions.yaml`, `drivers/`
//! - `MC_HOME` (default `~/.mc`): `projects/<md5>/config`
//! - `MC_BUILTIN_DRIVERS_DIR`: bundled driver manifests overriding the embedded ones
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McPaths {
    pub config_dir: PathBuf,
    pub home_dir: PathBuf,
    pub builtin_drivers_dir: Option<PathBuf>,
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn user_home() -> PathBuf {
    home::home_dir()
        .or_else(|| env_path("HOME"))
        .unwrap_or_else(env::temp_dir)
}

impl McPaths {
    /// Resolve locations from the environment with home-relative defaults.
    pub fn from_env() -> Self {
        let home = user_home();
        let config_dir = env_path("MC_CONFIG_DIR").unwrap_or_else(|| home.join(".config").join("mc"));
        let home_dir = env_path("MC_HOME").unwrap_or_else(|| home.join(".mc"));
        Self {
            config_dir,
            home_dir,
            builtin_drivers_dir: env_path("MC_BUILTIN_DRIVERS_DIR"),
        }
    }

    /// Root everything under `root` (tests, sandboxes).
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            home_dir: root.join("home"),
            builtin_drivers_dir: None,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.yaml")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.config_dir.join("sessions.yaml")
    }

    pub fn user_drivers_dir(&self) -> PathBuf {
        self.config_dir.join("drivers")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.home_dir.join("projects")
    }
}
