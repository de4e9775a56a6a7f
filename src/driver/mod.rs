/*!
Driver registry.

A driver names the image, ports and persistent configuration of one coding
assistant. Definitions come from three places, highest precedence first:

1. bundled manifests in `MC_BUILTIN_DRIVERS_DIR` (when set)
2. bundled manifests embedded in the binary
3. user manifests under `<config dir>/drivers/<name>/`

Bundled always wins on a name collision so a user directory cannot shadow a
shipped driver. Loading is best-effort: a broken manifest is skipped with a
warning.
*/
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::McError;
use crate::paths::McPaths;

pub mod bundled;

/// Manifest file names, in lookup order.
pub const MANIFEST_FILES: &[&str] = &["mc-driver.yaml", "mai-driver.yaml"];

pub fn default_image_for(name: &str) -> String {
    format!("monadical/mc-{name}:latest")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistentKind {
    File,
    Directory,
}

impl PersistentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistentKind::File => "file",
            PersistentKind::Directory => "directory",
        }
    }
}

/// A path inside the container persisted under the project config root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: PersistentKind,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDecl {
    #[serde(rename = "mountPath")]
    pub mount_path: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitCommands {
    #[serde(default)]
    pub pre_command: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Driver {
    pub name: String,
    pub description: String,
    pub version: String,
    pub maintainer: String,
    pub image: String,
    pub environment: Vec<EnvVarSpec>,
    pub ports: Vec<u16>,
    pub volumes: Vec<VolumeDecl>,
    pub persistent_configs: Vec<PersistentConfig>,
    pub init: Option<InitCommands>,
}

// YAML happily turns `version: 1.0` into a float.
fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_yaml::Value::deserialize(d)?;
    match v {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {other:?}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    description: String,
    #[serde(deserialize_with = "string_or_number")]
    version: String,
    maintainer: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    environment: Vec<EnvVarSpec>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    volumes: Vec<VolumeDecl>,
    #[serde(default)]
    persistent_configs: Vec<PersistentConfig>,
    #[serde(default)]
    init: Option<InitCommands>,
}

/// Parse a manifest document; required keys: name, description, version, maintainer.
pub fn parse_manifest(text: &str) -> Result<Driver, McError> {
    let m: Manifest =
        serde_yaml::from_str(text).map_err(|e| McError::InvalidManifest(e.to_string()))?;
    for (key, value) in [
        ("name", &m.name),
        ("description", &m.description),
        ("version", &m.version),
        ("maintainer", &m.maintainer),
    ] {
        if value.trim().is_empty() {
            return Err(McError::InvalidManifest(format!("'{key}' must not be empty")));
        }
    }
    let image = m
        .image
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default_image_for(&m.name));
    Ok(Driver {
        name: m.name,
        description: m.description,
        version: m.version,
        maintainer: m.maintainer,
        image,
        environment: m.environment,
        ports: m.ports,
        volumes: m.volumes,
        persistent_configs: m.persistent_configs,
        init: m.init,
    })
}

/// Find the manifest in a driver directory (primary name first, then legacy).
pub fn manifest_path(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
}

/// Load the driver in `dir`; `Ok(None)` when the directory has no manifest.
pub fn load_driver_from_dir(dir: &Path) -> Result<Option<Driver>, McError> {
    let Some(path) = manifest_path(dir) else {
        return Ok(None);
    };
    let text = fs::read_to_string(&path)?;
    parse_manifest(&text)
        .map(Some)
        .map_err(|e| McError::InvalidManifest(format!("{}: {e}", path.display())))
}

#[derive(Debug, Clone)]
struct Entry {
    driver: Driver,
    dir: Option<PathBuf>,
}

fn scan_dir(root: &Path) -> BTreeMap<String, Entry> {
    let mut out = BTreeMap::new();
    let Ok(rd) = fs::read_dir(root) else {
        return out;
    };
    let mut dirs: Vec<PathBuf> = rd
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        match load_driver_from_dir(&dir) {
            Ok(Some(driver)) => {
                out.insert(
                    driver.name.clone(),
                    Entry {
                        driver,
                        dir: Some(dir),
                    },
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "skipping driver"),
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    builtin: BTreeMap<String, Entry>,
    user: BTreeMap<String, Entry>,
}

impl DriverRegistry {
    /// Registry for the standard locations.
    pub fn load(paths: &McPaths) -> Self {
        Self::from_sources(
            true,
            paths.builtin_drivers_dir.as_deref(),
            Some(&paths.user_drivers_dir()),
        )
    }

    pub fn from_sources(
        embedded: bool,
        builtin_dir: Option<&Path>,
        user_dir: Option<&Path>,
    ) -> Self {
        let mut builtin = BTreeMap::new();
        if embedded {
            for (dir, text) in bundled::BUNDLED_MANIFESTS {
                match parse_manifest(text) {
                    Ok(driver) => {
                        builtin.insert(driver.name.clone(), Entry { driver, dir: None });
                    }
                    Err(e) => tracing::warn!(driver = dir, error = %e, "skipping bundled driver"),
                }
            }
        }
        if let Some(d) = builtin_dir {
            builtin.extend(scan_dir(d));
        }
        let user = user_dir.map(scan_dir).unwrap_or_default();
        Self { builtin, user }
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.builtin.get(name).or_else(|| self.user.get(name))
    }

    pub fn get(&self, name: &str) -> Option<&Driver> {
        self.entry(name).map(|e| &e.driver)
    }

    /// Resolve a driver or fail with `DriverNotFound`.
    pub fn require(&self, name: &str) -> Result<&Driver, McError> {
        self.get(name)
            .ok_or_else(|| McError::DriverNotFound(name.to_string()))
    }

    /// All drivers by name, bundled definitions winning collisions.
    pub fn list(&self) -> BTreeMap<String, Driver> {
        let mut out: BTreeMap<String, Driver> = self
            .user
            .iter()
            .map(|(k, e)| (k.clone(), e.driver.clone()))
            .collect();
        for (k, e) in &self.builtin {
            out.insert(k.clone(), e.driver.clone());
        }
        out
    }

    /// On-disk directory of a driver. Drivers embedded in the binary have none.
    pub fn path(&self, name: &str) -> Option<PathBuf> {
        if let Some(e) = self.builtin.get(name) {
            return e.dir.clone();
        }
        self.user.get(name).and_then(|e| e.dir.clone())
    }

    /// Whether `name` comes from a bundled source.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains_key(name)
    }
}
