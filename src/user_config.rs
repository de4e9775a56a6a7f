/*!
User configuration (`config.yaml`).

A YAML document addressed with dot paths (`defaults.driver`,
`services.openai.api_key`). Missing keys fall back to a built-in default
document. Shorthand service paths (`openai.api_key`) expand to
`services.openai.api_key`. The MCP server list lives under `mcps`.

Mutations go through [`UserConfig::modify`], which reloads the file under
an exclusive lock, applies the change and writes it back atomically.
*/
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::errors::McError;
use crate::lock::{lock_document, DEFAULT_LOCK_WAIT};
use crate::util::fs::write_private_atomic;

/// Top-level sections that are never treated as service shorthands.
const SECTIONS: &[&str] = &["defaults", "docker", "remote", "ui", "services", "mcps"];

/// Config path -> container environment variable.
pub const ENV_MAPPINGS: &[(&str, &str)] = &[
    ("services.langfuse.url", "LANGFUSE_URL"),
    ("services.langfuse.public_key", "LANGFUSE_INIT_PROJECT_PUBLIC_KEY"),
    ("services.langfuse.secret_key", "LANGFUSE_INIT_PROJECT_SECRET_KEY"),
    ("services.openai.api_key", "OPENAI_API_KEY"),
    ("services.anthropic.api_key", "ANTHROPIC_API_KEY"),
    ("services.openrouter.api_key", "OPENROUTER_API_KEY"),
    ("services.google.api_key", "GOOGLE_API_KEY"),
];

const SENSITIVE_MARKERS: &[&str] = &["key", "token", "secret", "password"];

pub const DEFAULT_NETWORK: &str = "mc-network";
pub const DEFAULT_DRIVER: &str = "goose";

fn default_document() -> Value {
    let text = r#"
defaults:
  driver: goose
  connect: true
  mount_local: true
  networks: []
services:
  langfuse: {}
  openai: {}
  anthropic: {}
  openrouter: {}
  google: {}
docker:
  network: mc-network
ui:
  colors: true
  verbose: false
"#;
    serde_yaml::from_str(text).unwrap_or_else(|_| Value::Mapping(Mapping::new()))
}

// Fill keys missing from `dst` with values from `src`, recursing into mappings.
fn merge_defaults(src: &Value, dst: &mut Value) {
    if let (Value::Mapping(s), Value::Mapping(d)) = (src, dst) {
        for (k, v) in s {
            match d.get_mut(k) {
                None => {
                    d.insert(k.clone(), v.clone());
                }
                Some(existing) => merge_defaults(v, existing),
            }
        }
    }
}

/// Expand `openai.api_key` to `services.openai.api_key`.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    match key.split_once('.') {
        Some((head, _)) if !SECTIONS.contains(&head) => format!("services.{key}"),
        _ => key.to_string(),
    }
}

/// Parse a CLI value: YAML scalars/lists when they parse, plain string otherwise.
pub fn parse_value(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Mapping(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(Value::Null) if !raw.trim().is_empty() && raw.trim() != "null" && raw.trim() != "~" => {
            Value::String(raw.to_string())
        }
        Ok(v) => v,
    }
}

/// Resolve a `${VAR}` reference against the process environment.
pub fn resolve_env_reference(value: &str) -> String {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(name) => env::var(name).unwrap_or_default(),
        None => value.to_string(),
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Sequence(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|i| scalar_to_string(i).unwrap_or_else(|| display_value(i)))
                .collect();
            format!("[{}]", parts.join(", "))
        }
        other => scalar_to_string(other).unwrap_or_else(|| {
            serde_yaml::to_string(other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        }),
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Sequence(s) => !s.is_empty(),
        Value::Mapping(m) => !m.is_empty(),
        _ => true,
    }
}

#[derive(Debug, Clone)]
pub struct UserConfig {
    path: PathBuf,
    /// The document as stored on disk; this is what gets saved.
    raw: Value,
    /// `raw` merged over the defaults; this is what gets read.
    doc: Value,
}

impl UserConfig {
    /// Load `path`, merged over defaults. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, McError> {
        let raw = Self::read_document(path)?;
        let mut cfg = Self {
            path: path.to_path_buf(),
            raw,
            doc: Value::Null,
        };
        cfg.refresh();
        Ok(cfg)
    }

    fn read_document(path: &Path) -> Result<Value, McError> {
        let doc = match fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => serde_yaml::from_str::<Value>(&text)
                .map_err(|e| McError::Config(format!("{}: {e}", path.display())))?,
            Ok(_) => Value::Mapping(Mapping::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Mapping(Mapping::new()),
            Err(e) => return Err(e.into()),
        };
        if !doc.is_mapping() {
            return Err(McError::Config(format!(
                "{}: top level must be a mapping",
                path.display()
            )));
        }
        Ok(doc)
    }

    fn refresh(&mut self) {
        let mut doc = self.raw.clone();
        merge_defaults(&default_document(), &mut doc);
        self.doc = doc;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the stored document (0600, atomic). Defaults are not written out.
    pub fn save(&self) -> Result<(), McError> {
        let text = serde_yaml::to_string(&self.raw)?;
        write_private_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }

    /// Locked read-modify-write: reload from disk, apply `f`, save.
    ///
    /// When `f` fails nothing is written and the reloaded state is kept.
    pub fn modify<R>(
        &mut self,
        f: impl FnOnce(&mut UserConfig) -> Result<R, McError>,
    ) -> Result<R, McError> {
        let _lock = lock_document(&self.path, DEFAULT_LOCK_WAIT)?;
        self.raw = Self::read_document(&self.path)?;
        self.refresh();
        let before = self.raw.clone();
        match f(self) {
            Ok(out) => {
                self.save()?;
                Ok(out)
            }
            Err(e) => {
                self.raw = before;
                self.refresh();
                Err(e)
            }
        }
    }

    /// Reset to the default document and save.
    pub fn reset(&mut self) -> Result<(), McError> {
        self.modify(|c| {
            c.raw = default_document();
            c.refresh();
            Ok(())
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let key = normalize_key(key);
        let mut cur = &self.doc;
        for part in key.split('.') {
            cur = cur.as_mapping()?.get(part)?;
        }
        Some(cur)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_to_string)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes" | "on"),
            _ => default,
        }
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Sequence(items)) => items.iter().filter_map(scalar_to_string).collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set a value in memory (use inside [`UserConfig::modify`] to persist).
    pub fn set(&mut self, key: &str, value: Value) {
        Self::set_in(&mut self.raw, key, value);
        self.refresh();
    }

    fn set_in(doc: &mut Value, key: &str, value: Value) {
        let key = normalize_key(key);
        let parts: Vec<&str> = key.split('.').collect();
        let mut cur = doc;
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !cur.is_mapping() {
                *cur = Value::Mapping(Mapping::new());
            }
            let Value::Mapping(m) = cur else { return };
            let k = Value::String((*part).to_string());
            if !m.get(&k).map(Value::is_mapping).unwrap_or(false) {
                m.insert(k.clone(), Value::Mapping(Mapping::new()));
            }
            let Some(next) = m.get_mut(&k) else { return };
            cur = next;
        }
        if let (Value::Mapping(m), Some(last)) = (cur, parts.last()) {
            m.insert(Value::String((*last).to_string()), value);
        }
    }

    /// Remove a stored key; returns true when something was removed.
    /// Keys that only exist as defaults are left alone.
    pub fn unset(&mut self, key: &str) -> bool {
        let removed = Self::unset_in(&mut self.raw, key);
        self.refresh();
        removed
    }

    fn unset_in(doc: &mut Value, key: &str) -> bool {
        let key = normalize_key(key);
        let (parent, last) = match key.rsplit_once('.') {
            Some((p, l)) => (Some(p.to_string()), l.to_string()),
            None => (None, key.clone()),
        };
        let mut cur = doc;
        if let Some(parent) = parent {
            for part in parent.split('.') {
                let Some(next) = cur.as_mapping_mut().and_then(|m| m.get_mut(part)) else {
                    return false;
                };
                cur = next;
            }
        }
        cur.as_mapping_mut()
            .map(|m| m.remove(last.as_str()).is_some())
            .unwrap_or(false)
    }

    /// Flattened `(key, value)` pairs, sorted, secret-looking values masked.
    pub fn list(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, v: &Value, out: &mut Vec<(String, String)>) {
            match v {
                Value::Mapping(m) if !m.is_empty() || prefix.is_empty() => {
                    for (k, child) in m {
                        let Some(k) = scalar_to_string(k) else { continue };
                        let full = if prefix.is_empty() {
                            k
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&full, child, out);
                    }
                }
                Value::Mapping(_) => {}
                other => {
                    let lower = prefix.to_ascii_lowercase();
                    let sensitive = SENSITIVE_MARKERS.iter().any(|m| lower.contains(m));
                    let shown = if sensitive && is_truthy(other) {
                        "*****".to_string()
                    } else {
                        display_value(other)
                    };
                    out.push((prefix.to_string(), shown));
                }
            }
        }
        let mut out = Vec::new();
        // The MCP list has its own listing command.
        let mut doc = self.doc.clone();
        if let Some(m) = doc.as_mapping_mut() {
            m.remove("mcps");
        }
        walk("", &doc, &mut out);
        out.sort();
        out
    }

    /// Container environment derived from `services.*` (with `${VAR}` resolution).
    pub fn service_environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for (path, var) in ENV_MAPPINGS {
            let Some(v) = self.get(path) else { continue };
            if !is_truthy(v) {
                continue;
            }
            if let Some(s) = scalar_to_string(v) {
                env.insert((*var).to_string(), resolve_env_reference(&s));
            }
        }
        env
    }

    pub fn default_driver(&self) -> String {
        self.get_string("defaults.driver")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DRIVER.to_string())
    }

    pub fn default_networks(&self) -> Vec<String> {
        self.get_string_list("defaults.networks")
    }

    pub fn mount_local(&self) -> bool {
        self.get_bool("defaults.mount_local", true)
    }

    pub fn default_model(&self) -> Option<String> {
        self.get_string("defaults.model").filter(|s| !s.is_empty())
    }

    pub fn default_provider(&self) -> Option<String> {
        self.get_string("defaults.provider").filter(|s| !s.is_empty())
    }

    /// Primary session network (`docker.network`).
    pub fn network(&self) -> String {
        self.get_string("docker.network")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string())
    }

    /// Raw `mcps` entries.
    pub fn mcps_value(&self) -> Value {
        self.doc
            .as_mapping()
            .and_then(|m| m.get("mcps"))
            .cloned()
            .unwrap_or(Value::Sequence(Vec::new()))
    }

    pub fn set_mcps_value(&mut self, v: Value) {
        if let Some(m) = self.raw.as_mapping_mut() {
            m.insert(Value::String("mcps".to_string()), v);
        }
        self.refresh();
    }
}
