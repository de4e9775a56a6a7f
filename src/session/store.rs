//! Durable session index (`sessions.yaml`): session id -> record.
//!
//! Independent of runtime state; reconciled against it by the session
//! manager. Every mutation is a locked read-modify-write with an atomic
//! replace of the file.
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use super::Session;
use crate::errors::McError;
use crate::lock::{lock_document, DEFAULT_LOCK_WAIT};
use crate::util::fs::write_private_atomic;

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, Session>, McError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw: BTreeMap<String, Value> = serde_yaml::from_str(&text)
            .map_err(|e| McError::Config(format!("{}: {e}", self.path.display())))?;
        let mut out = BTreeMap::new();
        for (id, v) in raw {
            match serde_yaml::from_value::<Session>(v) {
                Ok(s) => {
                    out.insert(id, s);
                }
                Err(e) => tracing::warn!(session = %id, error = %e, "ignoring unreadable session record"),
            }
        }
        Ok(out)
    }

    fn write(&self, sessions: &BTreeMap<String, Session>) -> Result<(), McError> {
        let text = serde_yaml::to_string(sessions)?;
        write_private_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Session>) -> R,
    ) -> Result<R, McError> {
        let _lock = lock_document(&self.path, DEFAULT_LOCK_WAIT)?;
        let mut sessions = self.read()?;
        let before = sessions.clone();
        let out = f(&mut sessions);
        if sessions != before {
            self.write(&sessions)?;
        }
        Ok(out)
    }

    pub fn all(&self) -> Result<BTreeMap<String, Session>, McError> {
        self.read()
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>, McError> {
        Ok(self.read()?.remove(id))
    }

    /// Insert or replace the record for `session.id`.
    pub fn put(&self, session: &Session) -> Result<(), McError> {
        self.update(|m| {
            m.insert(session.id.clone(), session.clone());
        })
    }

    /// Remove a record; true when it existed.
    pub fn remove(&self, id: &str) -> Result<bool, McError> {
        self.update(|m| m.remove(id).is_some())
    }

    /// Keep only records matching `keep`; returns the removed ids.
    pub fn retain(&self, mut keep: impl FnMut(&Session) -> bool) -> Result<Vec<String>, McError> {
        self.update(|m| {
            let doomed: Vec<String> = m
                .iter()
                .filter(|(_, s)| !keep(s))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &doomed {
                m.remove(id);
            }
            doomed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            name: format!("mc-{id}"),
            driver: "goose".into(),
            status: SessionStatus::Running,
            container_id: Some(format!("c-{id}")),
            environment: BTreeMap::from([("MC_USER_ID".to_string(), "1000".to_string())]),
            project: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            ports: BTreeMap::from([(8000, 49153)]),
            mcps: vec!["ctx7".into()],
            run_command: None,
            uid: Some(1000),
            gid: Some(1000),
            model: None,
            provider: None,
            ssh: false,
        }
    }

    #[test]
    fn test_put_get_remove() {
        let td = tempfile::tempdir().expect("tmpdir");
        let store = SessionStore::new(td.path().join("sessions.yaml"));
        assert!(store.all().expect("empty").is_empty());

        store.put(&session("aaaa0001")).expect("put");
        store.put(&session("bbbb0002")).expect("put");
        let got = store.get("aaaa0001").expect("get").expect("present");
        assert_eq!(got, session("aaaa0001"));
        assert_eq!(got.ports.get(&8000), Some(&49153));

        assert!(store.remove("aaaa0001").expect("remove"));
        assert!(!store.remove("aaaa0001").expect("remove again"));
        assert_eq!(store.all().expect("all").len(), 1);
    }

    #[test]
    fn test_unreadable_records_are_skipped() {
        let td = tempfile::tempdir().expect("tmpdir");
        let path = td.path().join("sessions.yaml");
        let store = SessionStore::new(&path);
        store.put(&session("good0001")).expect("put");
        let mut text = fs::read_to_string(&path).expect("read");
        text.push_str("bad00002:\n  id: bad00002\n");
        fs::write(&path, text).expect("write");
        let all = store.all().expect("all");
        assert!(all.contains_key("good0001"));
        assert!(!all.contains_key("bad00002"));
    }

    #[test]
    fn test_retain_returns_removed_ids() {
        let td = tempfile::tempdir().expect("tmpdir");
        let store = SessionStore::new(td.path().join("sessions.yaml"));
        for id in ["a0000001", "b0000002", "c0000003"] {
            store.put(&session(id)).expect("put");
        }
        let removed = store.retain(|s| s.id != "b0000002").expect("retain");
        assert_eq!(removed, vec!["b0000002".to_string()]);
        assert_eq!(store.all().expect("all").len(), 2);
    }
}
