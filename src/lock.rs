//! Advisory file locks guarding read-modify-write of the YAML documents
//! (`config.yaml`, `sessions.yaml`).
//!
//! Each document gets a sibling `<file>.lock`. Two `mc` invocations that
//! mutate the same document serialise on it instead of interleaving.
use fs2::FileExt;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long a writer waits for another process before giving up.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive lock on a document; released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: Option<File>,
    path: PathBuf,
}

impl DocumentLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        // Best-effort unlock; the lock file itself is left in place so that a
        // concurrent waiter never ends up locking an unlinked inode.
        if let Some(f) = self.file.take() {
            let _ = f.unlock();
        }
    }
}

/// Lock file path for a document: `sessions.yaml` -> `sessions.yaml.lock`.
pub fn lock_path_for(doc: &Path) -> PathBuf {
    let mut name = doc
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "mc".into());
    name.push(".lock");
    doc.with_file_name(name)
}

/// Return true unless `MC_SKIP_LOCK=1` (used by tests that share a tempdir).
pub fn should_acquire_lock() -> bool {
    env::var("MC_SKIP_LOCK").ok().as_deref() != Some("1")
}

/// Acquire the lock for `doc`, waiting up to `wait` for another holder.
pub fn lock_document(doc: &Path, wait: Duration) -> io::Result<DocumentLock> {
    let path = lock_path_for(doc);
    if !should_acquire_lock() {
        return Ok(DocumentLock { file: None, path });
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    let deadline = Instant::now() + wait;
    loop {
        match f.try_lock_exclusive() {
            Ok(()) => {
                return Ok(DocumentLock {
                    file: Some(f),
                    path,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        format!(
                            "another mc process holds {} (waited {:?}); try again later",
                            path.display(),
                            wait
                        ),
                    ));
                }
                std::thread::sleep(RETRY_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
