#![allow(clippy::module_name_repetitions)]
//! Docker runtime discovery.

use std::env;
use std::io;
use std::path::PathBuf;

use which::which;

/// Locate the `docker` binary on PATH.
///
/// `MC_SKIP_DOCKER=1` makes discovery fail, so commands that do not need the
/// engine (config, driver listing) and tests never touch a real daemon.
pub fn container_runtime_path() -> io::Result<PathBuf> {
    if env::var("MC_SKIP_DOCKER").ok().as_deref() == Some("1") {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Docker disabled by environment override.",
        ));
    }

    if let Ok(p) = which("docker") {
        return Ok(p);
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "Docker is required but was not found in PATH.",
    ))
}
