//! Process-wide logging setup.
//!
//! Library code only emits `tracing` events; the binary installs the
//! subscriber once. Filter precedence: `MC_LOG`, then `RUST_LOG`, then
//! `info` with `--verbose`, else `warn`.
use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;

static INIT: OnceCell<()> = OnceCell::new();

/// Filter directive in effect for the given verbosity.
pub fn log_filter(verbose: bool) -> String {
    for key in ["MC_LOG", "RUST_LOG"] {
        if let Ok(v) = env::var(key) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    if verbose { "info" } else { "warn" }.to_string()
}

/// Install the stderr fmt subscriber. Later calls are no-ops.
pub fn init_logging(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_new(log_filter(verbose))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(crate::color::color_enabled_stderr());
    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        eprintln!("mc: logging init skipped (global subscriber already set)");
    }
    let _ = INIT.set(());
}
