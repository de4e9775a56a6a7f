use std::path::Path;
use std::process::{Command, ExitCode};

use mcontainer::runtime::container_runtime_path;
use mcontainer::{ContainerRuntime, DockerCli, DriverRegistry, McPaths};

fn show(use_err: bool, label: &str, value: &str) {
    eprintln!("  {label:<16} {}", mcontainer::paint(use_err, "\x1b[34;1m", value));
}

fn show_dir(use_err: bool, label: &str, p: &Path) {
    let state = if p.is_dir() { "" } else { " (missing)" };
    show(use_err, label, &format!("{}{state}", p.display()));
}

pub(crate) fn run_doctor(paths: &McPaths, verbose: bool) -> ExitCode {
    let use_err = mcontainer::color_enabled_stderr();
    eprintln!("mc doctor");
    eprintln!();
    show(use_err, "version:", &format!("v{}", env!("CARGO_PKG_VERSION")));
    show(
        use_err,
        "host:",
        &format!("{} / {}", std::env::consts::OS, std::env::consts::ARCH),
    );
    eprintln!();

    let mut healthy = true;
    match container_runtime_path() {
        Ok(p) => {
            let cli = DockerCli::new(p);
            show(use_err, "docker command:", &cli.binary().display().to_string());
            if let Ok(out) = Command::new(cli.binary()).arg("--version").output() {
                let v = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if !v.is_empty() {
                    show(use_err, "docker version:", &v);
                }
            }
            match cli.ping() {
                Ok(()) => show(use_err, "docker daemon:", "reachable"),
                Err(e) => {
                    healthy = false;
                    show(use_err, "docker daemon:", "unreachable");
                    if verbose {
                        eprintln!("    {e}");
                    }
                    eprintln!("    tip: start Docker Desktop / the docker service and re-run.");
                }
            }
        }
        Err(_) => {
            healthy = false;
            show(use_err, "docker command:", "(not found)");
            eprintln!("    tip: install Docker and ensure 'docker' is in your PATH.");
        }
    }
    eprintln!();

    show_dir(use_err, "config dir:", &paths.config_dir);
    show_dir(use_err, "projects dir:", &paths.projects_dir());
    show_dir(use_err, "user drivers:", &paths.user_drivers_dir());
    if let Some(d) = &paths.builtin_drivers_dir {
        show_dir(use_err, "bundled drivers:", d);
    }
    let drivers = DriverRegistry::load(paths).list();
    let names: Vec<&str> = drivers.keys().map(String::as_str).collect();
    show(use_err, "drivers:", &names.join(", "));
    eprintln!();

    if healthy {
        eprintln!("doctor: completed diagnostics.");
        ExitCode::SUCCESS
    } else {
        mcontainer::log_warn_stderr(use_err, "doctor: problems found; see tips above.");
        ExitCode::from(1)
    }
}
