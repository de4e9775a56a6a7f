use std::process::ExitCode;

use mcontainer::DriverRegistry;

use super::{format_table, plain, Context};
use crate::cli::DriverCmd;

pub(crate) fn run(ctx: &Context, cmd: DriverCmd) -> ExitCode {
    let registry = DriverRegistry::load(&ctx.paths);
    match cmd {
        DriverCmd::List => {
            let drivers = registry.list();
            if drivers.is_empty() {
                ctx.info("No drivers available.");
                return ExitCode::SUCCESS;
            }
            let rows: Vec<Vec<String>> = drivers
                .values()
                .map(|d| {
                    vec![
                        d.name.clone(),
                        d.version.clone(),
                        if registry.is_builtin(&d.name) { "bundled" } else { "user" }.to_string(),
                        d.image.clone(),
                        d.description.clone(),
                    ]
                })
                .collect();
            for line in format_table(&["NAME", "VERSION", "SOURCE", "IMAGE", "DESCRIPTION"], &rows, &plain) {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        DriverCmd::Info { name } => {
            let d = match registry.require(&name) {
                Ok(d) => d,
                Err(e) => return ctx.fail(&e),
            };
            println!("name:        {}", d.name);
            println!("description: {}", d.description);
            println!("version:     {}", d.version);
            println!("maintainer:  {}", d.maintainer);
            println!("image:       {}", d.image);
            match registry.path(&d.name) {
                Some(p) => println!("path:        {}", p.display()),
                None => println!("path:        (embedded)"),
            }
            if !d.ports.is_empty() {
                let ports: Vec<String> = d.ports.iter().map(u16::to_string).collect();
                println!("ports:       {}", ports.join(", "));
            }
            if !d.environment.is_empty() {
                println!("environment:");
                for e in &d.environment {
                    let req = if e.required { " (required)" } else { "" };
                    println!("  {}{req}: {}", e.name, e.description);
                }
            }
            if !d.persistent_configs.is_empty() {
                println!("persistent configs:");
                for p in &d.persistent_configs {
                    println!("  {} -> {} ({})", p.source, p.target, p.kind.as_str());
                }
            }
            ExitCode::SUCCESS
        }
    }
}
