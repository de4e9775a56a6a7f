use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod doctor;

use cli::{Cli, Command};
use commands::Context;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(mode) = cli.color {
        mcontainer::set_color_mode(mode);
    }
    mcontainer::telemetry::init_logging(cli.verbose);

    let ctx = Context::from_env();
    tracing::debug!(
        config_dir = %ctx.paths.config_dir.display(),
        home_dir = %ctx.paths.home_dir.display(),
        "mc starting"
    );

    match cli.command {
        Command::Session { cmd } => commands::session::run(&ctx, cmd),
        Command::Mcp { cmd } => commands::mcp::run(&ctx, cmd),
        Command::Driver { cmd } => commands::driver::run(&ctx, cmd),
        Command::Config { cmd } => commands::config::run(&ctx, cmd),
        Command::Doctor => doctor::run_doctor(&ctx.paths, cli.verbose),
    }
}
