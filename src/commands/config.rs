use std::process::ExitCode;

use mcontainer::user_config::parse_value;
use serde_yaml::Value;

use super::Context;
use crate::cli::ConfigCmd;

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn run(ctx: &Context, cmd: ConfigCmd) -> ExitCode {
    let mut cfg = match ctx.user_config() {
        Ok(c) => c,
        Err(e) => return ctx.fail(&e),
    };
    let result = match cmd {
        ConfigCmd::Get { key } => match cfg.get(&key) {
            Some(v) => {
                println!("{}", render(v));
                return ExitCode::SUCCESS;
            }
            None => {
                ctx.error(&format!("mc: '{key}' is not set"));
                return ExitCode::from(1);
            }
        },
        ConfigCmd::Set { key, value } => {
            let v = parse_value(&value);
            cfg.modify(|c| {
                c.set(&key, v);
                Ok(())
            })
            .map(|_| format!("Set {key}."))
        }
        ConfigCmd::Unset { key } => cfg.modify(|c| Ok(c.unset(&key))).map(|removed| {
            if removed {
                format!("Unset {key}.")
            } else {
                format!("{key} was not set.")
            }
        }),
        ConfigCmd::List => {
            for (k, v) in cfg.list() {
                println!("{k} = {v}");
            }
            return ExitCode::SUCCESS;
        }
        ConfigCmd::Reset => cfg.reset().map(|_| "Configuration reset to defaults.".to_string()),
    };
    match result {
        Ok(msg) => {
            ctx.info(&msg);
            ExitCode::SUCCESS
        }
        Err(e) => ctx.fail(&e),
    }
}
