use std::process::ExitCode;
use std::sync::Arc;

use mcontainer::{ContainerRuntime, DockerCli, McError, McPaths, UserConfig};

pub(crate) mod config;
pub(crate) mod driver;
pub(crate) mod mcp;
pub(crate) mod session;

/// Per-invocation state shared by all subcommands.
pub(crate) struct Context {
    pub(crate) paths: McPaths,
    pub(crate) use_err: bool,
    pub(crate) use_out: bool,
}

impl Context {
    pub(crate) fn from_env() -> Self {
        Self {
            paths: McPaths::from_env(),
            use_err: mcontainer::color_enabled_stderr(),
            use_out: mcontainer::color_enabled_stdout(),
        }
    }

    pub(crate) fn user_config(&self) -> Result<UserConfig, McError> {
        UserConfig::load(&self.paths.config_file())
    }

    pub(crate) fn runtime(&self) -> Result<Arc<dyn ContainerRuntime>, McError> {
        let cli = DockerCli::discover()?;
        Ok(Arc::new(cli))
    }

    pub(crate) fn info(&self, msg: &str) {
        mcontainer::log_info_stderr(self.use_err, msg);
    }

    pub(crate) fn warn(&self, msg: &str) {
        mcontainer::log_warn_stderr(self.use_err, msg);
    }

    pub(crate) fn error(&self, msg: &str) {
        mcontainer::log_error_stderr(self.use_err, msg);
    }

    /// Print `e` and map it to the process exit code.
    pub(crate) fn fail(&self, e: &McError) -> ExitCode {
        self.error(&format!("mc: {e}"));
        ExitCode::from(mcontainer::exit_code_for_error(e))
    }

    pub(crate) fn status_word(&self, status: &str) -> String {
        mcontainer::paint(self.use_out, mcontainer::status_color(status), status)
    }
}

/// Parse repeated `KEY=VALUE` flags (already validated by clap).
pub(crate) fn key_values(items: &[String]) -> std::collections::BTreeMap<String, String> {
    items
        .iter()
        .filter_map(|s| mcontainer::util::parse_key_value(s).ok())
        .collect()
}

/// Render rows as left-aligned columns separated by two spaces.
///
/// `decorate(column, cell)` styles data cells after widths are measured on
/// the raw text, so colour codes do not skew alignment.
pub(crate) fn format_table(
    header: &[&str],
    rows: &[Vec<String>],
    decorate: &dyn Fn(usize, &str) -> String,
) -> Vec<String> {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    let render = |cells: &[String], styled: bool| -> String {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let shown = if styled { decorate(i, c) } else { c.clone() };
                if i == last {
                    shown
                } else {
                    let pad = widths.get(i).copied().unwrap_or(0).saturating_sub(c.chars().count());
                    format!("{shown}{}", " ".repeat(pad))
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };
    let head: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    let mut out = vec![render(&head, false)];
    out.extend(rows.iter().map(|r| render(r, true)));
    out
}

/// `format_table` decorator that leaves cells untouched.
pub(crate) fn plain(_: usize, cell: &str) -> String {
    cell.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table_aligns_columns() {
        let rows = vec![
            vec!["abcd1234".to_string(), "goose".to_string(), "running".to_string()],
            vec!["ef".to_string(), "claude-code".to_string(), "stopped".to_string()],
        ];
        let lines = format_table(&["ID", "DRIVER", "STATUS"], &rows, &plain);
        assert_eq!(lines[0], "ID        DRIVER       STATUS");
        assert_eq!(lines[1], "abcd1234  goose        running");
        assert_eq!(lines[2], "ef        claude-code  stopped");
    }

    #[test]
    fn test_format_table_decorates_after_padding() {
        let rows = vec![vec!["a".to_string(), "running".to_string()]];
        let star = |col: usize, c: &str| if col == 0 { format!("*{c}*") } else { c.to_string() };
        let lines = format_table(&["ID", "STATUS"], &rows, &star);
        assert_eq!(lines[1], "*a*  running");
    }

    #[test]
    fn test_key_values() {
        let kv = key_values(&["A=1".to_string(), "B=x=y".to_string()]);
        assert_eq!(kv["A"], "1");
        assert_eq!(kv["B"], "x=y");
    }
}
