//! Error mapping guide:
//! - Configuration errors (unknown driver/MCP, malformed manifest) abort the operation up front.
//! - Runtime errors carry enough context (command, stderr) to be logged at the call site.
//! - Map a missing container runtime to exit code 127; everything else to 1.
use std::fmt;
use std::io;

/// Failure talking to the container runtime.
#[derive(Debug)]
pub enum RuntimeError {
    /// The referenced container, image or network does not exist.
    NotFound(String),
    /// The runtime binary or daemon is not reachable.
    Unavailable(String),
    /// The runtime ran but reported a failure.
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// The runtime answered with output we could not understand.
    Parse(String),
    Io(io::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NotFound(what) => write!(f, "not found: {what}"),
            RuntimeError::Unavailable(msg) => write!(f, "container runtime unavailable: {msg}"),
            RuntimeError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                let code = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                if stderr.trim().is_empty() {
                    write!(f, "`{command}` failed (exit: {code})")
                } else {
                    write!(f, "`{command}` failed (exit: {code}): {}", stderr.trim())
                }
            }
            RuntimeError::Parse(msg) => write!(f, "unexpected runtime output: {msg}"),
            RuntimeError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            RuntimeError::Unavailable(e.to_string())
        } else {
            RuntimeError::Io(e)
        }
    }
}

/// Errors surfaced by the session, MCP and driver managers.
#[derive(Debug)]
pub enum McError {
    DriverNotFound(String),
    McpNotFound(String),
    InvalidMcp(String),
    InvalidManifest(String),
    SessionNotFound(String),
    SessionNotRunning { id: String, status: String },
    Config(String),
    Runtime(RuntimeError),
    Io(io::Error),
}

impl fmt::Display for McError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McError::DriverNotFound(name) => write!(f, "driver '{name}' not found"),
            McError::McpNotFound(name) => write!(f, "MCP server '{name}' not found"),
            McError::InvalidMcp(msg) => write!(f, "invalid MCP configuration: {msg}"),
            McError::InvalidManifest(msg) => write!(f, "invalid driver manifest: {msg}"),
            McError::SessionNotFound(id) => write!(f, "session '{id}' not found"),
            McError::SessionNotRunning { id, status } => {
                write!(f, "session '{id}' is not running (status: {status})")
            }
            McError::Config(msg) => write!(f, "configuration error: {msg}"),
            McError::Runtime(e) => write!(f, "{e}"),
            McError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for McError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            McError::Runtime(e) => Some(e),
            McError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RuntimeError> for McError {
    fn from(e: RuntimeError) -> Self {
        McError::Runtime(e)
    }
}

impl From<io::Error> for McError {
    fn from(e: io::Error) -> Self {
        McError::Io(e)
    }
}

impl From<serde_yaml::Error> for McError {
    fn from(e: serde_yaml::Error) -> Self {
        McError::Config(e.to_string())
    }
}

/// Map an error to a process exit code:
/// - 127 when the container runtime binary is missing
/// - 1 for everything else
pub fn exit_code_for_error(e: &McError) -> u8 {
    match e {
        McError::Runtime(RuntimeError::Unavailable(_)) => 127,
        McError::Io(ioe) if ioe.kind() == io::ErrorKind::NotFound => 127,
        _ => 1,
    }
}
