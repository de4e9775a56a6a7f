use clap::{Parser, Subcommand};

/// Validate a `KEY=VALUE` flag value.
fn validate_key_value(s: &str) -> Result<String, String> {
    mcontainer::util::parse_key_value(s).map(|_| s.to_string())
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum SessionCmd {
    /// Create a session container and (by default) attach to it
    Create {
        /// Local directory or repository URL to work on
        project: Option<String>,
        /// Driver to run (default: defaults.driver)
        #[arg(long, short = 'd')]
        driver: Option<String>,
        /// Session (and container) name; default mc-<id>
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// Extra container environment, KEY=VALUE (repeatable)
        #[arg(long = "env", short = 'e', value_parser = validate_key_value)]
        env: Vec<String>,
        /// Extra bind mount, HOST:CONTAINER[:MODE] (repeatable)
        #[arg(long = "volume", short = 'v')]
        volumes: Vec<String>,
        /// Additional network to join (repeatable)
        #[arg(long = "network")]
        networks: Vec<String>,
        /// MCP server to attach (repeatable)
        #[arg(long = "mcp", short = 'm')]
        mcps: Vec<String>,
        /// Command to run once initialization finishes
        #[arg(long = "run")]
        run_command: Option<String>,
        /// Exit after the run command instead of dropping into a shell
        #[arg(long = "no-shell")]
        no_shell: bool,
        /// Do not mount a local project directory at /app
        #[arg(long = "no-mount")]
        no_mount: bool,
        /// Do not attach to the session after creating it
        #[arg(long = "no-connect")]
        no_connect: bool,
        /// User id inside the container (default: invoking user)
        #[arg(long)]
        uid: Option<u32>,
        /// Group id inside the container (default: invoking user)
        #[arg(long)]
        gid: Option<u32>,
        /// Model, optionally as provider/model
        #[arg(long)]
        model: Option<String>,
        /// Model provider
        #[arg(long)]
        provider: Option<String>,
        /// Enable the SSH server inside the container
        #[arg(long)]
        ssh: bool,
    },
    /// List live sessions
    List,
    /// Stop and remove a session
    Close {
        /// Session id
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,
        /// Close every live session
        #[arg(long)]
        all: bool,
    },
    /// Open an interactive shell in a running session
    Connect {
        /// Session id
        id: String,
    },
    /// Show container output, or the initialization log with --init
    Logs {
        /// Session id
        id: String,
        /// Show the initialization log instead
        #[arg(long)]
        init: bool,
        /// Keep streaming
        #[arg(long, short = 'f')]
        follow: bool,
        /// Only the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Forget recorded sessions whose container no longer exists
    Prune,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum McpCmd {
    /// List configured MCP servers
    List,
    /// Register an existing SSE endpoint
    #[command(name = "add-remote")]
    AddRemote {
        name: String,
        url: String,
        /// HTTP header sent to the endpoint, KEY=VALUE (repeatable)
        #[arg(long = "header", short = 'H', value_parser = validate_key_value)]
        headers: Vec<String>,
    },
    /// Register an image that serves SSE on port 8080
    #[command(name = "add-docker")]
    AddDocker {
        name: String,
        image: String,
        /// Command override for the container
        #[arg(long, default_value = "")]
        command: String,
        /// Container environment, KEY=VALUE (repeatable)
        #[arg(long = "env", short = 'e', value_parser = validate_key_value)]
        env: Vec<String>,
    },
    /// Register a stdio image wrapped by an SSE proxy
    #[command(name = "add-proxy")]
    AddProxy {
        name: String,
        /// Image of the stdio MCP server
        base_image: String,
        /// Proxy image to build on
        #[arg(long = "proxy-image", default_value = mcontainer::mcp::proxy::DEFAULT_PROXY_IMAGE)]
        proxy_image: String,
        /// Command passed to the stdio server
        #[arg(long, default_value = "")]
        command: String,
        /// Port the proxy serves SSE on inside the container
        #[arg(long = "sse-port", default_value_t = 8080)]
        sse_port: u16,
        /// Address the proxy binds to
        #[arg(long = "sse-host", default_value = "0.0.0.0")]
        sse_host: String,
        /// CORS allow-origin for the proxy
        #[arg(long = "allow-origin", default_value = "*")]
        allow_origin: String,
        /// Host port to publish (default: next free above 5100)
        #[arg(long = "host-port")]
        host_port: Option<u16>,
        /// Environment for the stdio server, KEY=VALUE (repeatable)
        #[arg(long = "env", short = 'e', value_parser = validate_key_value)]
        env: Vec<String>,
    },
    /// Remove a configuration and its container
    Remove { name: String },
    /// Start an MCP container
    Start { name: String },
    /// Stop an MCP container
    Stop { name: String },
    /// Restart an MCP container (starts it when missing)
    Restart { name: String },
    /// Show container status of an MCP server
    Status { name: String },
    /// Show recent MCP container logs
    Logs {
        name: String,
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },
    /// List every MCP container known to the runtime
    Containers,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum DriverCmd {
    /// List available drivers
    List,
    /// Show a driver's manifest details
    Info { name: String },
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ConfigCmd {
    /// Print a configuration value
    Get { key: String },
    /// Set a configuration value (YAML scalars are parsed)
    Set { key: String, value: String },
    /// Remove a configuration value
    Unset { key: String },
    /// Print all values (secrets masked)
    List,
    /// Restore the default configuration
    Reset,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Manage sessions
    #[command(alias = "s")]
    Session {
        #[command(subcommand)]
        cmd: SessionCmd,
    },
    /// Manage MCP servers
    Mcp {
        #[command(subcommand)]
        cmd: McpCmd,
    },
    /// Inspect drivers
    Driver {
        #[command(subcommand)]
        cmd: DriverCmd,
    },
    /// Read and change user configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Check Docker availability and on-host paths
    Doctor,
}

#[derive(Parser, Debug)]
#[command(
    name = "mc",
    version,
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("MC_BUILD_TARGET"),
        ", built ",
        env!("MC_BUILD_DATE"),
        ")"
    ),
    about = "Run AI coding assistants in Docker sessions with per-project config and MCP sidecars.",
    after_long_help = "Examples:\n  mc session create . --mcp ctx7\n  mc session list\n  mc session logs abcd1234 --init -f\n  mc mcp add-remote ctx7 https://mcp.context7.com/sse\n  mc session close --all\n"
)]
pub(crate) struct Cli {
    /// Print detailed execution info
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub(crate) color: Option<mcontainer::ColorMode>,

    #[command(subcommand)]
    pub(crate) command: Command,
}
