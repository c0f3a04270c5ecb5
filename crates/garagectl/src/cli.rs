//! Clap derive structures for the `garagectl` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// garagectl -- open, close, and watch garage doors
#[derive(Debug, Parser)]
#[command(
    name = "garagectl",
    version,
    about = "Control garage doors from the command line",
    long_about = "Open, close, and watch garage doors behind a garage backend.\n\n\
        Commands are sent over the push stream and a direct request at once;\n\
        the door animates locally for the configured travel time.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "GARAGE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'u', env = "GARAGE_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Session token (overrides keyring and profile)
    #[arg(long, env = "GARAGE_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Backend flavor (overrides profile)
    #[arg(long, env = "GARAGE_FLAVOR", global = true)]
    pub flavor: Option<FlavorArg>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "GARAGE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "GARAGE_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "GARAGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FlavorArg {
    /// One garage (`/api/status`, `/api/garage/{left|right}`)
    Single,
    /// Several garages (`/api/garages`)
    Fleet,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show door state and sensor readings
    #[command(alias = "st", alias = "ls")]
    Status(StatusArgs),

    /// Open a garage door
    Open(DoorArgs),

    /// Close a garage door
    Close(DoorArgs),

    /// Stream door activity until interrupted
    Watch(WatchArgs),

    /// Show the backend access log
    Logs(LogsArgs),

    /// Log in with the backend password and store the session token
    Login(LoginArgs),

    /// Forget the stored session token
    Logout,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Door commands ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Garage id or hardware identifier (default: all)
    pub garage: Option<String>,
}

#[derive(Debug, Args)]
pub struct DoorArgs {
    /// Garage id or hardware identifier (optional with a single garage)
    pub garage: Option<String>,

    /// Return once the command is acknowledged instead of waiting for the door
    #[arg(long)]
    pub no_wait: bool,

    /// Latitude sent as location proof (overrides profile)
    #[arg(long, allow_hyphen_values = true, requires = "longitude")]
    pub latitude: Option<f64>,

    /// Longitude sent as location proof (overrides profile)
    #[arg(long, allow_hyphen_values = true, requires = "latitude")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show activity for this garage
    pub garage: Option<String>,

    /// Also print push stream connection changes
    #[arg(long)]
    pub connection: bool,
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Show at most this many entries (newest first)
    #[arg(long, short = 'l', default_value = "25")]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Read the password from stdin instead of prompting
    #[arg(long)]
    pub password_stdin: bool,

    /// Save the token to the config file instead of the system keyring
    #[arg(long)]
    pub plaintext: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Show the current configuration
    Show,

    /// Set a value on the active profile
    Set {
        /// Config key (e.g., api_url, flavor, transition_ms)
        key: String,
        /// New value
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store a session token in the system keyring
    SetToken {
        /// Profile to store it for (default: active profile)
        #[arg(long)]
        profile: Option<String>,
    },

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
