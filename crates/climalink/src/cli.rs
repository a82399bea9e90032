//! Clap derive structures for the `climalink` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// climalink -- connect and supervise fleets of Madoka BLE thermostats
#[derive(Debug, Parser)]
#[command(
    name = "climalink",
    version,
    about = "Connect to fleets of Madoka BLE thermostats",
    long_about = "Discovers Daikin Madoka (BRC1H) thermostats over Bluetooth LE,\n\
        connects every configured device concurrently under its own timeout,\n\
        and reports how each attempt ended.",
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
    /// Fleet profile to use
    #[arg(long, short = 'p', env = "CLIMALINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CLIMALINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Bluetooth adapter (overrides profile)
    #[arg(long, short = 'a', env = "CLIMALINK_ADAPTER", global = true)]
    pub adapter: Option<String>,

    /// Discovery scan duration in seconds
    #[arg(long, global = true)]
    pub scan_timeout: Option<u64>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CLIMALINK_OUTPUT",
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

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan, connect every configured device, and report the outcome
    #[command(alias = "c")]
    Connect(ConnectArgs),

    /// Run a discovery scan and list what was found
    #[command(alias = "s")]
    Scan,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Connect ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Device address to connect (repeatable; replaces the profile's list)
    #[arg(long = "device", short = 'd', value_name = "ADDRESS")]
    pub devices: Vec<String>,

    /// Per-device connect timeout in seconds
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// Skip closing stale connections before the first attempt
    #[arg(long)]
    pub no_force_disconnect: bool,

    /// Report connect failures instead of waiting for a retry
    #[arg(long)]
    pub no_reconnect: bool,

    /// Retry disconnected devices every N seconds while holding (0 = off)
    #[arg(long, value_name = "SECS")]
    pub reconnect_interval: Option<u64>,

    /// Stay connected and print notifications until Ctrl-C
    #[arg(long)]
    pub hold: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display current resolved configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Add a device to the active profile
    AddDevice {
        /// Device address (AA:BB:CC:DD:EE:FF)
        address: String,
    },

    /// Remove a device from the active profile
    RemoveDevice {
        /// Device address (any case)
        address: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
