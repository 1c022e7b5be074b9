//! Clap derive structures for the `fleetwatch` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetwatch -- threshold alerting for device telemetry
#[derive(Debug, Parser)]
#[command(
    name = "fleetwatch",
    version,
    about = "Watch device telemetry and raise alerts when sensors cross thresholds",
    long_about = "Subscribes to device telemetry over MQTT, tracks a warning/critical\n\
        alert state per device and sensor, and fans alerts out to HTTP\n\
        notification channels.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "FLEETWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the broker and process telemetry until interrupted
    Run(RunArgs),

    /// Publish one telemetry message for a device
    #[command(alias = "pub")]
    Publish(PublishArgs),

    /// Evaluate recorded telemetry offline and print the alerts it raises
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Show the effective threshold table
    Thresholds,

    /// Manage the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Broker host (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Device id
    #[arg(long, short = 'd')]
    pub device: String,

    /// Sensor reading as key=value (repeatable); values are parsed as JSON
    #[arg(long = "reading", short = 'r', value_name = "SENSOR=VALUE", required = true)]
    pub readings: Vec<String>,

    /// Explicit topic (defaults to the telemetry pattern with the device id filled in)
    #[arg(long)]
    pub topic: Option<String>,

    /// QoS level (0, 1 or 2)
    #[arg(long)]
    pub qos: Option<u8>,
}

#[derive(Debug, Args)]
pub struct EvaluateArgs {
    /// JSON-lines file of telemetry; reads stdin when omitted or `-`
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the effective configuration (secrets masked)
    Show,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
