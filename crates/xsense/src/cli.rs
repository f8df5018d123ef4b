//! Clap derive structures for the `xsense` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// xsense -- inspect and control X-Sense alarms from the command line
#[derive(Debug, Parser)]
#[command(
    name = "xsense",
    version,
    about = "Inspect and control X-Sense smoke, CO and climate sensors",
    long_about = "Talks to the X-Sense cloud the way the mobile app does: lists houses,\n\
        base stations and sensors, streams realtime updates over MQTT and sends\n\
        mute, self-test and station configuration commands.",
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
    /// Account profile to use
    #[arg(long, short = 'p', env = "XSENSE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Account email (overrides profile)
    #[arg(long, short = 'e', env = "XSENSE_EMAIL", global = true)]
    pub email: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "XSENSE_OUTPUT",
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

    /// Request timeout, e.g. `30s` or `2m`
    #[arg(long, env = "XSENSE_TIMEOUT", value_parser = humantime::parse_duration, global = true)]
    pub timeout: Option<Duration>,
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
    /// List houses, or show one with its cloud shadow
    #[command(alias = "h")]
    Houses(HousesArgs),

    /// List base stations
    #[command(alias = "st")]
    Stations(StationsArgs),

    /// List sensors with their latest state
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Connect realtime and stream updates until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Silence a sounding alarm
    Mute(DeviceTarget),

    /// Ask a sensor to run its self-test
    TestAlarm(DeviceTarget),

    /// Write settings to a base station
    StationConfig(StationConfigArgs),

    /// Re-fetch one sensor from the cloud
    Sync(SyncArgs),
}

// ── Arguments ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HousesArgs {
    /// House id to show in detail
    pub house: Option<String>,
}

#[derive(Debug, Args)]
pub struct StationsArgs {
    /// Only stations of this house
    #[arg(long)]
    pub house: Option<String>,
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Only sensors of this station (refreshes its shadow)
    #[arg(long, short = 's')]
    pub station: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// House to watch (default: every house)
    #[arg(long)]
    pub house: Option<String>,

    /// Restrict subscriptions to one station
    #[arg(long, short = 's')]
    pub station: Option<String>,

    /// Give up if realtime is not healthy within this time
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub connect_timeout: Duration,
}

#[derive(Debug, Args)]
pub struct DeviceTarget {
    /// Device id or serial
    pub device: String,

    /// How long to wait for the realtime connection
    #[arg(long, value_parser = humantime::parse_duration, default_value = "20s")]
    pub connect_timeout: Duration,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Device id or serial
    pub device: String,
}

#[derive(Debug, Args)]
pub struct StationConfigArgs {
    /// Station id (an SC07-WX device id also works)
    pub station: String,

    /// Settings as KEY=VALUE; values parse as JSON when possible
    #[arg(required = true, value_name = "KEY=VALUE")]
    pub settings: Vec<String>,

    /// How long to wait for the realtime connection
    #[arg(long, value_parser = humantime::parse_duration, default_value = "20s")]
    pub connect_timeout: Duration,
}
