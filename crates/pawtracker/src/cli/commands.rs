//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::SinkKind;

/// Track command arguments.
#[derive(Debug, Args)]
pub struct TrackCommand {
    /// Replay this track file instead of the configured one
    #[arg(short, long, value_name = "FILE")]
    pub track: Option<PathBuf>,

    /// Deliver to this sink instead of the configured one
    #[arg(short, long, value_enum)]
    pub sink: Option<SinkArg>,

    /// Only track while this process runs (no background permission)
    #[arg(long)]
    pub foreground_only: bool,

    /// On Ctrl-C, leave the subscription registered for a later run
    #[arg(short, long)]
    pub detach: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Send command arguments.
#[derive(Debug, Args)]
pub struct SendCommand {
    /// Latitude in degrees
    #[arg(long, allow_negative_numbers = true, value_parser = parse_latitude)]
    pub lat: f64,

    /// Longitude in degrees
    #[arg(long, allow_negative_numbers = true, value_parser = parse_longitude)]
    pub lon: f64,

    /// Deliver to this sink instead of the configured one
    #[arg(short, long, value_enum)]
    pub sink: Option<SinkArg>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Sink argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkArg {
    /// REST endpoint
    Http,
    /// Realtime store
    Realtime,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Http => Self::Http,
            SinkArg::Realtime => Self::Realtime,
        }
    }
}

fn parse_degrees(raw: &str, limit: f64) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(format!("must be between -{limit} and {limit}"));
    }
    Ok(value)
}

fn parse_latitude(raw: &str) -> Result<f64, String> {
    parse_degrees(raw, 90.0)
}

fn parse_longitude(raw: &str) -> Result<f64, String> {
    parse_degrees(raw, 180.0)
}
