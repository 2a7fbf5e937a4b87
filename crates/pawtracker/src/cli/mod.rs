//! Command-line interface for pawtracker.
//!
//! This module provides the CLI structure and command handlers for the
//! `pawtrack` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, SendCommand, SinkArg, StatusCommand, TrackCommand};

/// pawtrack - Share your walk with the people waiting for you
///
/// Tracks the device's position and reports it to a server or realtime
/// store, in the foreground or in the background.
#[derive(Debug, Parser)]
#[command(name = "pawtrack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start tracking and report positions until interrupted
    Track(TrackCommand),

    /// Show tracking status
    Status(StatusCommand),

    /// Stop a subscription left registered by an earlier run
    Stop,

    /// Deliver a single position
    Send(SendCommand),

    /// Sign in with the configured credentials
    Login,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
