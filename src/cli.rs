// src/cli.rs
//! CLI definitions for solvcheck
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{ArgAction, Args, Parser, Subcommand};
use solvcheck::BackendVariant;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "solvcheck")]
#[command(version)]
#[command(about = "Check that a recipe's dependencies are solvable across its build matrix", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check every configuration of a recipe for solvability
    Check(CheckArgs),

    /// List the configurations a recipe expands to
    Expand {
        /// Path to the recipe metadata (TOML)
        recipe: PathBuf,

        /// Print configurations as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the rendered specs of one phase of one configuration
    Render {
        /// Path to the recipe metadata (TOML)
        recipe: PathBuf,

        /// Configuration label as printed by `expand`
        #[arg(short, long)]
        label: String,

        /// Dependency phase: build, host, run or test
        #[arg(short, long, default_value = "host")]
        phase: String,

        /// Output to render; defaults to the top-level package
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Args)]
pub struct CheckArgs {
    /// Path to the recipe metadata (TOML)
    pub recipe: PathBuf,

    /// Solver backend: classic, sat or alternate (overrides SOLVCHECK_SOLVER)
    #[arg(short, long)]
    pub solver: Option<BackendVariant>,

    /// Checker configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra channel searched before the recipe's channels (repeatable)
    #[arg(long = "channel", value_name = "CHANNEL")]
    pub channels: Vec<String>,

    /// Configurations checked in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Seconds allowed for a single solve attempt
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds allowed for the whole check
    #[arg(long, value_name = "SECS")]
    pub overall_timeout: Option<u64>,

    /// Attempts per solve when the backend fails
    #[arg(long)]
    pub retries: Option<u32>,

    /// Only check the configuration with this label (repeatable)
    #[arg(long = "only", value_name = "LABEL")]
    pub only: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not show a progress bar
    #[arg(long)]
    pub no_progress: bool,
}
