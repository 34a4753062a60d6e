// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log filter for a `-v` count when `RUST_LOG` is unset
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Check(args) => commands::cmd_check(&args),
        Commands::Expand { recipe, json } => commands::cmd_expand(&recipe, json).map(|_| 0),
        Commands::Render {
            recipe,
            label,
            phase,
            output,
        } => commands::cmd_render(&recipe, &label, &phase, output.as_deref()).map(|_| 0),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging; reports go to stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose))),
        )
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(commands::EXIT_INVALID_INPUT as u8)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(commands::EXIT_INVALID_INPUT as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_ladder() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "info");
        assert_eq!(default_filter(2), "debug");
        assert_eq!(default_filter(7), "trace");
    }
}
