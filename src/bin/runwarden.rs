// src/bin/runwarden.rs

//! `runwarden` binary: prints the resolved execution plan of a configuration.

use anyhow::Result;
use clap::Parser;
use colored::*;
use runwarden::cli::{Cli, handlers};

/// Entry point: sets up logging, parses arguments and runs the plan handler
/// with centralized error reporting.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    handlers::plan::handle(&cli)
}
