// src/cli/args.rs

//! Command line arguments.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format of the resolution report.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable, colored when the terminal supports it.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

/// runwarden: resolves a runner configuration and prints the execution plan
/// without running anything.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Path to the configuration file.
    pub config: PathBuf,

    /// Report format.
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Only resolve the named group (may be repeated).
    #[arg(long, short)]
    pub group: Vec<String>,

    /// Longest permitted chain of variable references.
    #[arg(long, default_value_t = crate::constants::DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Print variable and environment values instead of masking them.
    #[arg(long)]
    pub show_values: bool,
}
