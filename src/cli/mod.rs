// src/cli/mod.rs

//! The `runwarden` command line: argument model and handlers.

pub mod args;
pub mod handlers;

pub use args::{Cli, OutputFormat};
