// src/core/mod.rs

//! The resolution engine: declarations, expansion, scopes and templates.

pub mod allowlist;
pub mod config_loader;
pub mod config_resolver;
pub mod cycle_guard;
pub mod declarations;
pub mod errors;
pub mod interpolator;
pub(crate) mod level_processor;
pub mod templates;
pub mod variables;
