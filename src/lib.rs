//! Hierarchical configuration resolution for a policy-governed command runner.
//!
//! A configuration declares a global scope, groups and commands. Each scope
//! imports allowlisted system variables (`from_env`), defines internal
//! variables (`vars`) and exported environment entries (`env`). The
//! [`Resolver`](core::config_resolver::Resolver) expands all of it into
//! runtime nodes ready for an executor.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
