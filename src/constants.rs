// src/constants.rs

//! Names and limits shared across the crate.

/// Prefix reserved for variables the runner defines itself. Compared case-insensitively.
pub const RESERVED_PREFIX: &str = "__runner_";

/// Automatic variable holding the runner's process id. Defined in the global scope.
pub const AUTO_VAR_PID: &str = "__runner_pid";

/// Automatic variable holding the run's start time as `YYYYMMDDHHmmSS.mmm` in UTC.
/// Defined in the global scope.
pub const AUTO_VAR_DATETIME: &str = "__runner_datetime";

/// Automatic variable holding the expanded working directory of a group or command.
pub const AUTO_VAR_WORKDIR: &str = "__runner_workdir";

/// Maximum length of a variable reference chain before resolution is aborted.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Timeout applied when neither the command, its group nor the global section sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Placeholder printed instead of values in dry-run reports unless values are requested.
pub const REDACTED: &str = "[redacted]";

/// Upper bound accepted for a user-supplied depth limit.
pub const MAX_DEPTH_CEILING: usize = 1_000;
