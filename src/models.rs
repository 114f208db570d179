// src/models.rs

//! Configuration and runtime models.

use crate::core::allowlist::{EffectiveAllowlist, InheritanceMode};
use crate::core::variables::VariableSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// --- SPEC MODELS (what the configuration file declares) ---
// Deserialized once by the loader and never mutated afterwards. All template
// strings are kept raw; expansion happens in the runtime models below.

/// Root of a runner configuration file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigSpec {
    /// Free-form format version.
    #[serde(default)]
    pub version: Option<String>,
    /// Settings shared by every group.
    #[serde(default)]
    pub global: GlobalSpec,
    /// Reusable command definitions, keyed by name.
    #[serde(default)]
    pub command_templates: BTreeMap<String, CommandTemplate>,
    /// Command groups, in declaration order.
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

/// A `[command_templates.NAME]` table.
///
/// Fields may contain `${param}`, `${?param}` and `${@param}` placeholders that
/// are filled from a command's `params` when the configuration is loaded.
/// `%{VAR}` references are left for the resolver and may only name global
/// variables or the template's own `vars`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandTemplate {
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Command line template. Required.
    #[serde(default)]
    pub cmd: String,
    /// Argument templates. `${@param}` as a whole entry splices a list.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory, used unless the command sets its own.
    #[serde(default)]
    pub workdir: Option<String>,
    /// `internal_name=SYSTEM_VAR` imports.
    #[serde(default)]
    pub from_env: Vec<String>,
    /// `VAR=template` internal variables.
    #[serde(default)]
    pub vars: Vec<String>,
    /// `KEY=template` exported environment. Keys may not contain placeholders.
    #[serde(default)]
    pub env: Vec<String>,
}

/// A value passed to a template parameter.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ParamValue {
    /// Fills `${param}` and `${?param}`.
    Text(String),
    /// Fills `${@param}`.
    List(Vec<String>),
}

/// The `[global]` table.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalSpec {
    /// Default timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// System variables importable by `from_env`. Absent means none.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    /// `internal_name=SYSTEM_VAR` imports.
    #[serde(default)]
    pub from_env: Vec<String>,
    /// `VAR=template` internal variables.
    #[serde(default)]
    pub vars: Vec<String>,
    /// `KEY=template` exported environment.
    #[serde(default)]
    pub env: Vec<String>,
    /// Paths to verify before running anything.
    #[serde(default)]
    pub verify_files: Vec<String>,
}

/// A `[[groups]]` entry.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    /// Unique group name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Lower values run first.
    #[serde(default)]
    pub priority: i32,
    /// Working directory template for the group's commands.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Timeout in seconds for commands that set none.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// `None` inherits the global allowlist, `Some([])` rejects every import,
    /// anything else replaces the global list.
    #[serde(default)]
    pub env_allowlist: Option<Vec<String>>,
    /// `internal_name=SYSTEM_VAR` imports.
    #[serde(default)]
    pub from_env: Vec<String>,
    /// `VAR=template` internal variables.
    #[serde(default)]
    pub vars: Vec<String>,
    /// `KEY=template` exported environment.
    #[serde(default)]
    pub env: Vec<String>,
    /// Paths to verify before the group runs.
    #[serde(default)]
    pub verify_files: Vec<String>,
    /// Commands, in declaration order.
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
}

/// A `[[groups.commands]]` entry.
///
/// A command either spells out `cmd` (and optionally `args`, `env`) or names a
/// `template` with `params`; the loader rejects a mix of both. Once loaded,
/// templated commands carry the expanded template fields and resolve like any
/// other command.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// Name, unique within the group.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Command line template.
    #[serde(default)]
    pub cmd: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory template; overrides the group's and the template's.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// User to run as. Empty means unchanged.
    #[serde(default)]
    pub run_as_user: Option<String>,
    /// Group to run as. Empty means unchanged.
    #[serde(default)]
    pub run_as_group: Option<String>,
    /// `low`, `medium` or `high`. Empty or absent means `low`.
    #[serde(default)]
    pub max_risk_level: Option<String>,
    /// Name of a `[command_templates]` entry to build this command from.
    #[serde(default)]
    pub template: Option<String>,
    /// Values for the template's placeholders.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// `internal_name=SYSTEM_VAR` imports.
    #[serde(default)]
    pub from_env: Vec<String>,
    /// `VAR=template` internal variables.
    #[serde(default)]
    pub vars: Vec<String>,
    /// `KEY=template` exported environment.
    #[serde(default)]
    pub env: Vec<String>,
}

/// Highest risk a command is declared to tolerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless commands.
    #[default]
    Low,
    /// Commands that change local state.
    Medium,
    /// Commands that may affect the wider system.
    High,
}

impl RiskLevel {
    /// Parses a declared level. `critical` is reserved for internal use and is
    /// not accepted.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

/// Which level supplied a command's timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutSource {
    /// Set on the command itself.
    Command,
    /// Inherited from the group.
    Group,
    /// Inherited from `[global]`.
    Global,
    /// Built-in default.
    Default,
}

/// A resolved timeout and its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveTimeout {
    /// Timeout in seconds.
    pub secs: u64,
    /// The level that supplied it.
    pub source: TimeoutSource,
}

impl EffectiveTimeout {
    /// The timeout as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }
}

// --- RUNTIME MODELS (one per resolution pass) ---
// Each runtime node borrows its spec and owns the expanded outputs.

/// Resolved `[global]` scope. Read-only once built; shared by every group.
#[derive(Debug, Clone)]
pub struct RuntimeGlobal<'s> {
    pub(crate) spec: &'s GlobalSpec,
    pub(crate) vars: VariableSet,
    pub(crate) expanded_env: BTreeMap<String, String>,
    pub(crate) expanded_verify_files: Vec<String>,
    pub(crate) allowlist: Arc<EffectiveAllowlist>,
}

impl<'s> RuntimeGlobal<'s> {
    /// The spec this scope was resolved from.
    pub fn spec(&self) -> &'s GlobalSpec {
        self.spec
    }

    /// Variables visible to every group.
    pub fn vars(&self) -> &VariableSet {
        &self.vars
    }

    /// The global `env` entries, expanded.
    pub fn expanded_env(&self) -> &BTreeMap<String, String> {
        &self.expanded_env
    }

    /// The global `verify_files`, expanded.
    pub fn expanded_verify_files(&self) -> &[String] {
        &self.expanded_verify_files
    }

    /// The global allowlist, which also governs the global `from_env`.
    pub fn allowlist(&self) -> &EffectiveAllowlist {
        &self.allowlist
    }

    /// Whether the global `from_env` may import `name`.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowlist.is_allowed(name)
    }
}

/// Resolved group. Owns the commands resolved for it.
#[derive(Debug, Clone)]
pub struct RuntimeGroup<'s> {
    pub(crate) spec: &'s GroupSpec,
    pub(crate) vars: VariableSet,
    pub(crate) expanded_env: BTreeMap<String, String>,
    /// Global `env` overlaid by this group's `env`.
    pub(crate) exported_env: BTreeMap<String, String>,
    pub(crate) expanded_verify_files: Vec<String>,
    pub(crate) effective_workdir: Option<String>,
    pub(crate) allowlist_mode: InheritanceMode,
    pub(crate) allowlist: Arc<EffectiveAllowlist>,
    pub(crate) global_timeout: Option<u64>,
    pub(crate) commands: Vec<RuntimeCommand<'s>>,
}

impl<'s> RuntimeGroup<'s> {
    /// The spec this group was resolved from.
    pub fn spec(&self) -> &'s GroupSpec {
        self.spec
    }

    /// The group name.
    pub fn name(&self) -> &'s str {
        &self.spec.name
    }

    /// Global variables overlaid by this group's own.
    pub fn vars(&self) -> &VariableSet {
        &self.vars
    }

    /// This group's own `env` entries, expanded.
    pub fn expanded_env(&self) -> &BTreeMap<String, String> {
        &self.expanded_env
    }

    /// This group's `verify_files`, expanded.
    pub fn expanded_verify_files(&self) -> &[String] {
        &self.expanded_verify_files
    }

    /// The expanded `workdir`, if the group sets one.
    pub fn effective_workdir(&self) -> Option<&str> {
        self.effective_workdir.as_deref()
    }

    /// How the group's allowlist relates to the global one.
    pub fn allowlist_mode(&self) -> InheritanceMode {
        self.allowlist_mode
    }

    /// The allowlist in force for this group and its commands.
    pub fn allowlist(&self) -> &EffectiveAllowlist {
        &self.allowlist
    }

    /// Whether `name` may be imported from the process environment in this group.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowlist.is_allowed(name)
    }

    /// Commands resolved so far, in declaration order.
    pub fn commands(&self) -> &[RuntimeCommand<'s>] {
        &self.commands
    }

    /// Attaches a resolved command to this group.
    pub fn push_command(&mut self, command: RuntimeCommand<'s>) {
        self.commands.push(command);
    }
}

/// A fully resolved command, ready to hand to an executor.
#[derive(Debug, Clone)]
pub struct RuntimeCommand<'s> {
    pub(crate) spec: &'s CommandSpec,
    pub(crate) group_name: &'s str,
    pub(crate) vars: VariableSet,
    pub(crate) expanded_cmd: String,
    pub(crate) expanded_args: Vec<String>,
    pub(crate) expanded_env: BTreeMap<String, String>,
    pub(crate) process_env: BTreeMap<String, String>,
    pub(crate) effective_workdir: Option<String>,
    pub(crate) timeout: EffectiveTimeout,
    pub(crate) risk_level: RiskLevel,
    pub(crate) allowlist: Arc<EffectiveAllowlist>,
}

impl<'s> RuntimeCommand<'s> {
    /// The spec this command was resolved from.
    pub fn spec(&self) -> &'s CommandSpec {
        self.spec
    }

    /// The command name.
    pub fn name(&self) -> &'s str {
        &self.spec.name
    }

    /// Name of the owning group.
    pub fn group_name(&self) -> &'s str {
        self.group_name
    }

    /// Every variable visible to the command.
    pub fn vars(&self) -> &VariableSet {
        &self.vars
    }

    /// The expanded command line.
    pub fn expanded_cmd(&self) -> &str {
        &self.expanded_cmd
    }

    /// The expanded arguments.
    pub fn expanded_args(&self) -> &[String] {
        &self.expanded_args
    }

    /// This command's own `env` entries, expanded.
    pub fn expanded_env(&self) -> &BTreeMap<String, String> {
        &self.expanded_env
    }

    /// The complete environment for the child process: allowlisted system
    /// variables, then global, group and command `env` in that order.
    pub fn process_env(&self) -> &BTreeMap<String, String> {
        &self.process_env
    }

    /// The command's own workdir, else its group's.
    pub fn effective_workdir(&self) -> Option<&str> {
        self.effective_workdir.as_deref()
    }

    /// Effective timeout and where it came from.
    pub fn timeout(&self) -> EffectiveTimeout {
        self.timeout
    }

    /// The declared risk ceiling.
    pub fn max_risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// User to run as, if set and non-empty.
    pub fn run_as_user(&self) -> Option<&'s str> {
        self.spec.run_as_user.as_deref().filter(|s| !s.is_empty())
    }

    /// Group to run as, if set and non-empty.
    pub fn run_as_group(&self) -> Option<&'s str> {
        self.spec.run_as_group.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether `name` may be imported from the process environment here.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowlist.is_allowed(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_parsing() {
        assert_eq!(RiskLevel::parse(""), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::parse("Medium"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse(" high "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("critical"), None);
        assert_eq!(RiskLevel::parse("extreme"), None);
        assert!(RiskLevel::Low < RiskLevel::High);
    }

    #[test]
    fn test_timeout_duration() {
        let timeout = EffectiveTimeout {
            secs: 90,
            source: TimeoutSource::Group,
        };
        assert_eq!(timeout.as_duration(), Duration::from_secs(90));
    }
}
