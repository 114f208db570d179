// src/core/config_resolver.rs

//! # Config Resolver
//!
//! Turns the immutable spec tree into runtime nodes, one scope at a time:
//! global first, then each group seeded from the global variables, then each
//! command seeded from its group. Every scope runs the level steps in the
//! same order (`from_env`, `vars`, `env`) before its auxiliary fields are
//! expanded.
//!
//! Groups are independent once the global scope is resolved, so
//! [`Resolver::resolve_groups`] resolves them in parallel with `rayon`. The
//! resolved global scope is only ever read.

use crate::constants::{AUTO_VAR_DATETIME, AUTO_VAR_PID, AUTO_VAR_WORKDIR, DEFAULT_MAX_DEPTH, DEFAULT_TIMEOUT_SECS, MAX_DEPTH_CEILING};
use crate::core::allowlist::{EffectiveAllowlist, InheritanceMode, parse_allowlist};
use crate::core::errors::{ResolveError, ResolveResult};
use crate::core::level_processor::LevelProcessor;
use crate::core::templates::check_template_references;
use crate::core::variables::VariableSet;
use crate::models::{
    CommandSpec, ConfigSpec, EffectiveTimeout, GlobalSpec, GroupSpec, RiskLevel, RuntimeCommand,
    RuntimeGlobal, RuntimeGroup, TimeoutSource,
};
use crate::system::environment::Environment;
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tunables of a resolution pass. Built through the `with_*` setters so the
/// depth limit always stays within `1..=MAX_DEPTH_CEILING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    max_depth: usize,
    runner_pid: u32,
    started_at: DateTime<Utc>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            runner_pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

impl ResolverOptions {
    /// Sets the depth limit, clamped to `1..=MAX_DEPTH_CEILING`.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.clamp(1, MAX_DEPTH_CEILING);
        self
    }

    /// Overrides the reported runner pid.
    pub fn with_runner_pid(mut self, pid: u32) -> Self {
        self.runner_pid = pid;
        self
    }

    /// Overrides the start time reported by `__runner_datetime`. Converted to UTC.
    pub fn with_started_at<Tz: TimeZone>(mut self, at: DateTime<Tz>) -> Self {
        self.started_at = at.with_timezone(&Utc);
        self
    }

    /// Longest permitted chain of variable references.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Value of the automatic `__runner_pid` variable.
    pub fn runner_pid(&self) -> u32 {
        self.runner_pid
    }

    /// Start time of the run, in UTC.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The `__runner_datetime` value: `YYYYMMDDHHmmSS.mmm`, UTC.
    pub fn started_at_label(&self) -> String {
        self.started_at.format("%Y%m%d%H%M%S%.3f").to_string()
    }
}

/// Outcome of resolving one group together with all of its commands.
#[derive(Debug)]
pub struct GroupResolution<'s> {
    /// The group that was resolved.
    pub spec: &'s GroupSpec,
    /// The resolved group, or the first error met in it or its commands.
    pub result: ResolveResult<RuntimeGroup<'s>>,
}

/// Scope label for a group, as used in error messages.
pub fn group_scope(group: &str) -> String {
    format!("group[{group}]")
}

/// Scope label for a command, as used in error messages.
pub fn command_scope(group: &str, command: &str) -> String {
    format!("command[{group}/{command}]")
}

/// The resolution engine. Holds the process environment snapshot and options;
/// every method is a pure function of its inputs and that snapshot.
#[derive(Debug)]
pub struct Resolver<E> {
    env: E,
    options: ResolverOptions,
}

impl<E: Environment> Resolver<E> {
    /// A resolver with default options.
    pub fn new(env: E) -> Self {
        Self::with_options(env, ResolverOptions::default())
    }

    /// A resolver with explicit options.
    pub fn with_options(env: E, options: ResolverOptions) -> Self {
        Self { env, options }
    }

    /// The options this resolver was built with.
    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// The environment snapshot imports are read from.
    pub fn environment(&self) -> &E {
        &self.env
    }

    // --- PUBLIC API ---

    /// Resolves the `[global]` scope. The global allowlist governs the
    /// global `from_env`.
    pub fn resolve_global<'s>(&self, spec: &'s GlobalSpec) -> ResolveResult<RuntimeGlobal<'s>> {
        debug!("Resolving global scope");
        let mut processor = LevelProcessor::new("global", &self.env, self.options.max_depth);
        let allowlist = Arc::new(EffectiveAllowlist::from_set(parse_allowlist(
            &spec.env_allowlist,
            processor.scope(),
        )?));

        let mut vars = VariableSet::new();
        processor.define_automatic(AUTO_VAR_DATETIME, self.options.started_at_label(), &mut vars);
        processor.define_automatic(AUTO_VAR_PID, self.options.runner_pid.to_string(), &mut vars);
        processor.import_from_env(&spec.from_env, &allowlist, &mut vars)?;
        processor.define_vars(&spec.vars, &mut vars)?;
        let expanded_env = processor.define_env(&spec.env, &vars)?;
        let expanded_verify_files = processor.expand_list("verify_files", &spec.verify_files, &vars)?;

        debug!("Global scope resolved: {} variables", vars.len());
        Ok(RuntimeGlobal {
            spec,
            vars,
            expanded_env,
            expanded_verify_files,
            allowlist,
        })
    }

    /// Checks that command templates only reference global variables or
    /// their own. Templates have already been applied by the loader; this
    /// needs the resolved global scope and so runs here.
    pub fn check_templates(&self, config: &ConfigSpec, global: &RuntimeGlobal<'_>) -> ResolveResult<()> {
        debug!("Checking {} command templates", config.command_templates.len());
        check_template_references(&config.command_templates, &global.vars)
    }

    /// Resolves one group, seeded with the global variables. The returned group
    /// has no commands attached; see [`Resolver::resolve_group_with_commands`].
    pub fn resolve_group<'s>(
        &self,
        spec: &'s GroupSpec,
        global: &RuntimeGlobal<'_>,
    ) -> ResolveResult<RuntimeGroup<'s>> {
        let mut processor = LevelProcessor::new(group_scope(&spec.name), &self.env, self.options.max_depth);
        debug!("Resolving {}", processor.scope());

        let allowlist_mode = InheritanceMode::from_declared(spec.env_allowlist.as_deref());
        let group_set = parse_allowlist(spec.env_allowlist.as_deref().unwrap_or_default(), processor.scope())?;
        let allowlist = Arc::new(EffectiveAllowlist::resolve(
            allowlist_mode,
            global.allowlist.as_set(),
            &group_set,
        ));
        debug!(
            "{}: allowlist mode '{}' permits {} names",
            processor.scope(),
            allowlist_mode,
            allowlist.len()
        );

        let mut vars = global.vars.clone();
        processor.import_from_env(&spec.from_env, &allowlist, &mut vars)?;
        processor.define_vars(&spec.vars, &mut vars)?;

        let effective_workdir = match spec.workdir.as_deref().filter(|w| !w.is_empty()) {
            Some(template) => {
                let workdir = processor.expand_field("workdir", template, &vars)?;
                processor.define_automatic(AUTO_VAR_WORKDIR, workdir.clone(), &mut vars);
                Some(workdir)
            }
            None => None,
        };

        let expanded_env = processor.define_env(&spec.env, &vars)?;
        let expanded_verify_files = processor.expand_list("verify_files", &spec.verify_files, &vars)?;

        let mut exported_env = global.expanded_env.clone();
        exported_env.extend(expanded_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(RuntimeGroup {
            spec,
            vars,
            expanded_env,
            exported_env,
            expanded_verify_files,
            effective_workdir,
            allowlist_mode,
            allowlist,
            global_timeout: global.spec.timeout,
            commands: Vec::new(),
        })
    }

    /// Resolves one command, seeded with its group's variables. The command's
    /// `from_env` is checked against the group's effective allowlist.
    pub fn resolve_command<'s>(
        &self,
        spec: &'s CommandSpec,
        group: &RuntimeGroup<'s>,
    ) -> ResolveResult<RuntimeCommand<'s>> {
        let mut processor = LevelProcessor::new(
            command_scope(group.name(), &spec.name),
            &self.env,
            self.options.max_depth,
        );
        debug!("Resolving {}", processor.scope());

        let mut vars = group.vars.clone();
        processor.import_from_env(&spec.from_env, &group.allowlist, &mut vars)?;
        processor.define_vars(&spec.vars, &mut vars)?;

        let effective_workdir = match spec.workdir.as_deref().filter(|w| !w.is_empty()) {
            Some(template) => {
                let workdir = processor.expand_field("workdir", template, &vars)?;
                processor.define_automatic(AUTO_VAR_WORKDIR, workdir.clone(), &mut vars);
                Some(workdir)
            }
            None => group.effective_workdir.clone(),
        };

        let expanded_env = processor.define_env(&spec.env, &vars)?;
        let expanded_cmd = processor.expand_field("cmd", &spec.cmd, &vars)?;
        let expanded_args = processor.expand_list("args", &spec.args, &vars)?;

        let declared_risk = spec.max_risk_level.as_deref().unwrap_or_default();
        let risk_level = RiskLevel::parse(declared_risk).ok_or_else(|| ResolveError::InvalidRiskLevel {
            scope: processor.scope().to_string(),
            value: declared_risk.to_string(),
        })?;

        let timeout = effective_timeout(spec.timeout, group.spec.timeout, group.global_timeout);
        let process_env = self.assemble_process_env(group, &expanded_env);

        Ok(RuntimeCommand {
            spec,
            group_name: group.name(),
            vars,
            expanded_cmd,
            expanded_args,
            expanded_env,
            process_env,
            effective_workdir,
            timeout,
            risk_level,
            allowlist: Arc::clone(&group.allowlist),
        })
    }

    /// Resolves a group and then each of its commands in declaration order.
    /// The first failing command fails the whole group.
    pub fn resolve_group_with_commands<'s>(
        &self,
        spec: &'s GroupSpec,
        global: &RuntimeGlobal<'_>,
    ) -> ResolveResult<RuntimeGroup<'s>> {
        let mut group = self.resolve_group(spec, global)?;
        for command in &spec.commands {
            let resolved = self.resolve_command(command, &group)?;
            group.push_command(resolved);
        }
        debug!("{} resolved with {} commands", group_scope(&spec.name), group.commands.len());
        Ok(group)
    }

    /// Resolves every group of `config` in parallel. Results are ordered by
    /// `(priority, declaration order)`; each group fails or succeeds on its own.
    pub fn resolve_groups<'s>(
        &self,
        config: &'s ConfigSpec,
        global: &RuntimeGlobal<'_>,
    ) -> Vec<GroupResolution<'s>> {
        let mut ordered: Vec<(usize, &'s GroupSpec)> = config.groups.iter().enumerate().collect();
        ordered.sort_by_key(|(index, group)| (group.priority, *index));

        ordered
            .into_par_iter()
            .map(|(_, spec)| GroupResolution {
                spec,
                result: self.resolve_group_with_commands(spec, global),
            })
            .collect()
    }

    /// Allowlisted system variables from the snapshot, overlaid by global,
    /// group and command `env`.
    fn assemble_process_env(
        &self,
        group: &RuntimeGroup<'_>,
        command_env: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut process_env: BTreeMap<String, String> = group
            .allowlist
            .as_set()
            .iter()
            .filter_map(|name| self.env.get(name).map(|value| (name.clone(), value.to_string())))
            .collect();
        process_env.extend(group.exported_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        process_env.extend(command_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        process_env
    }
}

/// Command, then group, then global, then the built-in default.
fn effective_timeout(command: Option<u64>, group: Option<u64>, global: Option<u64>) -> EffectiveTimeout {
    let (secs, source) = match (command, group, global) {
        (Some(secs), _, _) => (secs, TimeoutSource::Command),
        (None, Some(secs), _) => (secs, TimeoutSource::Group),
        (None, None, Some(secs)) => (secs, TimeoutSource::Global),
        (None, None, None) => (DEFAULT_TIMEOUT_SECS, TimeoutSource::Default),
    };
    EffectiveTimeout { secs, source }
}
