// src/cli/handlers/plan.rs

//! The dry-run report: load, resolve and print what would be executed.

use crate::{
    cli::args::{Cli, OutputFormat},
    constants::REDACTED,
    core::{
        allowlist::InheritanceMode,
        config_loader,
        config_resolver::{GroupResolution, Resolver, ResolverOptions},
        variables::VariableSet,
    },
    models::{ConfigSpec, RiskLevel, RuntimeCommand, RuntimeGlobal, RuntimeGroup, TimeoutSource},
    system::environment::{Environment, ProcessEnvironment},
};
use anyhow::{Context, Result, anyhow};
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;

// --- REPORT MODEL ---

/// The whole dry-run plan.
#[derive(Serialize, Debug)]
pub struct PlanReport {
    /// The resolved `[global]` scope.
    pub global: GlobalReport,
    /// One entry per selected group, in execution order.
    pub groups: Vec<GroupReport>,
}

/// The resolved `[global]` scope.
#[derive(Serialize, Debug)]
pub struct GlobalReport {
    /// Sorted global allowlist.
    pub allowlist: Vec<String>,
    /// Variables, masked unless values were requested.
    pub vars: BTreeMap<String, String>,
    /// Exported environment, masked unless values were requested.
    pub env: BTreeMap<String, String>,
    /// Expanded paths to verify.
    pub verify_files: Vec<String>,
}

/// A group and either its resolution or the error that stopped it.
#[derive(Serialize, Debug)]
pub struct GroupReport {
    /// Group name.
    pub name: String,
    /// Declared priority.
    pub priority: i32,
    /// Why the group failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The resolved group, if it succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedGroupReport>,
}

/// A successfully resolved group.
#[derive(Serialize, Debug)]
pub struct ResolvedGroupReport {
    /// How the allowlist was derived.
    pub allowlist_mode: InheritanceMode,
    /// Sorted effective allowlist.
    pub allowlist: Vec<String>,
    /// Expanded group workdir.
    pub workdir: Option<String>,
    /// Variables, masked unless values were requested.
    pub vars: BTreeMap<String, String>,
    /// The group's own exported environment.
    pub env: BTreeMap<String, String>,
    /// Expanded paths to verify.
    pub verify_files: Vec<String>,
    /// Resolved commands.
    pub commands: Vec<CommandReport>,
}

/// A resolved command as it would be executed.
#[derive(Serialize, Debug)]
pub struct CommandReport {
    /// Command name.
    pub name: String,
    /// Template the command was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Expanded command line.
    pub cmd: String,
    /// Expanded arguments.
    pub args: Vec<String>,
    /// Effective workdir.
    pub workdir: Option<String>,
    /// Effective timeout in seconds.
    pub timeout_secs: u64,
    /// Level that supplied the timeout.
    pub timeout_source: TimeoutSource,
    /// Declared risk ceiling.
    pub max_risk_level: RiskLevel,
    /// User to run as.
    pub run_as_user: Option<String>,
    /// Group to run as.
    pub run_as_group: Option<String>,
    /// Environment for the child process, masked unless values were requested.
    pub process_env: BTreeMap<String, String>,
}

// --- HANDLER ---

/// Loads the configuration named on the command line, resolves it against the
/// current process environment and prints the plan.
///
/// Returns an error if the global scope or any selected group fails.
pub fn handle(cli: &Cli) -> Result<()> {
    let config = config_loader::load_config(&cli.config)
        .with_context(|| format!("Failed to load '{}'", cli.config.display()))?;
    let selected = select_groups(&config, &cli.group)?;

    let options = ResolverOptions::default().with_max_depth(cli.max_depth);
    let resolver = Resolver::with_options(ProcessEnvironment::capture(), options);
    let report = build_report(&resolver, &selected, cli.show_values)?;

    match cli.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
            println!("{json}");
        }
        OutputFormat::Text => print_report(&report),
    }

    let failed = report.groups.iter().filter(|g| g.error.is_some()).count();
    if failed > 0 {
        return Err(anyhow!(
            "{} of {} groups failed to resolve",
            failed,
            report.groups.len()
        ));
    }
    Ok(())
}

/// Restricts `config` to the named groups. Unknown names are an error.
fn select_groups(config: &ConfigSpec, names: &[String]) -> Result<ConfigSpec> {
    if names.is_empty() {
        return Ok(config.clone());
    }
    if let Some(unknown) = names
        .iter()
        .find(|name| !config.groups.iter().any(|g| &g.name == *name))
    {
        return Err(anyhow!("Group '{}' is not defined in the configuration.", unknown));
    }
    Ok(ConfigSpec {
        groups: config
            .groups
            .iter()
            .filter(|g| names.contains(&g.name))
            .cloned()
            .collect(),
        ..config.clone()
    })
}

/// Resolves everything and converts the runtime tree into a report.
pub fn build_report<E: Environment>(
    resolver: &Resolver<E>,
    config: &ConfigSpec,
    show_values: bool,
) -> Result<PlanReport> {
    let global = resolver
        .resolve_global(&config.global)
        .context("Failed to resolve the global scope")?;
    resolver
        .check_templates(config, &global)
        .context("Invalid command template")?;

    let groups = resolver
        .resolve_groups(config, &global)
        .into_iter()
        .map(|resolution| group_report(resolution, show_values))
        .collect();

    Ok(PlanReport {
        global: global_report(&global, show_values),
        groups,
    })
}

fn global_report(global: &RuntimeGlobal<'_>, show_values: bool) -> GlobalReport {
    GlobalReport {
        allowlist: global.allowlist().sorted_names().to_vec(),
        vars: masked_vars(global.vars(), show_values),
        env: masked(global.expanded_env(), show_values),
        verify_files: global.expanded_verify_files().to_vec(),
    }
}

fn group_report(resolution: GroupResolution<'_>, show_values: bool) -> GroupReport {
    let GroupResolution { spec, result } = resolution;
    match result {
        Ok(group) => GroupReport {
            name: spec.name.clone(),
            priority: spec.priority,
            error: None,
            resolved: Some(resolved_group_report(&group, show_values)),
        },
        Err(e) => {
            log::warn!("Group '{}' could not be resolved: {}", spec.name, e);
            GroupReport {
                name: spec.name.clone(),
                priority: spec.priority,
                error: Some(e.to_string()),
                resolved: None,
            }
        }
    }
}

fn resolved_group_report(group: &RuntimeGroup<'_>, show_values: bool) -> ResolvedGroupReport {
    ResolvedGroupReport {
        allowlist_mode: group.allowlist_mode(),
        allowlist: group.allowlist().sorted_names().to_vec(),
        workdir: group.effective_workdir().map(str::to_string),
        vars: masked_vars(group.vars(), show_values),
        env: masked(group.expanded_env(), show_values),
        verify_files: group.expanded_verify_files().to_vec(),
        commands: group
            .commands()
            .iter()
            .map(|c| command_report(c, show_values))
            .collect(),
    }
}

fn command_report(command: &RuntimeCommand<'_>, show_values: bool) -> CommandReport {
    let timeout = command.timeout();
    CommandReport {
        name: command.name().to_string(),
        template: command.spec().template.clone(),
        cmd: command.expanded_cmd().to_string(),
        args: command.expanded_args().to_vec(),
        workdir: command.effective_workdir().map(str::to_string),
        timeout_secs: timeout.secs,
        timeout_source: timeout.source,
        max_risk_level: command.max_risk_level(),
        run_as_user: command.run_as_user().map(str::to_string),
        run_as_group: command.run_as_group().map(str::to_string),
        process_env: masked(command.process_env(), show_values),
    }
}

fn masked(values: &BTreeMap<String, String>, show_values: bool) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), mask(v, show_values)))
        .collect()
}

fn masked_vars(vars: &VariableSet, show_values: bool) -> BTreeMap<String, String> {
    vars.definitions()
        .into_iter()
        .map(|d| (d.name().to_string(), mask(d.value(), show_values)))
        .collect()
}

fn mask(value: &str, show_values: bool) -> String {
    if show_values {
        value.to_string()
    } else {
        REDACTED.to_string()
    }
}

// --- TEXT RENDERING ---

fn print_report(report: &PlanReport) {
    println!("\n--- {} ---", "Global".yellow());
    print_list("allowlist", &report.global.allowlist);
    print_map("vars", &report.global.vars);
    print_map("env", &report.global.env);
    print_list("verify_files", &report.global.verify_files);

    for group in &report.groups {
        println!(
            "\n--- {} '{}' (priority {}) ---",
            "Group".yellow(),
            group.name.cyan(),
            group.priority
        );
        if let Some(error) = &group.error {
            println!("  {:<15} {}", "error".red().bold(), error);
            continue;
        }
        let Some(resolved) = &group.resolved else {
            continue;
        };
        println!("  {:<15} {}", "allowlist mode".blue(), resolved.allowlist_mode);
        print_list("allowlist", &resolved.allowlist);
        if let Some(workdir) = &resolved.workdir {
            println!("  {:<15} {}", "workdir".blue(), workdir);
        }
        print_map("vars", &resolved.vars);
        print_map("env", &resolved.env);
        print_list("verify_files", &resolved.verify_files);

        for command in &resolved.commands {
            println!("\n  {} {}", "▸".green(), command.name.bold());
            let line = std::iter::once(command.cmd.as_str())
                .chain(command.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            println!("    {:<13} {}", "run".blue(), line);
            if let Some(template) = &command.template {
                println!("    {:<13} {}", "template".blue(), template);
            }
            if let Some(workdir) = &command.workdir {
                println!("    {:<13} {}", "workdir".blue(), workdir);
            }
            println!(
                "    {:<13} {}s ({:?})",
                "timeout".blue(),
                command.timeout_secs,
                command.timeout_source
            );
            println!("    {:<13} {}", "max risk".blue(), command.max_risk_level);
            if let Some(user) = &command.run_as_user {
                println!("    {:<13} {}", "run as user".blue(), user);
            }
            if let Some(group) = &command.run_as_group {
                println!("    {:<13} {}", "run as group".blue(), group);
            }
            for (key, value) in &command.process_env {
                println!("    {:<13} {}={}", "env".dimmed(), key, value.dimmed());
            }
        }
    }
    println!("\n---------------------------------");
}

fn print_list(label: &str, items: &[String]) {
    if items.is_empty() {
        println!("  {:<15} {}", label.blue(), "(none)".dimmed());
    } else {
        println!("  {:<15} {}", label.blue(), items.join(", "));
    }
}

fn print_map(label: &str, values: &BTreeMap<String, String>) {
    if values.is_empty() {
        println!("  {:<15} {}", label.blue(), "(none)".dimmed());
        return;
    }
    println!("  {}", label.blue());
    for (key, value) in values {
        println!("    {} = {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_loader::parse_config;
    use crate::system::environment::MapEnvironment;

    const CONFIG: &str = r#"
[global]
env_allowlist = ["PATH"]
vars = ["BASE=/opt"]

[[groups]]
name = "build"
vars = ["BIN=%{BASE}/bin"]

[[groups.commands]]
name = "compile"
cmd = "%{BIN}/tool"
args = ["--pid", "%{__runner_pid}"]

[[groups]]
name = "broken"
priority = -1
env_allowlist = []
from_env = ["p=PATH"]
"#;

    fn resolver() -> Resolver<MapEnvironment> {
        Resolver::with_options(
            MapEnvironment::new().with("PATH", "/usr/bin"),
            ResolverOptions::default().with_runner_pid(7),
        )
    }

    #[test]
    fn test_report_masks_values_by_default() {
        let config = parse_config(CONFIG).unwrap();
        let report = build_report(&resolver(), &config, false).unwrap();

        assert_eq!(report.global.vars.get("BASE").map(String::as_str), Some(REDACTED));
        let build = report.groups.iter().find(|g| g.name == "build").unwrap();
        let command = &build.resolved.as_ref().unwrap().commands[0];
        assert_eq!(command.cmd, "/opt/bin/tool");
        assert_eq!(command.args, vec!["--pid", "7"]);
        assert_eq!(command.process_env.get("PATH").map(String::as_str), Some(REDACTED));
    }

    #[test]
    fn test_report_shows_values_on_request() {
        let config = parse_config(CONFIG).unwrap();
        let report = build_report(&resolver(), &config, true).unwrap();
        assert_eq!(report.global.vars.get("BASE").map(String::as_str), Some("/opt"));
    }

    #[test]
    fn test_report_keeps_failed_group_with_error() {
        let config = parse_config(CONFIG).unwrap();
        let report = build_report(&resolver(), &config, false).unwrap();

        assert_eq!(report.groups[0].name, "broken");
        let error = report.groups[0].error.as_deref().unwrap();
        assert!(error.contains("not permitted by the environment allowlist"));
        assert!(report.groups[1].error.is_none());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let config = parse_config(CONFIG).unwrap();
        let report = build_report(&resolver(), &config, false).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["groups"][1]["resolved"]["allowlist_mode"], "inherit");
        assert_eq!(json["groups"][1]["resolved"]["commands"][0]["max_risk_level"], "low");
        assert_eq!(json["groups"][1]["resolved"]["commands"][0]["timeout_source"], "default");
        assert!(json["groups"][0].get("resolved").is_none());
    }

    #[test]
    fn test_report_names_template() {
        let config = parse_config(
            r#"
[global]
vars = ["BASE=/opt"]

[command_templates.tool]
cmd = "%{BASE}/bin/${name}"

[[groups]]
name = "g"

[[groups.commands]]
name = "c"
template = "tool"
params = { name = "lint" }
"#,
        )
        .unwrap();
        let report = build_report(&resolver(), &config, false).unwrap();
        let command = &report.groups[0].resolved.as_ref().unwrap().commands[0];
        assert_eq!(command.template.as_deref(), Some("tool"));
        assert_eq!(command.cmd, "/opt/bin/lint");
    }

    #[test]
    fn test_template_referencing_group_variable_fails_report() {
        let config = parse_config(
            r#"
[command_templates.tool]
cmd = "%{BIN}/tool"

[[groups]]
name = "g"
vars = ["BIN=/usr/bin"]

[[groups.commands]]
name = "c"
template = "tool"
"#,
        )
        .unwrap();
        let err = build_report(&resolver(), &config, false).unwrap_err();
        assert!(format!("{err:#}").contains("template[tool].cmd"));
    }

    #[test]
    fn test_select_groups() {
        let config = parse_config(CONFIG).unwrap();
        let only_build = select_groups(&config, &["build".to_string()]).unwrap();
        assert_eq!(only_build.groups.len(), 1);
        assert!(select_groups(&config, &["nope".to_string()]).is_err());
        assert_eq!(select_groups(&config, &[]).unwrap().groups.len(), 2);
    }
}
