// tests/resolution.rs

use chrono::{DateTime, Utc};
use runwarden::constants::{DEFAULT_TIMEOUT_SECS, MAX_DEPTH_CEILING};
use runwarden::core::config_loader::parse_config;
use runwarden::core::config_resolver::{Resolver, ResolverOptions};
use runwarden::core::errors::{ErrorKind, ResolveError};
use runwarden::core::interpolator::expand;
use runwarden::models::{ConfigSpec, TimeoutSource};
use runwarden::system::environment::MapEnvironment;
use std::collections::{BTreeMap, HashMap};

fn resolver(env: MapEnvironment) -> Resolver<MapEnvironment> {
    let options = ResolverOptions::default()
        .with_runner_pid(1000)
        .with_started_at(DateTime::<Utc>::UNIX_EPOCH);
    Resolver::with_options(env, options)
}

fn first_error(config: &ConfigSpec, r: &Resolver<MapEnvironment>) -> ResolveError {
    let global = match r.resolve_global(&config.global) {
        Ok(global) => global,
        Err(e) => return e,
    };
    r.resolve_groups(config, &global)
        .into_iter()
        .find_map(|g| g.result.err())
        .unwrap()
}

// --- Documented Scenarios ---
#[test]
fn test_base_bin_tool_scenario() {
    let config = parse_config(
        r#"
[global]
vars = ["BASE=/opt"]

[[groups]]
name = "g"
vars = ["BIN=%{BASE}/bin"]

[[groups.commands]]
name = "c"
cmd = "%{BIN}/tool"
"#,
    )
    .unwrap();
    let r = resolver(MapEnvironment::new());
    let global = r.resolve_global(&config.global).unwrap();
    let groups = r.resolve_groups(&config, &global);
    let group = groups[0].result.as_ref().unwrap();
    assert_eq!(group.commands()[0].expanded_cmd(), "/opt/bin/tool");
}

#[test]
fn test_two_variable_cycle_scenario() {
    let config = parse_config(
        r#"
[[groups]]
name = "g"
vars = ["a=%{b}", "b=%{a}"]
"#,
    )
    .unwrap();
    let err = first_error(&config, &resolver(MapEnvironment::new()));
    assert_eq!(err.kind(), ErrorKind::CircularReference);
    assert!(err.to_string().ends_with("a -> b -> a"), "{err}");
}

#[test]
fn test_explicit_empty_allowlist_scenario() {
    let config = parse_config(
        r#"
[global]
env_allowlist = ["PATH"]

[[groups]]
name = "g"
env_allowlist = []
from_env = ["p=PATH"]
"#,
    )
    .unwrap();
    let err = first_error(&config, &resolver(MapEnvironment::new().with("PATH", "/bin")));
    assert_eq!(err.kind(), ErrorKind::AllowlistViolation);
}

// --- Properties ---
#[test]
fn test_resolution_is_deterministic() {
    let config = parse_config(
        r#"
[global]
env_allowlist = ["HOME", "PATH"]
from_env = ["home=HOME"]
vars = ["cache=%{home}/.cache", "tmp=%{cache}/tmp", "z=1", "a=%{z}%{z}"]
env = ["LANG=C"]

[[groups]]
name = "one"
workdir = "%{tmp}/one"
vars = ["x=%{a}"]
env = ["X=%{__runner_workdir}/%{x}"]

[[groups.commands]]
name = "run"
cmd = "%{__runner_workdir}/%{x}/bin"
args = ["%{home}", "\\%literal"]

[[groups]]
name = "two"
vars = ["y=%{cache}"]
"#,
    )
    .unwrap();
    let env = MapEnvironment::new().with("HOME", "/home/u").with("PATH", "/bin");

    let render = || {
        let r = resolver(env.clone());
        let global = r.resolve_global(&config.global).unwrap();
        let groups = r.resolve_groups(&config, &global);
        groups
            .iter()
            .map(|g| {
                let group = g.result.as_ref().unwrap();
                let commands: Vec<String> = group
                    .commands()
                    .iter()
                    .map(|c| format!("{} {:?} {:?}", c.expanded_cmd(), c.expanded_args(), c.process_env()))
                    .collect();
                let vars: BTreeMap<String, String> = group.vars().to_map().into_iter().collect();
                format!("{:?}|{:?}|{:?}", vars, group.expanded_env(), commands)
            })
            .collect::<Vec<_>>()
    };

    let first = render();
    assert_eq!(first, render());
    assert!(first[0].contains("/home/u/.cache/tmp/one/11/bin"));
    assert!(first[0].contains("%literal"));
}

#[test]
fn test_cycle_across_all_three_scopes() {
    let config = parse_config(
        r#"
[global]
vars = ["A=base"]

[[groups]]
name = "g"
vars = ["B=%{A}/b"]

[[groups.commands]]
name = "c"
cmd = "%{A}"
vars = ["A=%{B}"]
"#,
    )
    .unwrap();
    let err = first_error(&config, &resolver(MapEnvironment::new()));
    assert!(matches!(
        err,
        ResolveError::CircularReference { ref chain, ref scope, .. }
            if chain == &["A", "B", "A"] && scope == "command[g/c]"
    ));
}

#[test]
fn test_depth_bound_around_the_limit() {
    let build = |n: usize| -> ConfigSpec {
        let mut vars = vec!["\"v1=x\"".to_string()];
        vars.extend((2..=n).map(|i| format!("\"v{i}=%{{v{}}}\"", i - 1)));
        parse_config(&format!("[global]\nvars = [{}]\n", vars.join(", "))).unwrap()
    };
    let r = Resolver::with_options(
        MapEnvironment::new(),
        ResolverOptions::default().with_max_depth(10),
    );

    let below = build(9);
    assert!(r.resolve_global(&below.global).is_ok());

    let at = build(10);
    let err = r.resolve_global(&at.global).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionDepthExceeded);

    let above = build(25);
    let err = r.resolve_global(&above.global).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionDepthExceeded);
}

#[test]
fn test_reverse_ordered_chain_at_the_ceiling_resolves_in_groups() {
    let links = MAX_DEPTH_CEILING - 1;
    let vars: Vec<String> = (1..=links)
        .rev()
        .map(|i| match i {
            1 => "\"v1=x\"".to_string(),
            _ => format!("\"v{i}=%{{v{}}}\"", i - 1),
        })
        .collect();
    let config = parse_config(&format!(
        "[[groups]]\nname = \"deep\"\nvars = [{}]\n\n[[groups.commands]]\nname = \"c\"\ncmd = \"%{{v{links}}}\"\n",
        vars.join(", ")
    ))
    .unwrap();
    let r = Resolver::with_options(
        MapEnvironment::new(),
        ResolverOptions::default().with_max_depth(MAX_DEPTH_CEILING),
    );
    let global = r.resolve_global(&config.global).unwrap();
    let groups = r.resolve_groups(&config, &global);
    let group = groups[0].result.as_ref().unwrap();
    assert_eq!(group.commands()[0].expanded_cmd(), "x");
}

#[test]
fn test_allowlist_enforced_even_when_value_could_be_declared() {
    let config = parse_config(
        r#"
[global]
env_allowlist = ["HOME"]

[[groups]]
name = "g"
vars = ["path=/usr/bin"]
from_env = ["p=PATH"]
"#,
    )
    .unwrap();
    let err = first_error(&config, &resolver(MapEnvironment::new().with("PATH", "/usr/bin")));
    assert!(matches!(
        err,
        ResolveError::AllowlistViolation { ref system_var, .. } if system_var == "PATH"
    ));
}

#[test]
fn test_escapes_need_no_variables() {
    assert_eq!(
        expand(r"\%\%{X}\\", &HashMap::new(), "global", "cmd").unwrap(),
        r"%%{X}\"
    );
}

// --- Supplemented Behavior ---
#[test]
fn test_timeouts_and_sources() {
    let config = parse_config(
        r#"
[global]
timeout = 100

[[groups]]
name = "with_group_timeout"
timeout = 50

[[groups.commands]]
name = "own"
cmd = "a"
timeout = 5

[[groups.commands]]
name = "inherited"
cmd = "b"

[[groups]]
name = "plain"

[[groups.commands]]
name = "global"
cmd = "c"
"#,
    )
    .unwrap();
    let r = resolver(MapEnvironment::new());
    let global = r.resolve_global(&config.global).unwrap();
    let groups = r.resolve_groups(&config, &global);

    let timed = groups[0].result.as_ref().unwrap();
    assert_eq!(timed.commands()[0].timeout().secs, 5);
    assert_eq!(timed.commands()[1].timeout().source, TimeoutSource::Group);
    let plain = groups[1].result.as_ref().unwrap();
    assert_eq!(plain.commands()[0].timeout().secs, 100);

    let bare = parse_config("[[groups]]\nname = \"g\"\n[[groups.commands]]\nname = \"c\"\ncmd = \"x\"\n").unwrap();
    let global = r.resolve_global(&bare.global).unwrap();
    let groups = r.resolve_groups(&bare, &global);
    let only = &groups[0].result.as_ref().unwrap().commands()[0];
    assert_eq!(only.timeout().secs, DEFAULT_TIMEOUT_SECS);
    assert_eq!(only.timeout().source, TimeoutSource::Default);
}

#[test]
fn test_templated_command_resolves_with_group_variables_in_params() {
    let config = parse_config(
        r#"
[global]
vars = ["TOOLS=/opt/tools"]

[command_templates.archive]
cmd = "%{TOOLS}/tar"
args = ["${@flags}", "-f", "${archive}", "${?source}"]
vars = ["label=${archive}"]
env = ["ARCHIVE_LABEL=%{label}"]

[[groups]]
name = "backup"
vars = ["out=/var/backups"]

[[groups.commands]]
name = "etc"
template = "archive"
params = { flags = ["-c", "-z"], archive = "%{out}/etc.tgz", source = "/etc" }
"#,
    )
    .unwrap();
    let r = resolver(MapEnvironment::new());
    let global = r.resolve_global(&config.global).unwrap();
    r.check_templates(&config, &global).unwrap();

    let groups = r.resolve_groups(&config, &global);
    let command = &groups[0].result.as_ref().unwrap().commands()[0];
    assert_eq!(command.expanded_cmd(), "/opt/tools/tar");
    assert_eq!(command.expanded_args(), ["-c", "-z", "-f", "/var/backups/etc.tgz", "/etc"]);
    assert_eq!(
        command.expanded_env().get("ARCHIVE_LABEL").map(String::as_str),
        Some("/var/backups/etc.tgz")
    );
}

#[test]
fn test_runner_datetime_is_available_everywhere() {
    let config = parse_config(
        r#"
[[groups]]
name = "g"

[[groups.commands]]
name = "c"
cmd = "echo"
args = ["%{__runner_datetime}"]
"#,
    )
    .unwrap();
    let r = resolver(MapEnvironment::new());
    let global = r.resolve_global(&config.global).unwrap();
    let groups = r.resolve_groups(&config, &global);
    let command = &groups[0].result.as_ref().unwrap().commands()[0];
    assert_eq!(command.expanded_args(), ["19700101000000.000"]);
}

#[test]
fn test_sibling_groups_are_independent() {
    let config = parse_config(
        r#"
[[groups]]
name = "bad"
vars = ["x=%{missing}"]

[[groups]]
name = "good"
vars = ["x=fine"]

[[groups.commands]]
name = "c"
cmd = "echo %{x}"
"#,
    )
    .unwrap();
    let r = resolver(MapEnvironment::new());
    let global = r.resolve_global(&config.global).unwrap();
    let groups = r.resolve_groups(&config, &global);
    assert_eq!(groups[0].result.as_ref().unwrap_err().kind(), ErrorKind::UndefinedVariable);
    assert_eq!(
        groups[1].result.as_ref().unwrap().commands()[0].expanded_cmd(),
        "echo fine"
    );
}
