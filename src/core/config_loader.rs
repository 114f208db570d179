// src/core/config_loader.rs

//! # Config Loader
//!
//! Reads a runner configuration file into the immutable [`ConfigSpec`] tree and
//! checks the structural rules serde cannot express. Command templates are
//! applied here; `%{VAR}` references are left untouched for the resolver.

use crate::core::templates::{TemplateError, apply_templates};
use crate::models::ConfigSpec;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Failures while reading a configuration file.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The path does not name a regular file.
    #[error("Configuration file not found at '{path}'.")]
    NotFound {
        /// Path that was read.
        path: String,
    },
    /// The file could not be read.
    #[error("Filesystem Error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML or does not match the configuration shape.
    #[error("Error parsing TOML in '{path}': {source}")]
    TomlParse {
        /// Path that was read.
        path: String,
        /// Underlying parser error.
        #[source]
        source: toml::de::Error,
    },
    /// A group with an empty name.
    #[error("Group #{index} has an empty name.")]
    EmptyGroupName {
        /// Position in the list, starting at 0.
        index: usize,
    },
    /// Two groups with the same name.
    #[error("Group '{name}' is defined more than once.")]
    DuplicateGroup {
        /// Offending name.
        name: String,
    },
    /// A command with an empty name.
    #[error("Command #{index} of group '{group}' has an empty name.")]
    EmptyCommandName {
        /// Group name.
        group: String,
        /// Position in the list, starting at 0.
        index: usize,
    },
    /// Two commands with the same name in one group.
    #[error("Command '{name}' is defined more than once in group '{group}'.")]
    DuplicateCommand {
        /// Group name.
        group: String,
        /// Offending name.
        name: String,
    },
    /// A command with neither `cmd` nor `template`.
    #[error("Command '{name}' of group '{group}' has no 'cmd' and no 'template'.")]
    MissingCmd {
        /// Group name.
        group: String,
        /// Offending name.
        name: String,
    },
    /// A command template is invalid or could not be applied.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Result alias for configuration loading.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Reads and validates the configuration file at `path`.
pub fn load_config(path: &Path) -> LoaderResult<ConfigSpec> {
    if !path.is_file() {
        return Err(LoaderError::NotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path)?;
    log::debug!("Loaded configuration from '{}'", path.display());
    parse_named(&content, &path.display().to_string())
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> LoaderResult<ConfigSpec> {
    parse_named(content, "<inline>")
}

fn parse_named(content: &str, origin: &str) -> LoaderResult<ConfigSpec> {
    let mut config: ConfigSpec = toml::from_str(content).map_err(|e| LoaderError::TomlParse {
        path: origin.to_string(),
        source: e,
    })?;
    validate(&config)?;
    apply_templates(&mut config)?;
    Ok(config)
}

fn validate(config: &ConfigSpec) -> LoaderResult<()> {
    let mut group_names = HashSet::new();
    for (index, group) in config.groups.iter().enumerate() {
        if group.name.trim().is_empty() {
            return Err(LoaderError::EmptyGroupName { index });
        }
        if !group_names.insert(group.name.as_str()) {
            return Err(LoaderError::DuplicateGroup {
                name: group.name.clone(),
            });
        }

        let mut command_names = HashSet::new();
        for (index, command) in group.commands.iter().enumerate() {
            if command.name.trim().is_empty() {
                return Err(LoaderError::EmptyCommandName {
                    group: group.name.clone(),
                    index,
                });
            }
            if !command_names.insert(command.name.as_str()) {
                return Err(LoaderError::DuplicateCommand {
                    group: group.name.clone(),
                    name: command.name.clone(),
                });
            }
            if command.template.is_none() && command.cmd.trim().is_empty() {
                return Err(LoaderError::MissingCmd {
                    group: group.name.clone(),
                    name: command.name.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
version = "1.0"

[global]
timeout = 30
env_allowlist = ["PATH", "HOME"]
vars = ["BASE=/opt"]

[[groups]]
name = "build"
priority = 2
workdir = "%{BASE}/work"
env_allowlist = []
vars = ["BIN=%{BASE}/bin"]

[[groups.commands]]
name = "compile"
cmd = "%{BIN}/tool"
args = ["--fast"]
max_risk_level = "medium"

[[groups]]
name = "test"
"#;

    // --- Parsing Tests ---
    #[test]
    fn test_parse_full_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.global.timeout, Some(30));
        assert_eq!(config.groups.len(), 2);

        let build = &config.groups[0];
        assert_eq!(build.priority, 2);
        assert_eq!(build.env_allowlist, Some(Vec::new()));
        assert_eq!(build.commands[0].cmd, "%{BIN}/tool");
        assert_eq!(build.commands[0].max_risk_level.as_deref(), Some("medium"));

        let test = &config.groups[1];
        assert!(test.env_allowlist.is_none());
        assert!(test.commands.is_empty());
    }

    #[test]
    fn test_empty_document_is_valid() {
        let config = parse_config("").unwrap();
        assert!(config.groups.is_empty());
        assert!(config.global.env_allowlist.is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config("[global]\nenv_alowlist = []\n").unwrap_err();
        assert!(matches!(err, LoaderError::TomlParse { .. }));
    }

    #[test]
    fn test_command_requires_cmd() {
        let err = parse_config("[[groups]]\nname = \"g\"\n[[groups.commands]]\nname = \"c\"\n").unwrap_err();
        assert!(matches!(err, LoaderError::MissingCmd { ref name, .. } if name == "c"));
    }

    // --- Validation Tests ---
    #[test]
    fn test_duplicate_group_rejected() {
        let err = parse_config("[[groups]]\nname = \"a\"\n[[groups]]\nname = \"a\"\n").unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateGroup { ref name } if name == "a"));
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let content = r#"
[[groups]]
name = "g"
[[groups.commands]]
name = "c"
cmd = "true"
[[groups.commands]]
name = "c"
cmd = "false"
"#;
        let err = parse_config(content).unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateCommand { .. }));
    }

    #[test]
    fn test_empty_names_rejected() {
        let err = parse_config("[[groups]]\nname = \" \"\n").unwrap_err();
        assert!(matches!(err, LoaderError::EmptyGroupName { index: 0 }));

        let err = parse_config("[[groups]]\nname = \"g\"\n[[groups.commands]]\nname = \"\"\ncmd = \"x\"\n")
            .unwrap_err();
        assert!(matches!(err, LoaderError::EmptyCommandName { index: 0, .. }));
    }

    // --- Template Tests ---
    const TEMPLATED: &str = r#"
[global]
vars = ["BACKUP_ROOT=/srv/backup"]

[command_templates.rsync_to]
cmd = "/usr/bin/rsync"
args = ["${@flags}", "${src}", "%{BACKUP_ROOT}/${dest}"]
env = ["RSYNC_RSH=${?rsh}"]

[[groups]]
name = "nightly"

[[groups.commands]]
name = "photos"
template = "rsync_to"
params = { flags = ["-a", "--delete"], src = "/home/u/photos", dest = "photos" }

[[groups.commands]]
name = "plain"
cmd = "true"
"#;

    #[test]
    fn test_templates_applied_on_load() {
        let config = parse_config(TEMPLATED).unwrap();
        let photos = &config.groups[0].commands[0];
        assert_eq!(photos.cmd, "/usr/bin/rsync");
        assert_eq!(photos.args, ["-a", "--delete", "/home/u/photos", "%{BACKUP_ROOT}/photos"]);
        assert!(photos.env.is_empty());
        assert_eq!(config.groups[0].commands[1].cmd, "true");
        assert!(config.command_templates.contains_key("rsync_to"));
    }

    #[test]
    fn test_unknown_template_rejected() {
        let content = "[[groups]]\nname = \"g\"\n[[groups.commands]]\nname = \"c\"\ntemplate = \"nope\"\n";
        let err = parse_config(content).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Template(TemplateError::UnknownTemplate { ref template, .. }) if template == "nope"
        ));
    }

    #[test]
    fn test_missing_required_param_rejected() {
        let content = TEMPLATED.replace(r#"src = "/home/u/photos", "#, "");
        let err = parse_config(&content).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Template(TemplateError::MissingParam { ref param, .. }) if param == "src"
        ));
    }

    // --- File Tests ---
    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.groups[0].name, "build");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("runner.toml")).unwrap_err();
        assert!(matches!(err, LoaderError::NotFound { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[global\n").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
