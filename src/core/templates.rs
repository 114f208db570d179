// src/core/templates.rs

//! # Command Templates
//!
//! A `[command_templates.NAME]` table describes a command once; commands reuse
//! it with `template = "NAME"` and a `params` table. Placeholders come in three
//! shapes:
//!
//! - `${name}` is required and must be given a string.
//! - `${?name}` is optional. A whole entry made of it disappears when the value
//!   is missing or empty. Inside a longer entry it becomes the empty string.
//! - `${@name}` takes a list and must be a whole `args`, `env`, `vars` or
//!   `from_env` entry. Each element becomes its own entry.
//!
//! `\$` and `\\` escape a dollar sign and a backslash. Templates are applied
//! when the configuration is loaded, so the resolver only ever sees ordinary
//! commands. `%{VAR}` references pass through untouched; inside the template
//! itself they may only name global variables or the template's own variables,
//! see [`check_template_references`].

use crate::core::declarations::is_valid_name;
use crate::core::errors::{ResolveError, ResolveResult};
use crate::core::interpolator::Template;
use crate::core::variables::VariableSet;
use crate::models::{CommandSpec, CommandTemplate, ConfigSpec, ParamValue};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Failures while validating or applying a command template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The table key is not an identifier or starts with `__`.
    #[error("Template name '{name}' is invalid: {reason}.")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why the entry was rejected.
        reason: String,
    },
    /// A template without a command line.
    #[error("Template '{template}' has an empty 'cmd'.")]
    MissingCmd {
        /// Template name or text involved.
        template: String,
    },
    /// `template = "..."` names no `[command_templates]` entry.
    #[error("Command '{command}' of group '{group}' uses unknown template '{template}'.")]
    UnknownTemplate {
        /// Group name.
        group: String,
        /// Command name.
        command: String,
        /// Template name or text involved.
        template: String,
    },
    /// A templated command also spells out a field the template owns.
    #[error("Command '{command}' of group '{group}' sets '{field}' although it uses template '{template}'.")]
    FieldConflict {
        /// Group name.
        group: String,
        /// Command name.
        command: String,
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
    },
    /// A `params` key that is not an identifier.
    #[error("Template '{template}': parameter name '{param}' is invalid.")]
    InvalidParamName {
        /// Template name or text involved.
        template: String,
        /// Parameter name.
        param: String,
    },
    /// `${` without a matching `}`.
    #[error("Template '{template}', {field}: unclosed placeholder in '{input}'.")]
    UnclosedPlaceholder {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// Text being expanded.
        input: String,
    },
    /// Empty or non-identifier placeholder name.
    #[error("Template '{template}', {field}: invalid placeholder '{placeholder}'.")]
    InvalidPlaceholder {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// The placeholder text.
        placeholder: String,
    },
    /// `${name}` with no value for `name`.
    #[error("Template '{template}', {field}: required parameter '{param}' was not provided.")]
    MissingParam {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// Parameter name.
        param: String,
    },
    /// A list where a string is expected or the other way round.
    #[error("Template '{template}', {field}: parameter '{param}' must be a {expected}.")]
    TypeMismatch {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// Parameter name.
        param: String,
        /// Expected parameter kind.
        expected: &'static str,
    },
    /// `${@name}` mixed with other text, or used in `cmd`/`workdir`.
    #[error("Template '{template}', {field}: list parameter '{param}' must be a whole list entry.")]
    ListInMixedContext {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// Parameter name.
        param: String,
    },
    /// `${...}` in the key part of an `env` or `vars` entry.
    #[error("Template '{template}', {field}: placeholders are not allowed in keys ('{entry}').")]
    PlaceholderInKey {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// The raw entry.
        entry: String,
    },
    /// An expanded `env` or `vars` entry without `=`.
    #[error("Template '{template}', {field}: '{entry}' is not in KEY=VALUE form.")]
    InvalidEntry {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
        /// The raw entry.
        entry: String,
    },
    /// Two expanded `env` entries with the same key.
    #[error("Template '{template}': environment key '{key}' is defined more than once.")]
    DuplicateEnvKey {
        /// Template name or text involved.
        template: String,
        /// Environment key.
        key: String,
    },
    /// `cmd` expanded to nothing.
    #[error("Template '{template}', {field}: expands to an empty value.")]
    EmptyExpansion {
        /// Template name or text involved.
        template: String,
        /// Field being processed.
        field: String,
    },
}

/// Result alias for template expansion.
pub type TemplateResult<T> = Result<T, TemplateError>;

// --- Placeholder Parsing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Required,
    Optional,
    List,
}

#[derive(Debug)]
struct Placeholder<'a> {
    name: &'a str,
    slot: Slot,
    start: usize,
    end: usize,
}

/// Where an expansion happens, for error messages.
struct Site<'a> {
    template: &'a str,
    field: String,
}

impl Site<'_> {
    fn unclosed(&self, input: &str) -> TemplateError {
        TemplateError::UnclosedPlaceholder {
            template: self.template.to_string(),
            field: self.field.clone(),
            input: input.to_string(),
        }
    }

    fn mismatch(&self, param: &str, expected: &'static str) -> TemplateError {
        TemplateError::TypeMismatch {
            template: self.template.to_string(),
            field: self.field.clone(),
            param: param.to_string(),
            expected,
        }
    }

    fn mixed(&self, param: &str) -> TemplateError {
        TemplateError::ListInMixedContext {
            template: self.template.to_string(),
            field: self.field.clone(),
            param: param.to_string(),
        }
    }
}

fn parse_placeholders<'a>(input: &'a str, site: &Site<'_>) -> TemplateResult<Vec<Placeholder<'a>>> {
    let mut found = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '\\' => {
                if matches!(chars.peek(), Some((_, '$' | '\\'))) {
                    chars.next();
                }
            }
            '$' if matches!(chars.peek(), Some((_, '{'))) => {
                let body_start = start + 2;
                let close = input
                    .get(body_start..)
                    .and_then(|rest| rest.find('}'))
                    .ok_or_else(|| site.unclosed(input))?;
                let body = input.get(body_start..body_start + close).unwrap_or_default();

                let (slot, name) = if let Some(name) = body.strip_prefix('?') {
                    (Slot::Optional, name)
                } else if let Some(name) = body.strip_prefix('@') {
                    (Slot::List, name)
                } else {
                    (Slot::Required, body)
                };
                if !is_valid_name(name) {
                    return Err(TemplateError::InvalidPlaceholder {
                        template: site.template.to_string(),
                        field: site.field.clone(),
                        placeholder: format!("${{{body}}}"),
                    });
                }

                let end = body_start + close + 1;
                found.push(Placeholder {
                    name,
                    slot,
                    start,
                    end,
                });
                while chars.peek().is_some_and(|(i, _)| *i < end) {
                    chars.next();
                }
            }
            _ => {}
        }
    }
    Ok(found)
}

/// Resolves `\$` and `\\`; every other character is kept as is.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek().filter(|n| matches!(n, '$' | '\\')) {
                out.push(next);
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

// --- Expansion ---

/// Expands one entry into zero or more entries.
fn expand_entry(
    input: &str,
    params: &BTreeMap<String, ParamValue>,
    site: &Site<'_>,
    allow_list: bool,
) -> TemplateResult<Vec<String>> {
    let placeholders = parse_placeholders(input, site)?;

    if let [only] = placeholders.as_slice() {
        let whole = only.start == 0 && only.end == input.len();
        match only.slot {
            Slot::List if whole && allow_list => {
                return match params.get(only.name) {
                    None => Ok(Vec::new()),
                    Some(ParamValue::List(items)) => Ok(items.clone()),
                    Some(ParamValue::Text(_)) => Err(site.mismatch(only.name, "list")),
                };
            }
            Slot::Optional if whole => {
                return match params.get(only.name) {
                    None => Ok(Vec::new()),
                    Some(ParamValue::Text(value)) if value.is_empty() => Ok(Vec::new()),
                    Some(ParamValue::Text(value)) => Ok(vec![value.clone()]),
                    Some(ParamValue::List(_)) => Err(site.mismatch(only.name, "string")),
                };
            }
            _ => {}
        }
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for placeholder in &placeholders {
        out.push_str(&unescape(input.get(last..placeholder.start).unwrap_or_default()));
        match (placeholder.slot, params.get(placeholder.name)) {
            (Slot::List, _) => return Err(site.mixed(placeholder.name)),
            (_, Some(ParamValue::Text(value))) => out.push_str(value),
            (_, Some(ParamValue::List(_))) => return Err(site.mismatch(placeholder.name, "string")),
            (Slot::Optional, None) => {}
            (Slot::Required, None) => {
                return Err(TemplateError::MissingParam {
                    template: site.template.to_string(),
                    field: site.field.clone(),
                    param: placeholder.name.to_string(),
                });
            }
        }
        last = placeholder.end;
    }
    out.push_str(&unescape(input.get(last..).unwrap_or_default()));

    Ok(if out.is_empty() { Vec::new() } else { vec![out] })
}

/// Expands a field that must produce exactly one value.
fn expand_single(
    input: &str,
    params: &BTreeMap<String, ParamValue>,
    site: &Site<'_>,
) -> TemplateResult<Option<String>> {
    Ok(expand_entry(input, params, site, false)?.into_iter().next())
}

fn expand_list(
    template: &str,
    field: &str,
    entries: &[String],
    params: &BTreeMap<String, ParamValue>,
) -> TemplateResult<Vec<String>> {
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let site = Site {
            template,
            field: format!("{field}[{i}]"),
        };
        out.extend(expand_entry(entry, params, &site, true)?);
    }
    Ok(out)
}

/// Expands `KEY=VALUE` entries. Keys may not carry placeholders; a whole-entry
/// placeholder must expand to complete `KEY=VALUE` entries. With `drop_empty`,
/// entries whose value ends up empty are left out.
fn expand_assignments(
    template: &str,
    field: &str,
    entries: &[String],
    params: &BTreeMap<String, ParamValue>,
    drop_empty: bool,
) -> TemplateResult<Vec<String>> {
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let site = Site {
            template,
            field: format!("{field}[{i}]"),
        };

        let placeholders = parse_placeholders(entry, &site)?;
        let whole = matches!(placeholders.as_slice(), [only] if only.start == 0 && only.end == entry.len());
        if !whole {
            if let Some((key, _)) = entry.split_once('=') {
                if !parse_placeholders(key, &site)?.is_empty() {
                    return Err(TemplateError::PlaceholderInKey {
                        template: template.to_string(),
                        field: site.field,
                        entry: entry.clone(),
                    });
                }
            }
        }

        for expanded in expand_entry(entry, params, &site, true)? {
            let Some((_, value)) = expanded.split_once('=') else {
                return Err(TemplateError::InvalidEntry {
                    template: template.to_string(),
                    field: site.field,
                    entry: expanded,
                });
            };
            if drop_empty && value.is_empty() {
                continue;
            }
            out.push(expanded);
        }
    }
    Ok(out)
}

fn ensure_unique_keys(template: &str, env: &[String]) -> TemplateResult<()> {
    let mut seen = HashSet::new();
    for entry in env {
        let key = entry.split_once('=').map_or(entry.as_str(), |(key, _)| key);
        if !seen.insert(key) {
            return Err(TemplateError::DuplicateEnvKey {
                template: template.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Every parameter name a template mentions. Also surfaces placeholder syntax
/// errors in templates no command uses yet.
pub fn used_params(name: &str, template: &CommandTemplate) -> TemplateResult<HashSet<String>> {
    let mut used = HashSet::new();
    let mut collect = |field: String, input: &str| -> TemplateResult<()> {
        let site = Site { template: name, field };
        for placeholder in parse_placeholders(input, &site)? {
            used.insert(placeholder.name.to_string());
        }
        Ok(())
    };

    collect("cmd".to_string(), &template.cmd)?;
    if let Some(workdir) = &template.workdir {
        collect("workdir".to_string(), workdir)?;
    }
    for (field, entries) in [
        ("args", &template.args),
        ("from_env", &template.from_env),
        ("vars", &template.vars),
        ("env", &template.env),
    ] {
        for (i, entry) in entries.iter().enumerate() {
            collect(format!("{field}[{i}]"), entry)?;
        }
    }
    Ok(used)
}

/// Checks a template's own shape: a usable name and a command line.
pub fn validate_template(name: &str, template: &CommandTemplate) -> TemplateResult<()> {
    if !is_valid_name(name) {
        return Err(TemplateError::InvalidName {
            name: name.to_string(),
            reason: "expected a letter or '_' followed by letters, digits or '_'".to_string(),
        });
    }
    if name.starts_with("__") {
        return Err(TemplateError::InvalidName {
            name: name.to_string(),
            reason: "names starting with '__' are reserved".to_string(),
        });
    }
    if template.cmd.trim().is_empty() {
        return Err(TemplateError::MissingCmd {
            template: name.to_string(),
        });
    }
    used_params(name, template).map(|_| ())
}

/// Replaces the template-owned fields of `command` with the expanded template.
/// The command's own `workdir` wins over the template's; its `from_env` and
/// `vars` are appended to the template's.
pub fn apply_template(
    group: &str,
    command: &mut CommandSpec,
    name: &str,
    template: &CommandTemplate,
) -> TemplateResult<()> {
    let conflict = |field: &str| TemplateError::FieldConflict {
        group: group.to_string(),
        command: command.name.clone(),
        template: name.to_string(),
        field: field.to_string(),
    };
    if !command.cmd.is_empty() {
        return Err(conflict("cmd"));
    }
    if !command.args.is_empty() {
        return Err(conflict("args"));
    }
    if !command.env.is_empty() {
        return Err(conflict("env"));
    }

    let params = &command.params;
    if let Some(param) = params.keys().find(|p| !is_valid_name(p)) {
        return Err(TemplateError::InvalidParamName {
            template: name.to_string(),
            param: param.clone(),
        });
    }
    let used = used_params(name, template)?;
    for param in params.keys().filter(|p| !used.contains(*p)) {
        warn!(
            "Command '{}' of group '{}' passes parameter '{}' that template '{}' never uses",
            command.name, group, param, name
        );
    }

    let cmd_site = Site {
        template: name,
        field: "cmd".to_string(),
    };
    let cmd = expand_single(&template.cmd, params, &cmd_site)?.ok_or_else(|| TemplateError::EmptyExpansion {
        template: name.to_string(),
        field: "cmd".to_string(),
    })?;
    let args = expand_list(name, "args", &template.args, params)?;
    let from_env = expand_list(name, "from_env", &template.from_env, params)?;
    let vars = expand_assignments(name, "vars", &template.vars, params, false)?;
    let env = expand_assignments(name, "env", &template.env, params, true)?;
    ensure_unique_keys(name, &env)?;

    let workdir = match (&command.workdir, &template.workdir) {
        (Some(own), _) => Some(own.clone()),
        (None, Some(inherited)) => {
            let site = Site {
                template: name,
                field: "workdir".to_string(),
            };
            expand_single(inherited, params, &site)?
        }
        (None, None) => None,
    };

    command.cmd = cmd;
    command.args = args;
    command.env = env;
    command.workdir = workdir;
    command.from_env = from_env.into_iter().chain(command.from_env.drain(..)).collect();
    command.vars = vars.into_iter().chain(command.vars.drain(..)).collect();
    Ok(())
}

/// Validates every template and applies it to the commands that use it.
pub fn apply_templates(config: &mut ConfigSpec) -> TemplateResult<()> {
    let ConfigSpec {
        command_templates,
        groups,
        ..
    } = config;

    for (name, template) in command_templates.iter() {
        validate_template(name, template)?;
    }

    for group in groups.iter_mut() {
        for command in group.commands.iter_mut() {
            let Some(name) = command.template.clone() else {
                continue;
            };
            let template = command_templates
                .get(&name)
                .ok_or_else(|| TemplateError::UnknownTemplate {
                    group: group.name.clone(),
                    command: command.name.clone(),
                    template: name.clone(),
                })?;
            apply_template(&group.name, command, &name, template)?;
            debug!("Applied template '{}' to command '{}/{}'", name, group.name, command.name);
        }
    }
    Ok(())
}

// --- Reference Check ---

/// Checks that the `%{VAR}` references written in each template's `cmd`,
/// `args`, `env` values and `workdir` name either a global variable or one the
/// template itself declares in `vars` or `from_env`. Templates are shared
/// across groups, so anything else would depend on where they are used.
pub fn check_template_references(
    templates: &BTreeMap<String, CommandTemplate>,
    globals: &VariableSet,
) -> ResolveResult<()> {
    for (name, template) in templates {
        let scope = format!("template[{name}]");
        let own: HashSet<&str> = template
            .vars
            .iter()
            .chain(&template.from_env)
            .filter_map(|entry| entry.split_once('=').map(|(key, _)| key.trim()))
            .collect();

        let mut fields: Vec<(String, &str)> = vec![("cmd".to_string(), template.cmd.as_str())];
        if let Some(workdir) = &template.workdir {
            fields.push(("workdir".to_string(), workdir.as_str()));
        }
        fields.extend(template.args.iter().enumerate().map(|(i, a)| (format!("args[{i}]"), a.as_str())));
        fields.extend(template.env.iter().enumerate().map(|(i, e)| {
            let value = e.split_once('=').map_or(e.as_str(), |(_, value)| value);
            (format!("env[{i}]"), value)
        }));

        for (field, raw) in fields {
            let parsed = Template::parse(&unescape(raw), &scope, &field)?;
            if let Some(missing) = parsed
                .references()
                .find(|r| !globals.contains(r) && !own.contains(r))
            {
                return Err(ResolveError::UndefinedVariable {
                    scope: scope.clone(),
                    field,
                    name: missing.to_string(),
                });
            }
        }
    }
    Ok(())
}
