// src/core/declarations.rs

//! Parsing of the raw `KEY=VALUE` strings found in `from_env`, `vars` and `env`.
//!
//! Declarations are parsed exactly once, at the start of a scope, so the rest of
//! the engine works with [`Declaration`] records and never splits strings again.

use crate::constants::RESERVED_PREFIX;
use crate::core::errors::{ResolveError, ResolveResult};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

lazy_static! {
    static ref IDENTIFIER_RE: Option<Regex> = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok();
}

/// The three declaration lists a scope can carry, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    /// `internal_name=SYSTEM_VAR`: import a value from the process environment.
    FromEnv,
    /// `VAR=template`: define an internal variable.
    Var,
    /// `KEY=template`: define an environment variable exported to the child process.
    Env,
}

impl DeclarationKind {
    /// The configuration field this kind is read from.
    pub fn field(self) -> &'static str {
        match self {
            Self::FromEnv => "from_env",
            Self::Var => "vars",
            Self::Env => "env",
        }
    }
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// One parsed entry of a declaration list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// The name being defined.
    pub key: String,
    /// The raw right-hand side: a template for `vars`/`env`, a system variable name for `from_env`.
    pub value: String,
    /// Position of the entry in its list.
    pub index: usize,
}

/// Returns `true` if `name` is a valid variable identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_name(name: &str) -> bool {
    IDENTIFIER_RE.as_ref().is_some_and(|re| re.is_match(name))
}

/// Returns `true` if `name` starts with the prefix reserved for automatic variables.
/// The comparison ignores ASCII case.
pub fn is_reserved(name: &str) -> bool {
    name.get(..RESERVED_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(RESERVED_PREFIX))
}

/// Parses a declaration list, rejecting malformed entries, invalid or reserved
/// names and duplicate keys within the list.
pub fn parse_declarations(
    entries: &[String],
    kind: DeclarationKind,
    scope: &str,
) -> ResolveResult<Vec<Declaration>> {
    let field = kind.field();
    let mut seen = HashSet::with_capacity(entries.len());
    let mut parsed = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let malformed = |reason: &str| ResolveError::MalformedDeclaration {
            scope: scope.to_string(),
            field: field.to_string(),
            entry: entry.clone(),
            reason: reason.to_string(),
        };

        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| malformed("expected KEY=VALUE"))?;
        let key = key.trim();

        if key.is_empty() {
            return Err(malformed("empty name"));
        }
        if !is_valid_name(key) {
            return Err(ResolveError::InvalidVariableName {
                scope: scope.to_string(),
                field: field.to_string(),
                name: key.to_string(),
            });
        }
        if is_reserved(key) {
            return Err(ResolveError::ReservedName {
                scope: scope.to_string(),
                field: field.to_string(),
                name: key.to_string(),
                prefix: RESERVED_PREFIX.to_string(),
            });
        }

        let value = if kind == DeclarationKind::FromEnv {
            let system_var = value.trim();
            if !is_valid_name(system_var) {
                return Err(malformed("invalid system variable name"));
            }
            system_var.to_string()
        } else {
            value.to_string()
        };

        if !seen.insert(key.to_string()) {
            return Err(ResolveError::DuplicateDefinition {
                scope: scope.to_string(),
                field: field.to_string(),
                name: key.to_string(),
            });
        }

        parsed.push(Declaration {
            key: key.to_string(),
            value,
            index,
        });
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // --- Identifier Tests ---
    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("PATH"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("a1_b2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name("VAR-WITH-DASH"));
        assert!(!is_valid_name("has space"));
    }

    #[test]
    fn test_reserved_prefix_ignores_case() {
        assert!(is_reserved("__runner_pid"));
        assert!(is_reserved("__RUNNER_custom"));
        assert!(!is_reserved("__other"));
        assert!(!is_reserved("runner_pid"));
    }

    // --- Parsing Tests ---
    #[test]
    fn test_parse_vars_keeps_value_verbatim() {
        let decls =
            parse_declarations(&strings(&["A=1", "B=%{A}=x", "C="]), DeclarationKind::Var, "global").unwrap();
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[1].key, "B");
        assert_eq!(decls[1].value, "%{A}=x");
        assert_eq!(decls[2].value, "");
        assert_eq!(decls[2].index, 2);
    }

    #[test]
    fn test_parse_from_env() {
        let decls =
            parse_declarations(&strings(&["home=HOME"]), DeclarationKind::FromEnv, "global").unwrap();
        assert_eq!(decls[0].key, "home");
        assert_eq!(decls[0].value, "HOME");
    }

    #[test]
    fn test_missing_equals_is_malformed() {
        let err = parse_declarations(&strings(&["no_equals"]), DeclarationKind::Var, "global").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeclaration);
    }

    #[test]
    fn test_empty_name_is_malformed() {
        let err = parse_declarations(&strings(&["=SYS"]), DeclarationKind::FromEnv, "global").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedDeclaration { .. }));
    }

    #[test]
    fn test_invalid_system_variable_name() {
        for entry in ["var=SYS=VAR", "var=", "var=1ABC"] {
            let err =
                parse_declarations(&strings(&[entry]), DeclarationKind::FromEnv, "global").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedDeclaration, "entry {entry}");
        }
    }

    #[test]
    fn test_invalid_key_name() {
        let err =
            parse_declarations(&strings(&["MY-VAR=1"]), DeclarationKind::Env, "group[g]").unwrap_err();
        assert!(matches!(err, ResolveError::InvalidVariableName { ref name, .. } if name == "MY-VAR"));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let err =
            parse_declarations(&strings(&["__runner_x=1"]), DeclarationKind::Var, "global").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReservedName);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err =
            parse_declarations(&strings(&["A=1", "A=2"]), DeclarationKind::Var, "global").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::DuplicateDefinition { ref field, ref name, .. } if field == "vars" && name == "A"
        ));
    }
}
