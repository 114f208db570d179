// src/core/errors.rs

//! Errors raised while resolving a configuration.

use thiserror::Error;

/// Every failure the resolution engine can report. Each variant names the scope
/// (`global`, `group[build]`, `command[build/compile]`) and the field being
/// processed so that the caller can print an actionable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A reference to a name no scope defines.
    #[error("{scope}.{field}: undefined variable '%{{{name}}}'")]
    UndefinedVariable {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
    },
    /// An entry not in `KEY=VALUE` form.
    #[error("{scope}.{field}: malformed declaration '{entry}': {reason}")]
    MalformedDeclaration {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// The raw entry.
        entry: String,
        /// Why the entry was rejected.
        reason: String,
    },
    /// A declared or referenced name that is not an identifier.
    #[error("{scope}.{field}: invalid variable name '{name}'")]
    InvalidVariableName {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
    },
    /// `%{` without a closing `}`.
    #[error("{scope}.{field}: unclosed variable reference in '{template}' (missing '}}')")]
    UnclosedReference {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Template name or text involved.
        template: String,
    },
    /// A backslash followed by anything but `%` or `\\`.
    #[error("{scope}.{field}: invalid escape sequence '\\{sequence}' (only '\\%' and '\\\\' are allowed)")]
    InvalidEscape {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// The escape sequence after the backslash.
        sequence: String,
    },
    /// The same name declared twice in one list.
    #[error("{scope}.{field}: '{name}' is defined more than once")]
    DuplicateDefinition {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
    },
    /// A user declaration with the runner prefix.
    #[error("{scope}.{field}: '{name}' uses the reserved prefix '{prefix}'")]
    ReservedName {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
        /// The reserved prefix.
        prefix: String,
    },
    /// An import the effective allowlist does not permit.
    #[error(
        "{scope}.{field}: system variable '{system_var}' (imported as '{name}') is not permitted by the environment allowlist"
    )]
    AllowlistViolation {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
        /// Name in the process environment.
        system_var: String,
    },
    /// An import of a variable absent from the process environment.
    #[error(
        "{scope}.{field}: system variable '{system_var}' (imported as '{name}') is not set in the process environment"
    )]
    SystemVariableMissing {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
        /// Name in the process environment.
        system_var: String,
    },
    /// A definition that depends on itself.
    #[error("{scope}.{field}: circular variable reference detected: {}", .chain.join(" -> "))]
    CircularReference {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Names along the cycle, first repeated last.
        chain: Vec<String>,
    },
    /// A reference chain at or past the depth limit.
    #[error(
        "{scope}.{field}: maximum reference depth ({limit}) exceeded while defining '{name}'"
    )]
    RecursionDepthExceeded {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// Field being processed.
        field: String,
        /// Offending name.
        name: String,
        /// The configured depth limit.
        limit: usize,
    },
    /// A `max_risk_level` outside low, medium and high.
    #[error("{scope}.max_risk_level: unknown risk level '{value}' (expected low, medium or high)")]
    InvalidRiskLevel {
        /// Scope label, such as `group[build]`.
        scope: String,
        /// The rejected value.
        value: String,
    },
}

/// Coarse classification of a [`ResolveError`], used by callers that only care
/// about the category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A `%{NAME}` reference to a name that is not visible.
    UndefinedVariable,
    /// Bad `KEY=VALUE` syntax, invalid identifier, bad placeholder or escape, unknown risk level.
    MalformedDeclaration,
    /// The same name declared twice in one scope.
    DuplicateDefinition,
    /// A user declaration using the runner's reserved prefix.
    ReservedName,
    /// A `from_env` import outside the effective allowlist.
    AllowlistViolation,
    /// A `from_env` import of a variable absent from the process environment.
    SystemVariableMissing,
    /// A definition that refers back to itself, directly or through other definitions.
    CircularReference,
    /// A reference chain at or beyond the configured depth limit.
    RecursionDepthExceeded,
}

impl ResolveError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedVariable { .. } => ErrorKind::UndefinedVariable,
            Self::MalformedDeclaration { .. }
            | Self::InvalidVariableName { .. }
            | Self::UnclosedReference { .. }
            | Self::InvalidEscape { .. }
            | Self::InvalidRiskLevel { .. } => ErrorKind::MalformedDeclaration,
            Self::DuplicateDefinition { .. } => ErrorKind::DuplicateDefinition,
            Self::ReservedName { .. } => ErrorKind::ReservedName,
            Self::AllowlistViolation { .. } => ErrorKind::AllowlistViolation,
            Self::SystemVariableMissing { .. } => ErrorKind::SystemVariableMissing,
            Self::CircularReference { .. } => ErrorKind::CircularReference,
            Self::RecursionDepthExceeded { .. } => ErrorKind::RecursionDepthExceeded,
        }
    }

    /// The scope label the error was raised in.
    pub fn scope(&self) -> &str {
        match self {
            Self::UndefinedVariable { scope, .. }
            | Self::MalformedDeclaration { scope, .. }
            | Self::InvalidVariableName { scope, .. }
            | Self::UnclosedReference { scope, .. }
            | Self::InvalidEscape { scope, .. }
            | Self::DuplicateDefinition { scope, .. }
            | Self::ReservedName { scope, .. }
            | Self::AllowlistViolation { scope, .. }
            | Self::SystemVariableMissing { scope, .. }
            | Self::CircularReference { scope, .. }
            | Self::RecursionDepthExceeded { scope, .. }
            | Self::InvalidRiskLevel { scope, .. } => scope,
        }
    }
}

/// Result alias used across the engine.
pub type ResolveResult<T> = Result<T, ResolveError>;
