// src/core/allowlist.rs

//! Decides which system environment variables a scope may import.

use crate::core::declarations::is_valid_name;
use crate::core::errors::{ResolveError, ResolveResult};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// How a group's permitted set is derived from the global one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritanceMode {
    /// The global set applies; the group set is ignored.
    Inherit,
    /// Only the group's own set applies; the global set is ignored.
    Explicit,
    /// Nothing may be imported.
    Reject,
}

impl InheritanceMode {
    /// Mode implied by a group's `env_allowlist` field: absent inherits, an
    /// empty list rejects everything, a non-empty list is explicit.
    pub fn from_declared(list: Option<&[String]>) -> Self {
        match list {
            None => Self::Inherit,
            Some([]) => Self::Reject,
            Some(_) => Self::Explicit,
        }
    }
}

impl fmt::Display for InheritanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inherit => "inherit",
            Self::Explicit => "explicit",
            Self::Reject => "reject",
        };
        f.write_str(label)
    }
}

/// The set of system variable names importable in a scope.
///
/// The default value permits nothing.
#[derive(Debug, Default)]
pub struct EffectiveAllowlist {
    names: HashSet<String>,
    listing: OnceLock<Vec<String>>,
}

impl EffectiveAllowlist {
    /// Computes the effective set for `mode`.
    pub fn resolve(mode: InheritanceMode, global: &HashSet<String>, group: &HashSet<String>) -> Self {
        let names = match mode {
            InheritanceMode::Inherit => global.clone(),
            InheritanceMode::Explicit => group.clone(),
            InheritanceMode::Reject => HashSet::new(),
        };
        Self::from_set(names)
    }

    /// Wraps an already computed set.
    pub fn from_set(names: HashSet<String>) -> Self {
        Self {
            names,
            listing: OnceLock::new(),
        }
    }

    /// O(1) membership test.
    pub fn is_allowed(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// The underlying set.
    pub fn as_set(&self) -> &HashSet<String> {
        &self.names
    }

    /// Number of permitted names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is permitted.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Sorted listing for diagnostics. Built on first request, then reused.
    pub fn sorted_names(&self) -> &[String] {
        self.listing.get_or_init(|| {
            let mut names: Vec<String> = self.names.iter().cloned().collect();
            names.sort_unstable();
            names
        })
    }
}

impl Clone for EffectiveAllowlist {
    fn clone(&self) -> Self {
        Self::from_set(self.names.clone())
    }
}

impl PartialEq for EffectiveAllowlist {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for EffectiveAllowlist {}

/// Validates a declared allowlist and turns it into a set.
pub fn parse_allowlist(entries: &[String], scope: &str) -> ResolveResult<HashSet<String>> {
    entries
        .iter()
        .map(|entry| {
            let name = entry.trim();
            if is_valid_name(name) {
                Ok(name.to_string())
            } else {
                Err(ResolveError::InvalidVariableName {
                    scope: scope.to_string(),
                    field: "env_allowlist".to_string(),
                    name: entry.clone(),
                })
            }
        })
        .collect()
}
