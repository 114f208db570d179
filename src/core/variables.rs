// src/core/variables.rs

//! Resolved variable definitions and the per-scope set that holds them.
//!
//! Every [`Definition`] keeps shared handles to the definitions its value was
//! built from. Those handles form an acyclic provenance graph spanning all
//! scopes, which is what the cycle guard walks to catch cycles that cross a
//! scope boundary.

use std::collections::HashMap;
use std::sync::Arc;

/// Where a definition's value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Defined by the runner itself (`__runner_*`).
    Automatic,
    /// Imported from the process environment through `from_env`.
    Imported {
        /// The system variable that supplied the value.
        system_var: String,
    },
    /// Defined by a `vars` entry.
    Declared,
}

/// A fully expanded variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    name: String,
    value: String,
    scope: String,
    origin: Origin,
    refs: Vec<Arc<Definition>>,
    depth: usize,
}

impl Definition {
    /// A runner-defined variable.
    pub fn automatic(name: &str, value: impl Into<String>, scope: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            scope: scope.to_string(),
            origin: Origin::Automatic,
            refs: Vec::new(),
            depth: 1,
        }
    }

    /// A value imported verbatim from the system variable `system_var`.
    pub fn imported(name: &str, value: impl Into<String>, system_var: &str, scope: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            scope: scope.to_string(),
            origin: Origin::Imported {
                system_var: system_var.to_string(),
            },
            refs: Vec::new(),
            depth: 1,
        }
    }

    /// A `vars` definition built from `refs`. Its depth is one more than the
    /// deepest definition it references.
    pub fn declared(
        name: &str,
        value: impl Into<String>,
        scope: &str,
        refs: Vec<Arc<Definition>>,
    ) -> Self {
        let depth = 1 + refs.iter().map(|d| d.depth).max().unwrap_or(0);
        Self {
            name: name.to_string(),
            value: value.into(),
            scope: scope.to_string(),
            origin: Origin::Declared,
            refs,
            depth,
        }
    }

    /// The variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The expanded value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Label of the scope that defined this variable.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// How the value was obtained.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Definitions referenced by this one's template.
    pub fn refs(&self) -> &[Arc<Definition>] {
        &self.refs
    }

    /// Length of the longest reference chain ending at this definition.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// The variables visible in a scope. Seeding a child scope clones the map of
/// shared handles; definitions themselves are never copied.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    entries: HashMap<String, Arc<Definition>>,
}

impl VariableSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of `name`, if visible.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|d| d.value())
    }

    /// The full definition of `name`, if visible.
    pub fn definition(&self, name: &str) -> Option<&Arc<Definition>> {
        self.entries.get(name)
    }

    /// Whether `name` is visible.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of visible variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no variable is visible.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visible names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Visible definitions, sorted by name.
    pub fn definitions(&self) -> Vec<&Arc<Definition>> {
        let mut defs: Vec<&Arc<Definition>> = self.entries.values().collect();
        defs.sort_unstable_by(|a, b| a.name().cmp(b.name()));
        defs
    }

    /// A plain name to value copy, for callers of the expansion primitive.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(k, d)| (k.clone(), d.value().to_string()))
            .collect()
    }

    /// Adds `def`, shadowing any inherited definition with the same name.
    /// Returns the shared handle now stored under that name.
    pub fn insert(&mut self, def: Definition) -> Arc<Definition> {
        let def = Arc::new(def);
        self.entries.insert(def.name().to_string(), Arc::clone(&def));
        def
    }
}
