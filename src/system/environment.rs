// src/system/environment.rs

//! Process environment providers.
//!
//! The engine never calls `std::env` directly. It reads system variables
//! through [`Environment`], which is a frozen snapshot for the whole
//! resolution pass and can be replaced by a fixed map in tests.

use std::collections::HashMap;

/// Read-only lookup of system environment variables.
pub trait Environment: Send + Sync {
    /// The value of `name`, or `None` if it is not set.
    fn get(&self, name: &str) -> Option<&str>;
}

/// Snapshot of the real process environment, taken once.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment {
    vars: HashMap<String, String>,
}

impl ProcessEnvironment {
    /// Captures the current process environment. Variables whose name or value
    /// is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        log::debug!("Captured {} process environment variables", vars.len());
        Self { vars }
    }

    /// Number of captured variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Environment for ProcessEnvironment {
    fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// A fixed environment, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    /// An empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a variable, builder style.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_environment_lookup() {
        let env = MapEnvironment::new().with("PATH", "/usr/bin").with("HOME", "/home/u");
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.get("SHELL"), None);
    }

    #[test]
    fn test_map_environment_from_pairs() {
        let env: MapEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.get("B"), Some("2"));
    }

    #[test]
    fn test_process_snapshot_matches_std_env() {
        let env = ProcessEnvironment::capture();
        for (key, value) in std::env::vars() {
            assert_eq!(env.get(&key), Some(value.as_str()));
        }
    }
}
