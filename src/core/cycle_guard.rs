// src/core/cycle_guard.rs

//! Tracks the chain of variables currently being defined.
//!
//! The guard is entered before a definition's references are resolved and left
//! once its value is built. A reference to a name still on the stack is a
//! cycle. Already-resolved definitions inherited from an outer scope are
//! checked through their provenance, so a command redefining a global that a
//! group variable was built from is caught as well.

use crate::core::errors::{ResolveError, ResolveResult};
use crate::core::variables::Definition;
use std::collections::HashSet;
use std::sync::Arc;

/// In-progress marker stack with a depth bound.
#[derive(Debug)]
pub struct CycleGuard {
    stack: Vec<String>,
    max_depth: usize,
    scope: String,
    field: String,
}

impl CycleGuard {
    /// Creates a guard for one scope/field pass.
    pub fn new(max_depth: usize, scope: &str, field: &str) -> Self {
        Self {
            stack: Vec::new(),
            max_depth,
            scope: scope.to_string(),
            field: field.to_string(),
        }
    }

    /// Marks `name` as in progress.
    ///
    /// Fails with `CircularReference` if `name` is already in progress and with
    /// `RecursionDepthExceeded` if the stack is already at the limit.
    pub fn enter(&mut self, name: &str) -> ResolveResult<()> {
        self.check(name)?;
        if self.stack.len() >= self.max_depth {
            return Err(self.depth_exceeded(name));
        }
        self.stack.push(name.to_string());
        Ok(())
    }

    /// Clears the innermost in-progress marker.
    pub fn exit(&mut self) {
        self.stack.pop();
    }

    /// Fails with `CircularReference` if `name` is in progress.
    pub fn check(&self, name: &str) -> ResolveResult<()> {
        match self.position(name) {
            Some(pos) => Err(self.circular(pos, std::iter::once(name.to_string()))),
            None => Ok(()),
        }
    }

    /// Walks the provenance of an already-resolved definition. If anything it
    /// was built from carries a name that is in progress, the new definition
    /// would close a loop through an outer scope.
    pub fn check_provenance(&self, def: &Arc<Definition>) -> ResolveResult<()> {
        if self.stack.is_empty() {
            return Ok(());
        }

        let mut visited: HashSet<*const Definition> = HashSet::new();
        let mut pending: Vec<(&Arc<Definition>, Vec<String>)> =
            vec![(def, vec![def.name().to_string()])];

        while let Some((current, path)) = pending.pop() {
            if !visited.insert(Arc::as_ptr(current)) {
                continue;
            }
            if let Some(pos) = self.position(current.name()) {
                return Err(self.circular(pos, path));
            }
            for parent in current.refs() {
                let mut next = path.clone();
                next.push(parent.name().to_string());
                pending.push((parent, next));
            }
        }
        Ok(())
    }

    /// Fails with `RecursionDepthExceeded` if a definition of `name` at
    /// `depth` would reach the limit.
    pub fn check_depth(&self, name: &str, depth: usize) -> ResolveResult<()> {
        if depth >= self.max_depth {
            return Err(self.depth_exceeded(name));
        }
        Ok(())
    }

    /// Whether `name` is currently being defined.
    pub fn is_active(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of definitions in progress.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stack.iter().position(|n| n == name)
    }

    fn circular(&self, pos: usize, tail: impl IntoIterator<Item = String>) -> ResolveError {
        let chain = self
            .stack
            .iter()
            .skip(pos)
            .cloned()
            .chain(tail)
            .collect();
        ResolveError::CircularReference {
            scope: self.scope.clone(),
            field: self.field.clone(),
            chain,
        }
    }

    fn depth_exceeded(&self, name: &str) -> ResolveError {
        ResolveError::RecursionDepthExceeded {
            scope: self.scope.clone(),
            field: self.field.clone(),
            name: name.to_string(),
            limit: self.max_depth,
        }
    }
}
