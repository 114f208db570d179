// src/core/level_processor.rs

//! The three per-scope steps: import from the process environment, define
//! internal variables, define exported environment variables. Auxiliary
//! fields (command line, workdir, verified paths) are expanded with the same
//! processor once the variables of the scope are settled.

use crate::core::allowlist::EffectiveAllowlist;
use crate::core::cycle_guard::CycleGuard;
use crate::core::declarations::{Declaration, DeclarationKind, parse_declarations};
use crate::core::errors::{ResolveError, ResolveResult};
use crate::core::interpolator::{Template, expand_with};
use crate::core::variables::{Definition, VariableSet};
use crate::system::environment::Environment;
use log::trace;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Runs the level steps for one scope. Remembers which names the scope itself
/// has defined so a `vars` entry cannot silently redefine a `from_env` import.
pub(crate) struct LevelProcessor<'e> {
    scope: String,
    env: &'e dyn Environment,
    max_depth: usize,
    defined: HashSet<String>,
}

impl<'e> LevelProcessor<'e> {
    pub(crate) fn new(scope: impl Into<String>, env: &'e dyn Environment, max_depth: usize) -> Self {
        Self {
            scope: scope.into(),
            env,
            max_depth,
            defined: HashSet::new(),
        }
    }

    pub(crate) fn scope(&self) -> &str {
        &self.scope
    }

    /// Step 1: `internal_name=SYSTEM_VAR` imports. Values are stored verbatim.
    pub(crate) fn import_from_env(
        &mut self,
        entries: &[String],
        allowlist: &EffectiveAllowlist,
        vars: &mut VariableSet,
    ) -> ResolveResult<()> {
        let field = DeclarationKind::FromEnv.field();
        for decl in parse_declarations(entries, DeclarationKind::FromEnv, &self.scope)? {
            self.claim(&decl.key, field)?;

            if !allowlist.is_allowed(&decl.value) {
                return Err(ResolveError::AllowlistViolation {
                    scope: self.scope.clone(),
                    field: field.to_string(),
                    name: decl.key,
                    system_var: decl.value,
                });
            }

            let value = self.env.get(&decl.value).ok_or_else(|| {
                ResolveError::SystemVariableMissing {
                    scope: self.scope.clone(),
                    field: field.to_string(),
                    name: decl.key.clone(),
                    system_var: decl.value.clone(),
                }
            })?;

            trace!("{}: imported '{}' from ${}", self.scope, decl.key, decl.value);
            vars.insert(Definition::imported(&decl.key, value, &decl.value, &self.scope));
        }
        Ok(())
    }

    /// Step 2: `VAR=template` definitions.
    ///
    /// Entries of one scope may reference each other in any order. A reference
    /// to an entry not yet defined defines it first, under the cycle guard.
    pub(crate) fn define_vars(&mut self, entries: &[String], vars: &mut VariableSet) -> ResolveResult<()> {
        let field = DeclarationKind::Var.field();
        let decls = parse_declarations(entries, DeclarationKind::Var, &self.scope)?;
        for decl in &decls {
            self.claim(&decl.key, field)?;
        }

        let mut pass = VarsPass {
            scope: &self.scope,
            pending: HashMap::with_capacity(decls.len()),
            guard: CycleGuard::new(self.max_depth, &self.scope, field),
        };
        for decl in &decls {
            let template = Template::parse(&decl.value, &self.scope, field)?;
            pass.pending.insert(decl.key.clone(), template);
        }
        for Declaration { key, .. } in &decls {
            if pass.pending.contains_key(key) {
                pass.define(key, vars)?;
            }
        }
        Ok(())
    }

    /// Step 3: `KEY=template` exported environment entries. Values may
    /// reference any variable visible in the scope but not other `env` keys.
    pub(crate) fn define_env(&self, entries: &[String], vars: &VariableSet) -> ResolveResult<BTreeMap<String, String>> {
        let field = DeclarationKind::Env.field();
        parse_declarations(entries, DeclarationKind::Env, &self.scope)?
            .into_iter()
            .map(|decl| {
                let value = self.expand_field(field, &decl.value, vars)?;
                Ok((decl.key, value))
            })
            .collect()
    }

    /// Defines a runner-owned variable in this scope.
    pub(crate) fn define_automatic(&mut self, name: &str, value: impl Into<String>, vars: &mut VariableSet) {
        self.defined.insert(name.to_string());
        vars.insert(Definition::automatic(name, value, &self.scope));
    }

    /// Expands a single auxiliary field.
    pub(crate) fn expand_field(&self, field: &str, template: &str, vars: &VariableSet) -> ResolveResult<String> {
        expand_with(template, &self.scope, field, |name| vars.get(name))
    }

    /// Expands a list field, labelling errors with the entry index.
    pub(crate) fn expand_list(&self, field: &str, templates: &[String], vars: &VariableSet) -> ResolveResult<Vec<String>> {
        templates
            .iter()
            .enumerate()
            .map(|(i, template)| self.expand_field(&format!("{field}[{i}]"), template, vars))
            .collect()
    }

    fn claim(&mut self, name: &str, field: &str) -> ResolveResult<()> {
        if self.defined.insert(name.to_string()) {
            Ok(())
        } else {
            Err(ResolveError::DuplicateDefinition {
                scope: self.scope.clone(),
                field: field.to_string(),
                name: name.to_string(),
            })
        }
    }
}

/// State of one `vars` step: templates not yet defined plus the guard.
///
/// Definitions are built with an explicit stack of [`Frame`]s rather than by
/// recursion, so a chain as long as the depth limit never grows the call stack.
struct VarsPass<'p> {
    scope: &'p str,
    pending: HashMap<String, Template>,
    guard: CycleGuard,
}

/// A definition in progress: its template, the references still to visit and
/// the definitions collected so far.
struct Frame {
    name: String,
    template: Template,
    references: Vec<String>,
    next: usize,
    refs: Vec<Arc<Definition>>,
}

/// What to do after inspecting the top frame.
enum Step {
    Open(String),
    Collect(Arc<Definition>),
    Close,
}

impl VarsPass<'_> {
    fn define(&mut self, name: &str, vars: &mut VariableSet) -> ResolveResult<Arc<Definition>> {
        let Some(root) = self.open(name)? else {
            return self.visible(name, vars);
        };
        let mut frames = vec![root];

        while let Some(top) = frames.last_mut() {
            let step = match top.references.get(top.next) {
                Some(reference) => {
                    top.next += 1;
                    self.step_into(reference, vars)?
                }
                None => Step::Close,
            };

            match step {
                Step::Open(reference) => {
                    if let Some(frame) = self.open(&reference)? {
                        frames.push(frame);
                    }
                }
                Step::Collect(def) => {
                    if let Some(top) = frames.last_mut() {
                        top.refs.push(def);
                    }
                }
                Step::Close => {
                    let Some(frame) = frames.pop() else { break };
                    self.guard.exit();
                    let def = self.close(frame, vars)?;
                    match frames.last_mut() {
                        Some(parent) => parent.refs.push(def),
                        None => return Ok(def),
                    }
                }
            }
        }
        self.visible(name, vars)
    }

    /// Takes `name` off the pending list and marks it in progress. `None` if it
    /// is not pending in this scope.
    fn open(&mut self, name: &str) -> ResolveResult<Option<Frame>> {
        let Some(template) = self.pending.remove(name) else {
            return Ok(None);
        };
        self.guard.enter(name)?;

        let mut references: Vec<String> = Vec::new();
        for reference in template.references() {
            if !references.iter().any(|r| r == reference) {
                references.push(reference.to_string());
            }
        }
        Ok(Some(Frame {
            name: name.to_string(),
            template,
            references,
            next: 0,
            refs: Vec::new(),
        }))
    }

    fn step_into(&self, reference: &str, vars: &VariableSet) -> ResolveResult<Step> {
        self.guard.check(reference)?;
        if self.pending.contains_key(reference) {
            return Ok(Step::Open(reference.to_string()));
        }
        let def = self.visible(reference, vars)?;
        self.guard.check_provenance(&def)?;
        Ok(Step::Collect(def))
    }

    fn close(&self, frame: Frame, vars: &mut VariableSet) -> ResolveResult<Arc<Definition>> {
        let Frame {
            name, template, refs, ..
        } = frame;
        let value = template.render(|reference| {
            refs.iter()
                .find(|d| d.name() == reference)
                .map(|d| d.value())
                .ok_or_else(|| self.undefined(reference))
        })?;

        let def = Definition::declared(&name, value, self.scope, refs);
        self.guard.check_depth(&name, def.depth())?;
        trace!("{}: defined '{}' (depth {})", self.scope, name, def.depth());
        Ok(vars.insert(def))
    }

    fn visible(&self, name: &str, vars: &VariableSet) -> ResolveResult<Arc<Definition>> {
        vars.definition(name)
            .cloned()
            .ok_or_else(|| self.undefined(name))
    }

    fn undefined(&self, name: &str) -> ResolveError {
        ResolveError::UndefinedVariable {
            scope: self.scope.to_string(),
            field: DeclarationKind::Var.field().to_string(),
            name: name.to_string(),
        }
    }
}
