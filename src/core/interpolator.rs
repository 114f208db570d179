// src/core/interpolator.rs

//! # Interpolator
//!
//! The scalar expansion primitive. A template is plain text with `%{NAME}`
//! placeholders. `\%` produces a literal `%` and `\\` a literal backslash; any
//! other backslash sequence is rejected. A `%` that is not followed by `{` is
//! kept as-is.
//!
//! Expansion is single-pass: substituted values are never scanned again for
//! placeholders. Values placed in a lookup are expected to be fully expanded
//! already.

use crate::core::declarations::is_valid_name;
use crate::core::errors::{ResolveError, ResolveResult};
use std::collections::HashMap;

/// A single piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied to the output unchanged (escapes already applied).
    Literal(String),
    /// A `%{NAME}` placeholder.
    Reference(String),
}

/// A template split into literal text and variable references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Tokenizes `raw`. `scope` and `field` only label the error on failure.
    pub fn parse(raw: &str, scope: &str, field: &str) -> ResolveResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('%') => literal.push('%'),
                    Some('\\') => literal.push('\\'),
                    other => {
                        return Err(ResolveError::InvalidEscape {
                            scope: scope.to_string(),
                            field: field.to_string(),
                            sequence: other.map(String::from).unwrap_or_default(),
                        });
                    }
                },
                '%' if chars.peek() == Some(&'{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(ResolveError::UnclosedReference {
                            scope: scope.to_string(),
                            field: field.to_string(),
                            template: raw.to_string(),
                        });
                    }
                    if !is_valid_name(&name) {
                        return Err(ResolveError::InvalidVariableName {
                            scope: scope.to_string(),
                            field: field.to_string(),
                            name,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Reference(name));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// The parsed segments, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names referenced by the template, in order of appearance (repeats included).
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Returns `true` if the template contains no placeholder.
    pub fn is_literal(&self) -> bool {
        self.references().next().is_none()
    }

    /// Builds the output string, asking `lookup` for the value of each reference.
    /// The first lookup error aborts rendering.
    pub fn render<'v, F>(&self, mut lookup: F) -> ResolveResult<String>
    where
        F: FnMut(&str) -> ResolveResult<&'v str>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference(name) => out.push_str(lookup(name)?),
            }
        }
        Ok(out)
    }
}

/// Expands every `%{NAME}` in `template` with its value from `vars`.
///
/// Fails with `UndefinedVariable` when a name is absent, and with a
/// malformed-declaration error for bad placeholder or escape syntax.
pub fn expand(
    template: &str,
    vars: &HashMap<String, String>,
    scope: &str,
    field: &str,
) -> ResolveResult<String> {
    expand_with(template, scope, field, |name| vars.get(name).map(String::as_str))
}

/// Same as [`expand`], with the variable lookup supplied as a closure.
pub fn expand_with<'v, F>(template: &str, scope: &str, field: &str, lookup: F) -> ResolveResult<String>
where
    F: Fn(&str) -> Option<&'v str>,
{
    Template::parse(template, scope, field)?.render(|name| {
        lookup(name).ok_or_else(|| ResolveError::UndefinedVariable {
            scope: scope.to_string(),
            field: field.to_string(),
            name: name.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use std::cell::Cell;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // --- Tokenizer Tests ---
    #[test]
    fn test_parse_mixed_template() {
        let t = Template::parse("%{BIN}/tool --x=%{MODE}", "global", "cmd").unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Reference("BIN".to_string()),
                Segment::Literal("/tool --x=".to_string()),
                Segment::Reference("MODE".to_string()),
            ]
        );
        assert_eq!(t.references().collect::<Vec<_>>(), vec!["BIN", "MODE"]);
        assert!(!t.is_literal());
    }

    #[test]
    fn test_lone_percent_is_literal() {
        let t = Template::parse("100% done %x", "global", "cmd").unwrap();
        assert!(t.is_literal());
        assert_eq!(
            t.segments(),
            &[Segment::Literal("100% done %x".to_string())]
        );
    }

    #[test]
    fn test_unclosed_reference() {
        let err = Template::parse("%{BASE/bin", "global", "vars").unwrap_err();
        assert!(matches!(err, ResolveError::UnclosedReference { .. }));
        assert_eq!(err.kind(), ErrorKind::MalformedDeclaration);
    }

    #[test]
    fn test_invalid_placeholder_names() {
        for template in ["%{}", "%{VAR-WITH-DASH}", "%{1X}", "%{ A }"] {
            let err = Template::parse(template, "global", "vars").unwrap_err();
            assert!(
                matches!(err, ResolveError::InvalidVariableName { .. }),
                "template {template}"
            );
        }
    }

    #[test]
    fn test_invalid_escape_sequences() {
        let err = Template::parse(r"C:\temp", "global", "env").unwrap_err();
        assert!(matches!(err, ResolveError::InvalidEscape { ref sequence, .. } if sequence == "t"));

        let trailing = Template::parse("ends with \\", "global", "env").unwrap_err();
        assert!(matches!(trailing, ResolveError::InvalidEscape { .. }));
    }

    // --- Expansion Tests ---
    #[test]
    fn test_expand_substitutes_values() {
        let v = vars(&[("BASE", "/opt"), ("NAME", "tool")]);
        assert_eq!(
            expand("%{BASE}/bin/%{NAME}", &v, "global", "cmd").unwrap(),
            "/opt/bin/tool"
        );
    }

    #[test]
    fn test_expand_undefined_variable() {
        let err = expand("%{MISSING}", &HashMap::new(), "group[g]", "env").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UndefinedVariable { ref scope, ref field, ref name }
                if scope == "group[g]" && field == "env" && name == "MISSING"
        ));
    }

    #[test]
    fn test_expand_does_not_rescan_values() {
        let v = vars(&[("A", "%{B}"), ("B", "secret")]);
        assert_eq!(expand("%{A}", &v, "global", "cmd").unwrap(), "%{B}");
    }

    #[test]
    fn test_escapes_expand_without_lookup() {
        let calls = Cell::new(0);
        let out = expand_with(r"\%{HOME}\\\%", "global", "args[0]", |_| {
            calls.set(calls.get() + 1);
            None
        })
        .unwrap();
        assert_eq!(out, r"%{HOME}\%");
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_render_propagates_lookup_error() {
        let t = Template::parse("%{A}%{B}", "global", "vars").unwrap();
        let err = t
            .render(|name| {
                if name == "A" {
                    Ok("a")
                } else {
                    Err(ResolveError::UndefinedVariable {
                        scope: "global".to_string(),
                        field: "vars".to_string(),
                        name: name.to_string(),
                    })
                }
            })
            .unwrap_err();
        assert!(matches!(err, ResolveError::UndefinedVariable { ref name, .. } if name == "B"));
    }
}
