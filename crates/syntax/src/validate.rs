//! Stateless structural validation of parsed or programmatic ASTs
//!
//! The parser cannot produce most of these problems; validation exists for
//! trees built in code and for linting resources before registration.
//! Reference checks accept a set of already-known ids so bundles can
//! suppress cross-resource false positives.

use crate::ast::*;
use crate::introspect::{self, ReferenceKind};
use crate::parser::is_function_name;
use crate::serializer::is_valid_number;
use serde::Serialize;
use std::collections::BTreeSet;

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Stable code in the 5000 range, e.g. `E5001`
    pub code: String,
    pub message: String,
    pub severity: IssueSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
}

impl ValidationIssue {
    fn error(code: &str, message: String, span: Option<Span>) -> Self {
        ValidationIssue {
            code: code.to_string(),
            message,
            severity: IssueSeverity::Error,
            span: span.map(|s| (s.start, s.end)),
        }
    }

    fn warning(code: &str, message: String, span: Option<Span>) -> Self {
        ValidationIssue {
            code: code.to_string(),
            message,
            severity: IssueSeverity::Warning,
            span: span.map(|s| (s.start, s.end)),
        }
    }
}

/// Message and term ids known outside the resource under validation
#[derive(Debug, Clone, Default)]
pub struct KnownIds {
    pub messages: BTreeSet<String>,
    pub terms: BTreeSet<String>,
}

/// Validate a resource. `known` carries ids registered elsewhere (other
/// resources in the same bundle); references to them are not reported.
pub fn validate_resource(resource: &Resource, known: &KnownIds) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut local = KnownIds::default();
    for entry in &resource.body {
        match entry {
            Entry::Message(m) => {
                if !local.messages.insert(m.id.name.clone()) {
                    issues.push(ValidationIssue::warning(
                        "E5008",
                        format!("message `{}` is defined more than once; the last definition wins", m.id.name),
                        m.span,
                    ));
                }
            }
            Entry::Term(t) => {
                if !local.terms.insert(t.id.name.clone()) {
                    issues.push(ValidationIssue::warning(
                        "E5008",
                        format!("term `-{}` is defined more than once; the last definition wins", t.id.name),
                        t.span,
                    ));
                }
            }
            _ => {}
        }
    }

    for entry in &resource.body {
        match entry {
            Entry::Message(m) => {
                validate_message(m, &mut issues);
                check_references(introspect::message_references(m), known, &local, &mut issues);
            }
            Entry::Term(t) => {
                validate_term(t, &mut issues);
                check_references(introspect::term_references(t), known, &local, &mut issues);
            }
            _ => {}
        }
    }

    issues
}

/// Validate one message in isolation
pub fn validate_message(message: &Message, issues: &mut Vec<ValidationIssue>) {
    check_identifier(&message.id, issues);
    if message.value.is_none() && message.attributes.is_empty() {
        issues.push(ValidationIssue::error(
            "E5007",
            format!(
                "message `{}` must have a value or at least one attribute",
                message.id.name
            ),
            message.span,
        ));
    }
    if let Some(p) = &message.value {
        validate_pattern(p, issues);
    }
    for attr in &message.attributes {
        check_identifier(&attr.id, issues);
        validate_pattern(&attr.value, issues);
    }
}

/// Validate one term in isolation
pub fn validate_term(term: &Term, issues: &mut Vec<ValidationIssue>) {
    check_identifier(&term.id, issues);
    validate_pattern(&term.value, issues);
    for attr in &term.attributes {
        check_identifier(&attr.id, issues);
        validate_pattern(&attr.value, issues);
    }
}

fn check_identifier(id: &Identifier, issues: &mut Vec<ValidationIssue>) {
    if !is_valid_identifier(&id.name) {
        issues.push(ValidationIssue::error(
            "E5002",
            format!("invalid identifier `{}`", id.name),
            id.span,
        ));
    }
}

fn check_references(
    refs: Vec<introspect::ReferenceUse>,
    known: &KnownIds,
    local: &KnownIds,
    issues: &mut Vec<ValidationIssue>,
) {
    for r in refs {
        let (defined, code, label) = match r.kind {
            ReferenceKind::Message => (
                local.messages.contains(&r.id) || known.messages.contains(&r.id),
                "E5005",
                format!("`{}`", r.id),
            ),
            ReferenceKind::Term => (
                local.terms.contains(&r.id) || known.terms.contains(&r.id),
                "E5006",
                format!("`-{}`", r.id),
            ),
        };
        if !defined {
            issues.push(ValidationIssue::warning(
                code,
                format!("reference to undefined entry {label}"),
                None,
            ));
        }
    }
}

fn validate_pattern(pattern: &Pattern, issues: &mut Vec<ValidationIssue>) {
    for el in &pattern.elements {
        if let PatternElement::Placeable(p) = el {
            validate_expression(&p.expression, issues);
        }
    }
}

fn validate_expression(expr: &Expression, issues: &mut Vec<ValidationIssue>) {
    match expr {
        Expression::Select(select) => {
            let defaults = select.variants.iter().filter(|v| v.default).count();
            if defaults != 1 {
                issues.push(ValidationIssue::error(
                    "E5001",
                    format!(
                        "select expression must have exactly one default variant, found {defaults}"
                    ),
                    select.span,
                ));
            }
            validate_inline(&select.selector, issues);
            for variant in &select.variants {
                if let VariantKey::Number(n) = &variant.key {
                    if !is_valid_number(&n.raw) {
                        issues.push(ValidationIssue::error(
                            "E5002",
                            format!("invalid number literal `{}` in variant key", n.raw),
                            n.span,
                        ));
                    }
                }
                validate_pattern(&variant.value, issues);
            }
        }
        Expression::Inline(inline) => validate_inline(inline, issues),
    }
}

fn validate_inline(expr: &InlineExpression, issues: &mut Vec<ValidationIssue>) {
    match expr {
        InlineExpression::StringLiteral(_) => {}
        InlineExpression::NumberLiteral(n) => {
            if !is_valid_number(&n.raw) {
                issues.push(ValidationIssue::error(
                    "E5002",
                    format!("invalid number literal `{}`", n.raw),
                    n.span,
                ));
            }
        }
        InlineExpression::VariableReference { id, .. } => check_identifier(id, issues),
        InlineExpression::MessageReference { id, attribute, .. } => {
            check_identifier(id, issues);
            if let Some(a) = attribute {
                check_identifier(a, issues);
            }
        }
        InlineExpression::TermReference {
            id,
            attribute,
            arguments,
            ..
        } => {
            check_identifier(id, issues);
            if let Some(a) = attribute {
                check_identifier(a, issues);
            }
            if let Some(args) = arguments {
                validate_call_arguments(args, issues);
            }
        }
        InlineExpression::FunctionReference { id, arguments, .. } => {
            if !is_function_name(&id.name) {
                issues.push(ValidationIssue::error(
                    "E5002",
                    format!("invalid function name `{}`", id.name),
                    id.span,
                ));
            }
            validate_call_arguments(arguments, issues);
        }
        InlineExpression::Placeable(p) => validate_expression(&p.expression, issues),
    }
}

fn validate_call_arguments(args: &CallArguments, issues: &mut Vec<ValidationIssue>) {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for named in &args.named {
        check_identifier(&named.name, issues);
        if !seen.insert(&named.name.name) {
            issues.push(ValidationIssue::error(
                "E5003",
                format!("duplicate named argument `{}`", named.name.name),
                named.span,
            ));
        }
        if !matches!(
            named.value,
            InlineExpression::StringLiteral(_) | InlineExpression::NumberLiteral(_)
        ) {
            issues.push(ValidationIssue::error(
                "E5004",
                format!(
                    "named argument `{}` must be a string or number literal",
                    named.name.name
                ),
                named.span,
            ));
        }
    }
    for positional in &args.positional {
        validate_inline(positional, issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_clean_resource_has_no_issues() {
        let r = parse("-brand = B\nhello = { -brand } says hi to { $name }");
        assert!(validate_resource(&r, &KnownIds::default()).is_empty());
    }

    #[test]
    fn test_undefined_references_are_warnings() {
        let r = parse("m = { ghost } and { -phantom }");
        let issues = validate_resource(&r, &KnownIds::default());
        let codes: Vec<&str> = issues.iter().map(|i| i.code.as_str()).collect();
        assert!(codes.contains(&"E5005"));
        assert!(codes.contains(&"E5006"));
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Warning));
    }

    #[test]
    fn test_known_ids_suppress_undefined_warnings() {
        let r = parse("m = { ghost }");
        let mut known = KnownIds::default();
        known.messages.insert("ghost".to_string());
        assert!(validate_resource(&r, &known).is_empty());
    }

    #[test]
    fn test_duplicate_definition_warning() {
        let r = parse("m = one\nm = two");
        let issues = validate_resource(&r, &KnownIds::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "E5008");
    }

    #[test]
    fn test_programmatic_select_without_default() {
        let mut r = parse("s = { $n ->\n   *[other] x\n}");
        if let Entry::Message(m) = &mut r.body[0] {
            if let PatternElement::Placeable(p) = &mut m.value.as_mut().unwrap().elements[0] {
                if let Expression::Select(sel) = &mut p.expression {
                    sel.variants[0].default = false;
                }
            }
        }
        let issues = validate_resource(&r, &KnownIds::default());
        assert!(issues.iter().any(|i| i.code == "E5001"));
    }

    #[test]
    fn test_programmatic_non_literal_named_argument() {
        let mut r = parse(r#"m = { NUMBER($x, digits: 2) }"#);
        if let Entry::Message(m) = &mut r.body[0] {
            if let PatternElement::Placeable(p) = &mut m.value.as_mut().unwrap().elements[0] {
                if let Expression::Inline(InlineExpression::FunctionReference {
                    arguments, ..
                }) = &mut p.expression
                {
                    arguments.named[0].value = InlineExpression::VariableReference {
                        id: Identifier::new("y"),
                        span: None,
                    };
                }
            }
        }
        let issues = validate_resource(&r, &KnownIds::default());
        assert!(issues.iter().any(|i| i.code == "E5004"));
    }

    #[test]
    fn test_issue_serializes_to_json() {
        let r = parse("m = { ghost }");
        let issues = validate_resource(&r, &KnownIds::default());
        let json = serde_json::to_value(&issues).unwrap();
        assert_eq!(json[0]["code"], "E5005");
        assert_eq!(json[0]["severity"], "warning");
    }
}
