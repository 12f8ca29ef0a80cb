//! The formatting engine
//!
//! Walks a message's pattern against runtime arguments and an immutable
//! registry snapshot. Pure: same snapshot, same inputs, same output. Never
//! panics on user input; every failure is collected as a `FluentError` and
//! a fallback literal takes the value's place in the output.
//!
//! Fallback shapes, always brace-wrapped:
//!
//! | expression | fallback |
//! |---|---|
//! | variable | `{$name}` |
//! | message | `{name}` |
//! | term | `{-name}` |
//! | function | `{NAME(…)}` |
//! | select | `{{selector} -> …}` |
//! | anything else | `{???}` |

use crate::depth::{GlobalDepthGuard, LimitError, ResolutionContext};
use crate::error::{codes, Diagnostic, ErrorCategory, FluentError};
use crate::functions::FunctionRegistry;
use crate::plurals::{category_name, plural_category};
use crate::value::{FluentArgs, FluentValue};
use ftl_syntax::ast::{
    Expression, InlineExpression, Message, Pattern, PatternElement, SelectExpression, Term,
    Variant, VariantKey,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Unicode directional isolates wrapped around interpolations
pub const FSI: char = '\u{2068}';
pub const PDI: char = '\u{2069}';

/// Immutable view of a bundle's registries, valid for one format call
pub struct Snapshot<'a> {
    pub messages: &'a HashMap<String, Arc<Message>>,
    pub terms: &'a HashMap<String, Arc<Term>>,
    pub functions: &'a FunctionRegistry,
    pub locale: &'a str,
    pub use_isolating: bool,
    pub max_nesting_depth: usize,
    pub max_expansion_size: usize,
}

/// Result of one resolution: the formatted string plus collected errors
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutput {
    pub value: String,
    pub errors: Vec<FluentError>,
}

/// Resolve a message's value (or one of its attributes, last-wins on
/// duplicate names) against `args`.
pub fn resolve_message(
    env: &Snapshot<'_>,
    message: &Message,
    args: &FluentArgs,
    attribute: Option<&str>,
) -> ResolveOutput {
    // The global counter survives user functions that re-enter a bundle;
    // without it each reentry would start a fresh per-call depth budget.
    let _global = match GlobalDepthGuard::enter(env.max_nesting_depth.max(1)) {
        Ok(g) => g,
        Err(e) => {
            return ResolveOutput {
                value: format!("{{{}}}", message.id.name),
                errors: vec![limit_error(e)],
            };
        }
    };

    let mut scope = Scope::new(env, args);
    let mut out = String::new();

    match attribute {
        None => match &message.value {
            Some(pattern) => {
                let key = format!("msg:{}", message.id.name);
                let fallback = format!("{{{}}}", message.id.name);
                scope.pattern_guarded(&key, pattern, &fallback, &mut out);
            }
            None => {
                scope.errors.push(FluentError::with_diagnostic(
                    ErrorCategory::Reference,
                    format!("message `{}` has no value", message.id.name),
                    Diagnostic::new(codes::NO_VALUE),
                ));
                out.push_str(&format!("{{{}}}", message.id.name));
            }
        },
        Some(name) => match message.attribute(name) {
            Some(attr) => {
                let key = format!("msg:{}.{}", message.id.name, name);
                let fallback = format!("{{{}.{}}}", message.id.name, name);
                scope.pattern_guarded(&key, &attr.value, &fallback, &mut out);
            }
            None => {
                scope.errors.push(FluentError::with_diagnostic(
                    ErrorCategory::Reference,
                    format!("unknown attribute `{}.{}`", message.id.name, name),
                    Diagnostic::new(codes::UNKNOWN_ATTRIBUTE).argument(name),
                ));
                out.push_str(&format!("{{{}.{}}}", message.id.name, name));
            }
        },
    }

    ResolveOutput {
        value: out,
        errors: scope.errors,
    }
}

fn limit_error(e: LimitError) -> FluentError {
    let code = match e {
        LimitError::TooDeep { .. } => codes::TOO_DEEP,
        LimitError::ExpansionExceeded { .. } => codes::EXPANSION_LIMIT,
        LimitError::ReentryLimit { .. } => codes::REENTRY_LIMIT,
    };
    FluentError::with_diagnostic(
        ErrorCategory::Resolution,
        e.to_string(),
        Diagnostic::new(code),
    )
}

struct Scope<'a> {
    env: &'a Snapshot<'a>,
    args: &'a FluentArgs,
    /// Arguments of the parameterized term currently being resolved; while
    /// set, variable lookups see only these.
    local_args: Option<FluentArgs>,
    errors: Vec<FluentError>,
    ctx: ResolutionContext,
    path: Vec<String>,
    path_set: HashSet<String>,
    budget_exhausted: bool,
}

impl<'a> Scope<'a> {
    fn new(env: &'a Snapshot<'a>, args: &'a FluentArgs) -> Self {
        Scope {
            env,
            args,
            local_args: None,
            errors: Vec::new(),
            ctx: ResolutionContext::new(env.max_nesting_depth, env.max_expansion_size),
            path: Vec::new(),
            path_set: HashSet::new(),
            budget_exhausted: false,
        }
    }

    fn push_str(&mut self, out: &mut String, s: &str) {
        if self.budget_exhausted {
            return;
        }
        match self.ctx.grow(s.chars().count()) {
            Ok(()) => out.push_str(s),
            Err(e) => {
                self.budget_exhausted = true;
                self.errors.push(limit_error(e));
            }
        }
    }

    fn push_char(&mut self, out: &mut String, c: char) {
        if self.budget_exhausted {
            return;
        }
        match self.ctx.grow(1) {
            Ok(()) => out.push(c),
            Err(e) => {
                self.budget_exhausted = true;
                self.errors.push(limit_error(e));
            }
        }
    }

    /// Resolve `pattern` after registering `key` on the cycle path; a key
    /// already on the path is a cycle: one canonicalized error, fallback
    /// literal, no recursion.
    fn pattern_guarded(&mut self, key: &str, pattern: &Pattern, fallback: &str, out: &mut String) {
        if self.path_set.contains(key) {
            self.report_cycle(key);
            self.push_str(out, fallback);
            return;
        }
        self.path.push(key.to_string());
        self.path_set.insert(key.to_string());
        self.pattern(pattern, out);
        self.path.pop();
        self.path_set.remove(key);
    }

    fn report_cycle(&mut self, key: &str) {
        let start = self.path.iter().position(|k| k == key).unwrap_or(0);
        let cycle = &self.path[start..];
        // Rotate so the lexicographically least member leads; the same
        // cycle reports identically no matter where it was entered.
        let min_idx = cycle
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let rotated: Vec<&str> = cycle[min_idx..]
            .iter()
            .chain(cycle[..min_idx].iter())
            .map(|s| s.as_str())
            .collect();
        let path = rotated.join(" -> ");
        self.errors.push(FluentError::with_diagnostic(
            ErrorCategory::Resolution,
            format!("cyclic reference: {path}"),
            Diagnostic::new(codes::CYCLIC_REFERENCE).path(path.clone()),
        ));
    }

    fn pattern(&mut self, pattern: &Pattern, out: &mut String) {
        if self.budget_exhausted {
            return;
        }
        // Like the reference implementations, single-element patterns are
        // not isolated: the value replaces the pattern wholesale and there
        // is no surrounding text for bidi to bleed into.
        let isolate = self.env.use_isolating && pattern.elements.len() > 1;
        for element in &pattern.elements {
            if self.budget_exhausted {
                break;
            }
            match element {
                PatternElement::Text(t) => self.push_str(out, &t.value),
                PatternElement::Placeable(p) => {
                    if isolate {
                        self.push_char(out, FSI);
                    }
                    self.placeable(&p.expression, out);
                    if isolate {
                        self.push_char(out, PDI);
                    }
                }
            }
        }
    }

    fn placeable(&mut self, expr: &Expression, out: &mut String) {
        match self.ctx.depth.enter() {
            Ok(()) => {}
            Err(e) => {
                self.errors.push(limit_error(e));
                let fallback = fallback_for(expr);
                self.push_str(out, &fallback);
                return;
            }
        }
        match expr {
            Expression::Inline(inline) => self.inline(inline, out),
            Expression::Select(select) => self.select(select, out),
        }
        self.ctx.depth.exit();
    }

    fn current_args(&self) -> &FluentArgs {
        self.local_args.as_ref().unwrap_or(self.args)
    }

    fn inline(&mut self, expr: &InlineExpression, out: &mut String) {
        match expr {
            InlineExpression::StringLiteral(s) => {
                let text = s.unescape().unwrap_or_else(|_| s.raw.clone());
                self.push_str(out, &text);
            }
            InlineExpression::NumberLiteral(n) => {
                // The source text is already the canonical rendering.
                let raw = n.raw.clone();
                self.push_str(out, &raw);
            }
            InlineExpression::VariableReference { id, .. } => {
                match self.current_args().get(&id.name).cloned() {
                    Some(value) => self.write_value(&value, out),
                    None => {
                        self.errors.push(FluentError::with_diagnostic(
                            ErrorCategory::Reference,
                            format!("unknown variable `${}`", id.name),
                            Diagnostic::new(codes::UNKNOWN_VARIABLE).argument(&id.name),
                        ));
                        let fallback = format!("{{${}}}", id.name);
                        self.push_str(out, &fallback);
                    }
                }
            }
            InlineExpression::MessageReference { id, attribute, .. } => {
                self.message_reference(&id.name, attribute.as_ref().map(|a| a.name.as_str()), out);
            }
            InlineExpression::TermReference {
                id,
                attribute,
                arguments,
                ..
            } => {
                self.term_reference(
                    &id.name,
                    attribute.as_ref().map(|a| a.name.as_str()),
                    arguments.as_ref(),
                    out,
                );
            }
            InlineExpression::FunctionReference { id, arguments, .. } => {
                self.function_reference(&id.name, arguments, out);
            }
            InlineExpression::Placeable(p) => self.placeable(&p.expression, out),
        }
    }

    fn message_reference(&mut self, id: &str, attribute: Option<&str>, out: &mut String) {
        let reference = match attribute {
            Some(attr) => format!("{id}.{attr}"),
            None => id.to_string(),
        };
        let fallback = format!("{{{reference}}}");

        let Some(message) = self.env.messages.get(id).cloned() else {
            self.errors.push(FluentError::with_diagnostic(
                ErrorCategory::Reference,
                format!("unknown message `{id}`"),
                Diagnostic::new(codes::UNKNOWN_MESSAGE).hint(format!(
                    "no message `{id}` is registered in this bundle"
                )),
            ));
            self.push_str(out, &fallback);
            return;
        };

        let pattern: &Pattern = match attribute {
            Some(attr) => match message.attribute(attr) {
                Some(a) => &a.value,
                None => {
                    self.errors.push(FluentError::with_diagnostic(
                        ErrorCategory::Reference,
                        format!("unknown attribute `{reference}`"),
                        Diagnostic::new(codes::UNKNOWN_ATTRIBUTE).argument(attr),
                    ));
                    self.push_str(out, &fallback);
                    return;
                }
            },
            None => match &message.value {
                Some(v) => v,
                None => {
                    self.errors.push(FluentError::with_diagnostic(
                        ErrorCategory::Reference,
                        format!("message `{id}` has no value"),
                        Diagnostic::new(codes::NO_VALUE),
                    ));
                    self.push_str(out, &fallback);
                    return;
                }
            },
        };

        let key = format!("msg:{reference}");
        self.pattern_guarded(&key, pattern, &fallback, out);
    }

    fn term_reference(
        &mut self,
        id: &str,
        attribute: Option<&str>,
        arguments: Option<&ftl_syntax::ast::CallArguments>,
        out: &mut String,
    ) {
        let reference = match attribute {
            Some(attr) => format!("-{id}.{attr}"),
            None => format!("-{id}"),
        };
        let fallback = format!("{{{reference}}}");

        let Some(term) = self.env.terms.get(id).cloned() else {
            self.errors.push(FluentError::with_diagnostic(
                ErrorCategory::Reference,
                format!("unknown term `-{id}`"),
                Diagnostic::new(codes::UNKNOWN_TERM),
            ));
            self.push_str(out, &fallback);
            return;
        };

        let pattern: &Pattern = match attribute {
            Some(attr) => match term.attribute(attr) {
                Some(a) => &a.value,
                None => {
                    self.errors.push(FluentError::with_diagnostic(
                        ErrorCategory::Reference,
                        format!("unknown attribute `{reference}`"),
                        Diagnostic::new(codes::UNKNOWN_ATTRIBUTE).argument(attr),
                    ));
                    self.push_str(out, &fallback);
                    return;
                }
            },
            None => &term.value,
        };

        // A parameterized term sees only its call's named arguments.
        let locals: FluentArgs = match arguments {
            Some(args) => args
                .named
                .iter()
                .map(|n| (n.name.name.clone(), self.resolve_to_value(&n.value)))
                .collect(),
            None => FluentArgs::new(),
        };

        let key = format!("term:{reference}");
        let saved = self.local_args.replace(locals);
        self.pattern_guarded(&key, pattern, &fallback, out);
        self.local_args = saved;
    }

    fn function_reference(
        &mut self,
        name: &str,
        arguments: &ftl_syntax::ast::CallArguments,
        out: &mut String,
    ) {
        let fallback = format!("{{{name}(…)}}");

        let Some(entry) = self.env.functions.get(name).cloned() else {
            self.errors.push(FluentError::with_diagnostic(
                ErrorCategory::Reference,
                format!("unknown function `{name}`"),
                Diagnostic::new(codes::UNKNOWN_FUNCTION).function(name),
            ));
            self.push_str(out, &fallback);
            return;
        };

        let positional: Vec<FluentValue> = arguments
            .positional
            .iter()
            .map(|a| self.resolve_to_value(a))
            .collect();
        let ftl_named: BTreeMap<String, FluentValue> = arguments
            .named
            .iter()
            .map(|n| (n.name.name.clone(), self.resolve_to_value(&n.value)))
            .collect();
        let named = entry.translate_named(ftl_named);

        match entry.invoke(&positional, &named, self.env.locale) {
            Ok(value) => self.write_value(&value, out),
            Err(e) => {
                self.errors.push(FluentError::with_diagnostic(
                    ErrorCategory::Resolution,
                    format!("function `{name}` failed: {}", e.message),
                    Diagnostic::new(codes::FUNCTION_FAILED)
                        .function(name)
                        .hint(e.message.clone()),
                ));
                self.push_str(out, &fallback);
            }
        }
    }

    /// Evaluate an inline expression to a value for selection or call
    /// arguments. References resolve to their formatted string.
    fn resolve_to_value(&mut self, expr: &InlineExpression) -> FluentValue {
        match expr {
            InlineExpression::StringLiteral(s) => {
                FluentValue::Str(s.unescape().unwrap_or_else(|_| s.raw.clone()))
            }
            InlineExpression::NumberLiteral(n) => match n.value {
                Some(d) => FluentValue::Decimal(d),
                None => FluentValue::Float(n.as_f64()),
            },
            InlineExpression::VariableReference { id, .. } => {
                match self.current_args().get(&id.name).cloned() {
                    Some(v) => v,
                    None => {
                        self.errors.push(FluentError::with_diagnostic(
                            ErrorCategory::Reference,
                            format!("unknown variable `${}`", id.name),
                            Diagnostic::new(codes::UNKNOWN_VARIABLE).argument(&id.name),
                        ));
                        FluentValue::Null
                    }
                }
            }
            other => {
                // Message/term references and nested placeables resolve to
                // their formatted text.
                let mut buf = String::new();
                self.inline(other, &mut buf);
                FluentValue::Str(buf)
            }
        }
    }

    fn select(&mut self, select: &SelectExpression, out: &mut String) {
        let selector = self.resolve_to_value(&select.selector);
        let variant = self.choose_variant(&selector, &select.variants);
        match variant {
            Some(v) => self.pattern(&v.value, out),
            None => {
                // Unreachable for parser-produced trees (exactly one
                // default), defended for programmatic ones.
                self.errors.push(FluentError::with_diagnostic(
                    ErrorCategory::Resolution,
                    "select expression has no default variant".to_string(),
                    Diagnostic::new(codes::TYPE_MISMATCH),
                ));
                let fallback = fallback_for(&Expression::Select(select.clone()));
                self.push_str(out, &fallback);
            }
        }
    }

    fn choose_variant<'v>(
        &mut self,
        selector: &FluentValue,
        variants: &'v [Variant],
    ) -> Option<&'v Variant> {
        if let Some(form) = selector.plural_form() {
            // Numeric keys match by value first.
            let selector_decimal = decimal_of(selector);
            for variant in variants {
                if let VariantKey::Number(n) = &variant.key {
                    let matched = match (selector_decimal, n.value) {
                        (Some(a), Some(b)) => a == b,
                        _ => n.as_f64() == float_of(selector),
                    };
                    if matched {
                        return Some(variant);
                    }
                }
            }
            // Then CLDR plural category on the precision-preserving form.
            let category = category_name(plural_category(self.env.locale, &form));
            for variant in variants {
                if let VariantKey::Identifier { name, .. } = &variant.key {
                    if name == category {
                        return Some(variant);
                    }
                }
            }
        } else if let FluentValue::Str(s) = selector {
            for variant in variants {
                match &variant.key {
                    VariantKey::Identifier { name, .. } if name == s => return Some(variant),
                    // Numeric keys also match their exact source spelling.
                    VariantKey::Number(n) if n.raw == *s => return Some(variant),
                    _ => {}
                }
            }
        }
        variants.iter().find(|v| v.default)
    }

    fn write_value(&mut self, value: &FluentValue, out: &mut String) {
        match value {
            FluentValue::Map(_) | FluentValue::Null => {
                self.errors.push(FluentError::with_diagnostic(
                    ErrorCategory::Resolution,
                    format!("value of type `{}` cannot be interpolated", value.type_tag()),
                    Diagnostic::new(codes::TYPE_MISMATCH)
                        .types("a displayable value", value.type_tag()),
                ));
                self.push_str(out, "{???}");
            }
            other => {
                let text = other.as_display_string();
                self.push_str(out, &text);
            }
        }
    }
}

fn decimal_of(value: &FluentValue) -> Option<Decimal> {
    match value {
        FluentValue::Int(i) => Some(Decimal::from(*i)),
        FluentValue::Decimal(d) => Some(*d),
        FluentValue::Number(n) => Some(n.value),
        FluentValue::Float(f) => Decimal::from_f64(*f),
        _ => None,
    }
}

fn float_of(value: &FluentValue) -> f64 {
    match value {
        FluentValue::Int(i) => *i as f64,
        FluentValue::Float(f) => *f,
        FluentValue::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        FluentValue::Number(n) => n.value.to_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// The brace-wrapped literal standing in for a failed expression
fn fallback_for(expr: &Expression) -> String {
    match expr {
        Expression::Inline(inline) => inline_fallback(inline),
        Expression::Select(select) => {
            let inner = inline_fallback(&select.selector);
            format!("{{{inner} -> …}}")
        }
    }
}

fn inline_fallback(expr: &InlineExpression) -> String {
    match expr {
        InlineExpression::StringLiteral(s) => format!("{{\"{}\"}}", s.raw),
        InlineExpression::NumberLiteral(n) => format!("{{{}}}", n.raw),
        InlineExpression::VariableReference { id, .. } => format!("{{${}}}", id.name),
        InlineExpression::MessageReference { id, attribute, .. } => match attribute {
            Some(a) => format!("{{{}.{}}}", id.name, a.name),
            None => format!("{{{}}}", id.name),
        },
        InlineExpression::TermReference { id, attribute, .. } => match attribute {
            Some(a) => format!("{{-{}.{}}}", id.name, a.name),
            None => format!("{{-{}}}", id.name),
        },
        InlineExpression::FunctionReference { id, .. } => format!("{{{}(…)}}", id.name),
        InlineExpression::Placeable(_) => "{???}".to_string(),
    }
}
