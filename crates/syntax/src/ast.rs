//! Abstract Syntax Tree for FTL resources
//!
//! All nodes are plain immutable value types. The parser produces them, the
//! bundle owns them after registration, and nothing mutates them afterwards.
//! Spans are half-open `[start, end)` ranges of *code points* (not bytes),
//! so tooling columns line up with what translators see in an editor.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Source location of a node, in code-point offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Start offset (inclusive)
    pub start: usize,
    /// End offset (exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "Span: start ({start}) must be <= end ({end})");
        Span { start, end }
    }

    /// Number of code points covered
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A parsed FTL file: an ordered sequence of entries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    pub body: Vec<Entry>,
}

impl Resource {
    pub fn new() -> Self {
        Resource { body: Vec::new() }
    }

    /// Iterate over the messages in this resource
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.body.iter().filter_map(|e| match e {
            Entry::Message(m) => Some(m),
            _ => None,
        })
    }

    /// Iterate over the terms in this resource
    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.body.iter().filter_map(|e| match e {
            Entry::Term(t) => Some(t),
            _ => None,
        })
    }

    /// Iterate over recovered junk slices
    pub fn junk(&self) -> impl Iterator<Item = &Junk> {
        self.body.iter().filter_map(|e| match e {
            Entry::Junk(j) => Some(j),
            _ => None,
        })
    }

    /// Copy of this resource with every span cleared.
    ///
    /// Round-trip comparisons (`parse(serialize(r)) == r`) are defined up to
    /// span values; this produces the canonical spanless form both sides can
    /// be compared in.
    pub fn strip_spans(&self) -> Resource {
        let mut r = self.clone();
        for entry in &mut r.body {
            strip::entry(entry);
        }
        r
    }
}

/// A top-level entry in a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Message(Message),
    Term(Term),
    Comment(Comment),
    Junk(Junk),
}

/// A named identifier: `[a-zA-Z][a-zA-Z0-9_-]*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub span: Option<Span>,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Identifier {
            name: name.into(),
            span: None,
        }
    }
}

/// Check an identifier against the FTL grammar
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A public entry addressable by plain id.
///
/// Invariant: at least one of `value` or `attributes` is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Identifier,
    pub value: Option<Pattern>,
    pub attributes: Vec<Attribute>,
    pub comment: Option<Comment>,
    pub span: Option<Span>,
}

impl Message {
    /// Last attribute with the given name, if any.
    ///
    /// Duplicate attribute names resolve last-wins at format time; existence
    /// checks elsewhere treat the attribute list as a union.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|a| a.id.name == name)
    }
}

/// A private entry, addressable only through `-id` syntax.
///
/// Unlike messages, terms always carry a value pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub id: Identifier,
    pub value: Pattern,
    pub attributes: Vec<Attribute>,
    pub comment: Option<Comment>,
    pub span: Option<Span>,
}

impl Term {
    /// Last attribute with the given name, if any
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().rev().find(|a| a.id.name == name)
    }
}

/// A named secondary pattern attached to a message or term
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub id: Identifier,
    pub value: Pattern,
    pub span: Option<Span>,
}

/// Ordered interleaving of literal text and placeables
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pattern {
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    Text(TextElement),
    Placeable(Placeable),
}

/// Literal text between placeables
#[derive(Debug, Clone, PartialEq)]
pub struct TextElement {
    pub value: String,
    pub span: Option<Span>,
}

/// A `{ … }`-delimited expression embedded in a pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Placeable {
    pub expression: Expression,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Select(SelectExpression),
    Inline(InlineExpression),
}

/// Expressions legal inside a placeable or as call arguments
#[derive(Debug, Clone, PartialEq)]
pub enum InlineExpression {
    StringLiteral(StringLiteral),
    NumberLiteral(NumberLiteral),
    VariableReference {
        id: Identifier,
        span: Option<Span>,
    },
    MessageReference {
        id: Identifier,
        attribute: Option<Identifier>,
        span: Option<Span>,
    },
    TermReference {
        id: Identifier,
        attribute: Option<Identifier>,
        arguments: Option<CallArguments>,
        span: Option<Span>,
    },
    FunctionReference {
        id: Identifier,
        arguments: CallArguments,
        span: Option<Span>,
    },
    /// A nested placeable: `{ { … } }`
    Placeable(Box<Placeable>),
}

/// A quoted string, stored in escaped source form.
///
/// `raw` is what appeared between the quotes and round-trips through the
/// serializer unchanged; `unescape` produces the runtime value.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub raw: String,
    pub span: Option<Span>,
}

impl StringLiteral {
    pub fn new(raw: impl Into<String>) -> Self {
        StringLiteral {
            raw: raw.into(),
            span: None,
        }
    }

    /// Resolve escape sequences to the runtime string value
    pub fn unescape(&self) -> Result<String, EscapeError> {
        unescape(&self.raw)
    }
}

/// Invalid escape sequence inside a string literal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid escape sequence `{sequence}` at offset {offset}")]
pub struct EscapeError {
    pub sequence: String,
    pub offset: usize,
}

/// Resolve FTL string-literal escapes: `\"`, `\\`, `\uXXXX`, `\UXXXXXX`
pub fn unescape(raw: &str) -> Result<String, EscapeError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let err = |len: usize| EscapeError {
            sequence: chars[i..(i + len).min(chars.len())].iter().collect(),
            offset: i,
        };
        match chars.get(i + 1) {
            Some('\\') => {
                out.push('\\');
                i += 2;
            }
            Some('"') => {
                out.push('"');
                i += 2;
            }
            Some(u @ ('u' | 'U')) => {
                let digits = if *u == 'u' { 4 } else { 6 };
                if i + 2 + digits > chars.len() {
                    return Err(err(chars.len() - i));
                }
                let hex: String = chars[i + 2..i + 2 + digits].iter().collect();
                let value = u32::from_str_radix(&hex, 16).map_err(|_| err(2 + digits))?;
                match char::from_u32(value) {
                    // Surrogate code points are replaced, matching the
                    // reference serialization of unpaired surrogates.
                    Some(ch) => out.push(ch),
                    None => out.push('\u{FFFD}'),
                }
                i += 2 + digits;
            }
            _ => return Err(err(2)),
        }
    }
    Ok(out)
}

/// A number literal carrying both its parsed value and its source text.
///
/// The source text round-trips through parse→serialize exactly; the decimal
/// value preserves scale (`1.00` is scale 2), which later drives the CLDR
/// `v` operand during plural selection.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    /// Original source text, e.g. `-0.50`
    pub raw: String,
    /// Parsed value; `None` when the literal exceeds the decimal range
    pub value: Option<Decimal>,
    pub span: Option<Span>,
}

impl NumberLiteral {
    /// Build from source text, parsing the decimal value when it fits
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let value = Decimal::from_str(&raw).ok();
        NumberLiteral {
            raw,
            value,
            span: None,
        }
    }

    /// Count of visible fraction digits in the source text (the CLDR `v`
    /// operand): `1` -> 0, `1.0` -> 1, `1.00` -> 2
    pub fn precision(&self) -> u32 {
        match self.raw.find('.') {
            Some(dot) => (self.raw.len() - dot - 1) as u32,
            None => 0,
        }
    }

    /// Approximate float value, used only when the decimal range overflows
    pub fn as_f64(&self) -> f64 {
        f64::from_str(&self.raw).unwrap_or(f64::NAN)
    }
}

/// Variant arm of a select expression
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub key: VariantKey,
    pub value: Pattern,
    /// Marked with `*` in source; exactly one variant per select carries it
    pub default: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariantKey {
    Identifier { name: String, span: Option<Span> },
    Number(NumberLiteral),
}

/// Branching on a selector value.
///
/// Invariant: `variants` is non-empty and exactly one has `default == true`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpression {
    pub selector: Box<InlineExpression>,
    pub variants: Vec<Variant>,
    pub span: Option<Span>,
}

impl SelectExpression {
    /// The `*`-marked variant
    pub fn default_variant(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.default)
    }
}

/// Arguments to a function call or parameterized term reference.
///
/// Named-argument values are restricted by the grammar to string and number
/// literals; programmatic ASTs violating that are rejected by validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArguments {
    pub positional: Vec<InlineExpression>,
    pub named: Vec<NamedArgument>,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedArgument {
    pub name: Identifier,
    pub value: InlineExpression,
    pub span: Option<Span>,
}

/// Comment kind, by marker depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    /// `#` - attaches to the following message or term
    Comment,
    /// `##` - group header, standalone
    Group,
    /// `###` - resource header, standalone
    Resource,
}

impl CommentKind {
    /// Source marker for this kind
    pub fn marker(&self) -> &'static str {
        match self {
            CommentKind::Comment => "#",
            CommentKind::Group => "##",
            CommentKind::Resource => "###",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub content: String,
    pub kind: CommentKind,
    pub span: Option<Span>,
}

/// An unparseable slice kept in the tree so parsing can continue
#[derive(Debug, Clone, PartialEq)]
pub struct Junk {
    /// Raw source text of the recovered region
    pub content: String,
    pub annotations: Vec<Annotation>,
    pub span: Option<Span>,
}

/// Machine-readable note on a junk entry
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Stable code, e.g. `E3001`
    pub code: String,
    pub message: String,
    pub span: Option<Span>,
}

mod strip {
    //! Span-clearing walkers backing [`Resource::strip_spans`]

    use super::*;

    pub fn entry(e: &mut Entry) {
        match e {
            Entry::Message(m) => message(m),
            Entry::Term(t) => term(t),
            Entry::Comment(c) => c.span = None,
            Entry::Junk(j) => {
                j.span = None;
                for a in &mut j.annotations {
                    a.span = None;
                }
            }
        }
    }

    fn message(m: &mut Message) {
        m.span = None;
        m.id.span = None;
        if let Some(p) = &mut m.value {
            pattern(p);
        }
        for a in &mut m.attributes {
            attribute(a);
        }
        if let Some(c) = &mut m.comment {
            c.span = None;
        }
    }

    fn term(t: &mut Term) {
        t.span = None;
        t.id.span = None;
        pattern(&mut t.value);
        for a in &mut t.attributes {
            attribute(a);
        }
        if let Some(c) = &mut t.comment {
            c.span = None;
        }
    }

    fn attribute(a: &mut Attribute) {
        a.span = None;
        a.id.span = None;
        pattern(&mut a.value);
    }

    fn pattern(p: &mut Pattern) {
        for el in &mut p.elements {
            match el {
                PatternElement::Text(t) => t.span = None,
                PatternElement::Placeable(pl) => placeable(pl),
            }
        }
    }

    fn placeable(pl: &mut Placeable) {
        pl.span = None;
        expression(&mut pl.expression);
    }

    fn expression(e: &mut Expression) {
        match e {
            Expression::Select(s) => {
                s.span = None;
                inline(&mut s.selector);
                for v in &mut s.variants {
                    v.span = None;
                    match &mut v.key {
                        VariantKey::Identifier { span, .. } => *span = None,
                        VariantKey::Number(n) => n.span = None,
                    }
                    pattern(&mut v.value);
                }
            }
            Expression::Inline(i) => inline(i),
        }
    }

    fn inline(e: &mut InlineExpression) {
        match e {
            InlineExpression::StringLiteral(s) => s.span = None,
            InlineExpression::NumberLiteral(n) => n.span = None,
            InlineExpression::VariableReference { id, span } => {
                id.span = None;
                *span = None;
            }
            InlineExpression::MessageReference {
                id,
                attribute,
                span,
            } => {
                id.span = None;
                if let Some(a) = attribute {
                    a.span = None;
                }
                *span = None;
            }
            InlineExpression::TermReference {
                id,
                attribute,
                arguments,
                span,
            } => {
                id.span = None;
                if let Some(a) = attribute {
                    a.span = None;
                }
                if let Some(args) = arguments {
                    call_arguments(args);
                }
                *span = None;
            }
            InlineExpression::FunctionReference {
                id,
                arguments,
                span,
            } => {
                id.span = None;
                call_arguments(arguments);
                *span = None;
            }
            InlineExpression::Placeable(p) => placeable(p),
        }
    }

    fn call_arguments(args: &mut CallArguments) {
        args.span = None;
        for p in &mut args.positional {
            inline(p);
        }
        for n in &mut args.named {
            n.span = None;
            n.name.span = None;
            inline(&mut n.value);
        }
    }
}
