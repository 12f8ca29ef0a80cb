//! Serializer: AST back to FTL source text
//!
//! The serializer is the inverse of the parser on well-formed trees:
//! `parse(serialize(r))` equals `r` up to span values. Validation runs by
//! default and rejects trees the parser could never have produced (they
//! would not round-trip); a depth guard aborts on pathological nesting.

use crate::ast::*;

/// Tunable serializer behavior
#[derive(Debug, Clone)]
pub struct SerializerOptions {
    /// Validate structural invariants while writing
    pub validate: bool,
    /// Maximum AST nesting depth before aborting
    pub max_depth: usize,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        SerializerOptions {
            validate: true,
            max_depth: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializerError {
    #[error("select expression must have exactly one default variant, found {count}")]
    DefaultVariantCount { count: usize },

    #[error("invalid identifier `{name}`")]
    InvalidIdentifier { name: String },

    #[error("invalid function name `{name}`")]
    InvalidFunctionName { name: String },

    #[error("invalid number literal `{raw}`")]
    InvalidNumberLiteral { raw: String },

    #[error("duplicate named argument `{name}`")]
    DuplicateNamedArgument { name: String },

    #[error("named argument `{name}` must be a string or number literal")]
    NamedArgumentValue { name: String },

    #[error("AST nesting exceeds the serializer depth limit of {max}")]
    TooDeep { max: usize },
}

/// Serialize with default options (validation on)
pub fn serialize(resource: &Resource) -> Result<String, SerializerError> {
    Serializer::new().serialize(resource)
}

#[derive(Debug, Clone, Default)]
pub struct Serializer {
    options: SerializerOptions,
}

impl Serializer {
    pub fn new() -> Self {
        Serializer::default()
    }

    pub fn with_options(options: SerializerOptions) -> Self {
        Serializer { options }
    }

    pub fn serialize(&self, resource: &Resource) -> Result<String, SerializerError> {
        let mut out = String::new();
        for (idx, entry) in resource.body.iter().enumerate() {
            match entry {
                Entry::Message(m) => self.write_message(&mut out, m)?,
                Entry::Term(t) => self.write_term(&mut out, t)?,
                Entry::Comment(c) => {
                    write_comment(&mut out, c);
                    // A blank line keeps a standalone comment from attaching
                    // to the next entry on reparse.
                    if matches!(
                        resource.body.get(idx + 1),
                        Some(Entry::Message(_)) | Some(Entry::Term(_))
                    ) {
                        out.push('\n');
                    }
                }
                Entry::Junk(j) => {
                    out.push_str(&j.content);
                    if !j.content.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
        }
        Ok(out)
    }

    fn check_identifier(&self, id: &Identifier) -> Result<(), SerializerError> {
        if self.options.validate && !is_valid_identifier(&id.name) {
            return Err(SerializerError::InvalidIdentifier {
                name: id.name.clone(),
            });
        }
        Ok(())
    }

    fn write_message(&self, out: &mut String, m: &Message) -> Result<(), SerializerError> {
        if let Some(c) = &m.comment {
            write_comment(out, c);
        }
        self.check_identifier(&m.id)?;
        out.push_str(&m.id.name);
        out.push_str(" =");
        if let Some(value) = &m.value {
            self.write_pattern(out, value, 0)?;
        }
        for attr in &m.attributes {
            self.write_attribute(out, attr)?;
        }
        out.push('\n');
        Ok(())
    }

    fn write_term(&self, out: &mut String, t: &Term) -> Result<(), SerializerError> {
        if let Some(c) = &t.comment {
            write_comment(out, c);
        }
        self.check_identifier(&t.id)?;
        out.push('-');
        out.push_str(&t.id.name);
        out.push_str(" =");
        self.write_pattern(out, &t.value, 0)?;
        for attr in &t.attributes {
            self.write_attribute(out, attr)?;
        }
        out.push('\n');
        Ok(())
    }

    fn write_attribute(&self, out: &mut String, attr: &Attribute) -> Result<(), SerializerError> {
        self.check_identifier(&attr.id)?;
        out.push_str("\n    .");
        out.push_str(&attr.id.name);
        out.push_str(" =");
        self.write_pattern(out, &attr.value, 1)?;
        Ok(())
    }

    /// Write a pattern after `=` (or after a variant key).
    ///
    /// `level` is the current indentation depth in 4-space steps. Text with
    /// embedded newlines forces the separate-line layout so continuation
    /// indentation survives a reparse.
    fn write_pattern(
        &self,
        out: &mut String,
        pattern: &Pattern,
        level: usize,
    ) -> Result<(), SerializerError> {
        let multiline = pattern.elements.iter().any(|el| match el {
            PatternElement::Text(t) => t.value.contains('\n'),
            PatternElement::Placeable(_) => false,
        });

        let continuation = indent(level + 1);
        if multiline {
            out.push('\n');
            out.push_str(&continuation);
        } else {
            out.push(' ');
        }

        for el in &pattern.elements {
            match el {
                PatternElement::Text(t) => {
                    let mut first = true;
                    for line in t.value.split('\n') {
                        if !first {
                            out.push('\n');
                            if !line.is_empty() {
                                out.push_str(&continuation);
                            }
                        }
                        out.push_str(line);
                        first = false;
                    }
                }
                PatternElement::Placeable(p) => {
                    self.write_placeable(out, p, level, 0)?;
                }
            }
        }
        Ok(())
    }

    fn enter_depth(&self, depth: usize) -> Result<usize, SerializerError> {
        if depth >= self.options.max_depth {
            return Err(SerializerError::TooDeep {
                max: self.options.max_depth,
            });
        }
        Ok(depth + 1)
    }

    fn write_placeable(
        &self,
        out: &mut String,
        placeable: &Placeable,
        level: usize,
        depth: usize,
    ) -> Result<(), SerializerError> {
        let depth = self.enter_depth(depth)?;
        out.push_str("{ ");
        match &placeable.expression {
            Expression::Inline(expr) => {
                self.write_inline(out, expr, level, depth)?;
                out.push_str(" }");
            }
            Expression::Select(select) => {
                self.write_select(out, select, level, depth)?;
                out.push('\n');
                out.push_str(&indent(level));
                out.push('}');
            }
        }
        Ok(())
    }

    fn write_select(
        &self,
        out: &mut String,
        select: &SelectExpression,
        level: usize,
        depth: usize,
    ) -> Result<(), SerializerError> {
        if self.options.validate {
            let count = select.variants.iter().filter(|v| v.default).count();
            if count != 1 || select.variants.is_empty() {
                return Err(SerializerError::DefaultVariantCount { count });
            }
        }
        self.write_inline(out, &select.selector, level, depth)?;
        out.push_str(" ->");
        for variant in &select.variants {
            out.push('\n');
            let ind = indent(level + 1);
            // The default marker hangs one column to the left of the key.
            out.push_str(&ind[..ind.len() - 1]);
            out.push(if variant.default { '*' } else { ' ' });
            out.push('[');
            match &variant.key {
                VariantKey::Identifier { name, .. } => {
                    if self.options.validate && !is_valid_identifier(name) {
                        return Err(SerializerError::InvalidIdentifier { name: name.clone() });
                    }
                    out.push_str(name);
                }
                VariantKey::Number(n) => {
                    self.check_number(n)?;
                    out.push_str(&n.raw);
                }
            }
            out.push(']');
            self.write_pattern(out, &variant.value, level + 1)?;
        }
        Ok(())
    }

    fn check_number(&self, n: &NumberLiteral) -> Result<(), SerializerError> {
        if self.options.validate && !is_valid_number(&n.raw) {
            return Err(SerializerError::InvalidNumberLiteral { raw: n.raw.clone() });
        }
        Ok(())
    }

    fn write_inline(
        &self,
        out: &mut String,
        expr: &InlineExpression,
        level: usize,
        depth: usize,
    ) -> Result<(), SerializerError> {
        match expr {
            InlineExpression::StringLiteral(s) => {
                out.push('"');
                out.push_str(&s.raw);
                out.push('"');
            }
            InlineExpression::NumberLiteral(n) => {
                self.check_number(n)?;
                out.push_str(&n.raw);
            }
            InlineExpression::VariableReference { id, .. } => {
                self.check_identifier(id)?;
                out.push('$');
                out.push_str(&id.name);
            }
            InlineExpression::MessageReference { id, attribute, .. } => {
                self.check_identifier(id)?;
                out.push_str(&id.name);
                if let Some(attr) = attribute {
                    self.check_identifier(attr)?;
                    out.push('.');
                    out.push_str(&attr.name);
                }
            }
            InlineExpression::TermReference {
                id,
                attribute,
                arguments,
                ..
            } => {
                self.check_identifier(id)?;
                out.push('-');
                out.push_str(&id.name);
                if let Some(attr) = attribute {
                    self.check_identifier(attr)?;
                    out.push('.');
                    out.push_str(&attr.name);
                }
                if let Some(args) = arguments {
                    self.write_call_arguments(out, args, level, depth)?;
                }
            }
            InlineExpression::FunctionReference { id, arguments, .. } => {
                if self.options.validate && !crate::parser::is_function_name(&id.name) {
                    return Err(SerializerError::InvalidFunctionName {
                        name: id.name.clone(),
                    });
                }
                out.push_str(&id.name);
                self.write_call_arguments(out, arguments, level, depth)?;
            }
            InlineExpression::Placeable(p) => {
                self.write_placeable(out, p, level, depth)?;
            }
        }
        Ok(())
    }

    fn write_call_arguments(
        &self,
        out: &mut String,
        args: &CallArguments,
        level: usize,
        depth: usize,
    ) -> Result<(), SerializerError> {
        let depth = self.enter_depth(depth)?;
        out.push('(');
        let mut first = true;
        for positional in &args.positional {
            if !first {
                out.push_str(", ");
            }
            self.write_inline(out, positional, level, depth)?;
            first = false;
        }
        let mut seen: Vec<&str> = Vec::new();
        for named in &args.named {
            if self.options.validate {
                self.check_identifier(&named.name)?;
                if seen.contains(&named.name.name.as_str()) {
                    return Err(SerializerError::DuplicateNamedArgument {
                        name: named.name.name.clone(),
                    });
                }
                seen.push(&named.name.name);
                if !matches!(
                    named.value,
                    InlineExpression::StringLiteral(_) | InlineExpression::NumberLiteral(_)
                ) {
                    return Err(SerializerError::NamedArgumentValue {
                        name: named.name.name.clone(),
                    });
                }
            }
            if !first {
                out.push_str(", ");
            }
            out.push_str(&named.name.name);
            out.push_str(": ");
            self.write_inline(out, &named.value, level, depth)?;
            first = false;
        }
        out.push(')');
        Ok(())
    }
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

fn write_comment(out: &mut String, comment: &Comment) {
    let marker = comment.kind.marker();
    for line in comment.content.split('\n') {
        out.push_str(marker);
        if !line.is_empty() {
            out.push(' ');
            out.push_str(line);
        }
        out.push('\n');
    }
}

/// Number literal grammar: `-? [0-9]+ ("." [0-9]+)?`
pub fn is_valid_number(raw: &str) -> bool {
    let rest = raw.strip_prefix('-').unwrap_or(raw);
    if rest.is_empty() {
        return false;
    }
    let mut parts = rest.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match parts.next() {
        None => true,
        Some(frac) => !frac.is_empty() && frac.chars().all(|c| c.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn roundtrip(source: &str) {
        let first = parse(source);
        let text = serialize(&first).unwrap();
        let second = parse(&text);
        assert_eq!(
            first.strip_spans(),
            second.strip_spans(),
            "round-trip failed\n--- serialized ---\n{text}"
        );
    }

    #[test]
    fn test_serialize_simple() {
        let r = parse("hello = Hello, world!");
        assert_eq!(serialize(&r).unwrap(), "hello = Hello, world!\n");
    }

    #[test]
    fn test_serialize_placeable() {
        let r = parse("hello = Hello, { $name }!");
        assert_eq!(serialize(&r).unwrap(), "hello = Hello, { $name }!\n");
    }

    #[test]
    fn test_roundtrip_basics() {
        roundtrip("hello = Hello, world!");
        roundtrip("hello = Hello, { $name }!");
        roundtrip("-brand = Firefox\nabout = About { -brand }.");
        roundtrip("m = { \"literal\" } and { 3.14 }");
        roundtrip("ref = see { other.title }");
    }

    #[test]
    fn test_roundtrip_attributes() {
        roundtrip("login = Log in\n    .title = Login page\n    .aria-label = Sign in");
        roundtrip("login =\n    .title = Login page");
    }

    #[test]
    fn test_roundtrip_multiline() {
        roundtrip("multi =\n    first line\n    second line");
        roundtrip("multi =\n    first\n      deeper");
        roundtrip("multi = inline start\n    continued");
    }

    #[test]
    fn test_roundtrip_select() {
        roundtrip("items = { $n ->\n    [one] one item\n   *[other] { $n } items\n}");
        roundtrip(
            "-thing = { $case ->\n   *[nominative] thing\n    [genitive] thing's\n}",
        );
    }

    #[test]
    fn test_roundtrip_nested_select() {
        roundtrip(
            "m = { $a ->\n    [x] { $b ->\n        [y] deep\n       *[z] deeper\n    }\n   *[other] flat\n}",
        );
    }

    #[test]
    fn test_roundtrip_functions() {
        roundtrip(r#"size = { NUMBER($bytes, maximumFractionDigits: 1) }"#);
        roundtrip(r#"when = { DATETIME($date, dateStyle: "long") }"#);
        roundtrip(r#"t = { -term(case: "genitive", count: 2) }"#);
    }

    #[test]
    fn test_roundtrip_comments() {
        roundtrip("# attached\nm = x");
        roundtrip("# standalone\n\nm = x");
        roundtrip("## group\n\nm = x");
        roundtrip("### resource header\n\n# attached\nm = x");
        roundtrip("# line one\n# line two\nm = x");
    }

    #[test]
    fn test_roundtrip_junk() {
        roundtrip("=== not ftl ===\nvalid = ok");
    }

    #[test]
    fn test_multiline_with_embedded_indent_roundtrip() {
        // Programmatic pattern: text with a newline followed by indentation
        // must serialize to the separate-line layout.
        let m = Message {
            id: Identifier::new("poem"),
            value: Some(Pattern {
                elements: vec![PatternElement::Text(TextElement {
                    value: "line\n  indented".to_string(),
                    span: None,
                })],
            }),
            attributes: vec![],
            comment: None,
            span: None,
        };
        let r = Resource {
            body: vec![Entry::Message(m)],
        };
        let text = serialize(&r).unwrap();
        assert_eq!(text, "poem =\n    line\n      indented\n");
        assert_eq!(parse(&text).strip_spans(), r.strip_spans());
    }

    #[test]
    fn test_validation_missing_default() {
        let mut r = parse("items = { $n ->\n    [one] one\n   *[other] other\n}");
        // Strip the default flag programmatically.
        if let Entry::Message(m) = &mut r.body[0] {
            if let PatternElement::Placeable(p) = &mut m.value.as_mut().unwrap().elements[0] {
                if let Expression::Select(sel) = &mut p.expression {
                    for v in &mut sel.variants {
                        v.default = false;
                    }
                }
            }
        }
        let err = serialize(&r).unwrap_err();
        assert_eq!(err, SerializerError::DefaultVariantCount { count: 0 });
    }

    #[test]
    fn test_validation_bad_identifier() {
        let mut r = parse("ok = fine");
        if let Entry::Message(m) = &mut r.body[0] {
            m.id.name = "9bad".to_string();
        }
        assert!(matches!(
            serialize(&r).unwrap_err(),
            SerializerError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_validation_non_literal_named_argument() {
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
        assert!(matches!(
            serialize(&r).unwrap_err(),
            SerializerError::NamedArgumentValue { .. }
        ));
    }

    #[test]
    fn test_validation_off_allows_quirks() {
        let mut r = parse("ok = fine");
        if let Entry::Message(m) = &mut r.body[0] {
            m.id.name = "9bad".to_string();
        }
        let s = Serializer::with_options(SerializerOptions {
            validate: false,
            ..SerializerOptions::default()
        });
        assert!(s.serialize(&r).is_ok());
    }

    #[test]
    fn test_depth_guard() {
        // Build { { { ... $x ... } } } deeper than the limit.
        let mut expr = InlineExpression::VariableReference {
            id: Identifier::new("x"),
            span: None,
        };
        for _ in 0..150 {
            expr = InlineExpression::Placeable(Box::new(Placeable {
                expression: Expression::Inline(expr),
                span: None,
            }));
        }
        let r = Resource {
            body: vec![Entry::Message(Message {
                id: Identifier::new("deep"),
                value: Some(Pattern {
                    elements: vec![PatternElement::Placeable(Placeable {
                        expression: Expression::Inline(expr),
                        span: None,
                    })],
                }),
                attributes: vec![],
                comment: None,
                span: None,
            })],
        };
        assert_eq!(
            serialize(&r).unwrap_err(),
            SerializerError::TooDeep { max: 100 }
        );
    }

    #[test]
    fn test_number_grammar() {
        assert!(is_valid_number("0"));
        assert!(is_valid_number("-7"));
        assert!(is_valid_number("3.14"));
        assert!(is_valid_number("-0.50"));
        assert!(!is_valid_number(""));
        assert!(!is_valid_number("-"));
        assert!(!is_valid_number("1."));
        assert!(!is_valid_number(".5"));
        assert!(!is_valid_number("1.2.3"));
        assert!(!is_valid_number("1e5"));
    }
}
