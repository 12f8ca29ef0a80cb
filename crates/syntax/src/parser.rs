//! Recursive-descent parser for FTL resources
//!
//! The parser is total: any input produces a `Resource`, with unparseable
//! regions recovered as `Junk` entries carrying annotations. Recovery
//! resynchronizes at the next line whose first column starts an entry.
//!
//! Budgets guard against adversarial input: a source-size cap, a nesting
//! cap clamped to the host recursion budget, and a parse-error cap that
//! stops Junk accumulation.

use crate::ast::*;

/// Hard ceiling on parser recursion, independent of configuration.
///
/// Each placeable level costs a handful of stack frames; 448 levels stays
/// comfortably inside the default 8 MiB thread stack.
const HOST_RECURSION_LIMIT: usize = 512;
const RECURSION_SAFETY_MARGIN: usize = 64;

/// Tunable parser limits
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Maximum source length in code points
    pub max_source_size: usize,
    /// Maximum placeable/call nesting depth
    pub max_nesting_depth: usize,
    /// Abort after this many Junk entries; 0 disables the budget
    pub max_parse_errors: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            max_source_size: 10_000_000,
            max_nesting_depth: 100,
            max_parse_errors: 100,
        }
    }
}

/// Error surfaced by the configurable parser entry point
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    #[error("source exceeds maximum size: {size} code points > {max}")]
    SourceTooLarge { size: usize, max: usize },
}

/// Parse with default limits. Never fails: oversized input becomes a single
/// Junk entry annotated `E3007`.
pub fn parse(source: &str) -> Resource {
    let parser = Parser::new();
    match parser.parse(source) {
        Ok(resource) => resource,
        Err(ParserError::SourceTooLarge { size, max }) => Resource {
            body: vec![Entry::Junk(Junk {
                content: String::new(),
                annotations: vec![Annotation {
                    code: "E3007".to_string(),
                    message: format!("source exceeds maximum size: {size} code points > {max}"),
                    span: Some(Span::new(0, 0)),
                }],
                span: Some(Span::new(0, 0)),
            })],
        },
    }
}

/// Configurable parser front-end
#[derive(Debug, Clone, Default)]
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new() -> Self {
        Parser::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Parser { config }
    }

    /// Parse `source` into a resource.
    ///
    /// The only error is the source-size rejection; every syntax problem is
    /// recovered as Junk inside the returned resource.
    pub fn parse(&self, source: &str) -> Result<Resource, ParserError> {
        let normalized = normalize_line_endings(source);
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() > self.config.max_source_size {
            return Err(ParserError::SourceTooLarge {
                size: chars.len(),
                max: self.config.max_source_size,
            });
        }

        let usable = HOST_RECURSION_LIMIT - RECURSION_SAFETY_MARGIN;
        let max_depth = if self.config.max_nesting_depth > usable {
            tracing::warn!(
                configured = self.config.max_nesting_depth,
                clamped = usable,
                "max_nesting_depth clamped to host recursion budget"
            );
            usable
        } else {
            self.config.max_nesting_depth
        };

        let mut session = Session {
            src: chars,
            pos: 0,
            max_depth,
            max_parse_errors: self.config.max_parse_errors,
            junk_count: 0,
        };
        Ok(session.parse_resource())
    }
}

/// Normalize `CRLF` and lone `CR` to `LF`
pub fn normalize_line_endings(source: &str) -> String {
    if !source.contains('\r') {
        return source.to_string();
    }
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// Internal parse failure, converted into Junk annotations on recovery
#[derive(Debug, Clone)]
struct ParseError {
    code: &'static str,
    message: String,
    pos: usize,
}

impl ParseError {
    fn new(code: &'static str, message: impl Into<String>, pos: usize) -> Self {
        ParseError {
            code,
            message: message.into(),
            pos,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

struct Session {
    src: Vec<char>,
    pos: usize,
    max_depth: usize,
    max_parse_errors: usize,
    junk_count: usize,
}

impl Session {
    // ------------------------------------------------------------------
    // Cursor primitives
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> PResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ParseError::new(
                "E3002",
                format!("expected `{expected}`"),
                self.pos,
            ))
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.src[start.min(self.src.len())..end.min(self.src.len())]
            .iter()
            .collect()
    }

    /// Skip inline blank (spaces); returns the count skipped
    fn skip_blank_inline(&mut self) -> usize {
        let start = self.pos;
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Skip spaces and newlines
    fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\n')) {
            self.pos += 1;
        }
    }

    /// True when the cursor sits on a line end (or EOF)
    fn is_eol(&self) -> bool {
        matches!(self.peek(), None | Some('\n'))
    }

    fn skip_eol(&mut self) {
        if self.peek() == Some('\n') {
            self.pos += 1;
        }
    }

    /// Advance to the start of the next line
    fn skip_to_next_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn is_identifier_start(c: char) -> bool {
        c.is_ascii_alphabetic()
    }

    fn is_identifier_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    }

    // ------------------------------------------------------------------
    // Resource / entry level
    // ------------------------------------------------------------------

    fn parse_resource(&mut self) -> Resource {
        let mut body: Vec<Entry> = Vec::new();
        let mut pending_comment: Option<Comment> = None;

        loop {
            self.skip_blank_lines_flushing(&mut pending_comment, &mut body);
            if self.is_eof() {
                break;
            }

            if self.junk_budget_exhausted() {
                let start = self.pos;
                self.pos = self.src.len();
                body.push(Entry::Junk(Junk {
                    content: self.slice(start, self.src.len()),
                    annotations: vec![Annotation {
                        code: "E3006".to_string(),
                        message: format!(
                            "too many parse errors ({}); giving up on the rest of the resource",
                            self.junk_count
                        ),
                        span: Some(Span::new(start, start)),
                    }],
                    span: Some(Span::new(start, self.src.len())),
                }));
                break;
            }

            let entry_start = self.pos;
            match self.parse_entry() {
                Ok(ParsedEntry::Message(mut m)) => {
                    m.comment = pending_comment.take();
                    body.push(Entry::Message(m));
                }
                Ok(ParsedEntry::Term(mut t)) => {
                    t.comment = pending_comment.take();
                    body.push(Entry::Term(t));
                }
                Ok(ParsedEntry::Comment(c)) => {
                    if let Some(prev) = pending_comment.take() {
                        body.push(Entry::Comment(prev));
                    }
                    if c.kind == CommentKind::Comment && self.next_line_starts_entry() {
                        pending_comment = Some(c);
                    } else {
                        body.push(Entry::Comment(c));
                    }
                }
                Err(err) => {
                    if let Some(prev) = pending_comment.take() {
                        body.push(Entry::Comment(prev));
                    }
                    body.push(self.recover_junk(entry_start, err));
                }
            }
        }

        if let Some(c) = pending_comment {
            body.push(Entry::Comment(c));
        }

        Resource { body }
    }

    fn junk_budget_exhausted(&self) -> bool {
        self.max_parse_errors > 0 && self.junk_count >= self.max_parse_errors
    }

    /// Skip blank lines between entries. A line with leading spaces followed
    /// by content violates the column-1 rule and is *not* skipped here; the
    /// entry parser turns it into Junk.
    fn skip_blank_lines_flushing(&mut self, pending: &mut Option<Comment>, body: &mut Vec<Entry>) {
        loop {
            let mark = self.pos;
            self.skip_blank_inline();
            if self.peek() == Some('\n') {
                self.pos += 1;
                // A blank line detaches a pending comment from what follows.
                if let Some(c) = pending.take() {
                    body.push(Entry::Comment(c));
                }
                continue;
            }
            if self.is_eof() && self.pos > mark {
                return;
            }
            self.pos = mark;
            return;
        }
    }

    /// True when the cursor sits at the start of a line that begins a
    /// message or term
    fn next_line_starts_entry(&self) -> bool {
        match self.peek() {
            Some(c) if Self::is_identifier_start(c) => true,
            Some('-') => matches!(self.peek_at(1), Some(c) if Self::is_identifier_start(c)),
            _ => false,
        }
    }

    fn parse_entry(&mut self) -> PResult<ParsedEntry> {
        match self.peek() {
            Some('#') => self.parse_comment().map(ParsedEntry::Comment),
            Some('-') => self.parse_term().map(ParsedEntry::Term),
            Some(c) if Self::is_identifier_start(c) => {
                self.parse_message().map(ParsedEntry::Message)
            }
            Some(' ') => Err(ParseError::new(
                "E3001",
                "entry must start at column 1",
                self.pos,
            )),
            _ => Err(ParseError::new(
                "E3002",
                "expected message, term, or comment",
                self.pos,
            )),
        }
    }

    /// Turn the failed region into Junk and resynchronize at the next
    /// plausible entry start
    fn recover_junk(&mut self, entry_start: usize, err: ParseError) -> Entry {
        self.junk_count += 1;
        // Always make progress, then scan to the next line whose first
        // column can start an entry.
        self.skip_to_next_line();
        loop {
            if self.is_eof() {
                break;
            }
            match self.peek() {
                Some(c) if Self::is_identifier_start(c) || c == '#' || c == '-' => break,
                _ => self.skip_to_next_line(),
            }
        }
        let content = self.slice(entry_start, self.pos);
        Entry::Junk(Junk {
            content,
            annotations: vec![Annotation {
                code: err.code.to_string(),
                message: err.message,
                span: Some(Span::new(err.pos, err.pos)),
            }],
            span: Some(Span::new(entry_start, self.pos)),
        })
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    /// Parse one comment, merging consecutive lines of the same level
    fn parse_comment(&mut self) -> PResult<Comment> {
        let start = self.pos;
        let mut level: usize = 0;
        let mut content = String::new();
        let mut first = true;

        loop {
            let line_level = {
                let mut n = 0;
                while n < 3 && self.peek_at(n) == Some('#') {
                    n += 1;
                }
                n
            };
            if line_level == 0 {
                break;
            }
            if first {
                level = line_level;
                first = false;
            } else if line_level != level {
                break;
            }
            self.pos += line_level;
            if !self.is_eol() {
                self.expect(' ').map_err(|_| {
                    ParseError::new(
                        "E3002",
                        "expected a space or line end after the comment marker",
                        self.pos,
                    )
                })?;
            }
            let line_start = self.pos;
            while !self.is_eol() {
                self.pos += 1;
            }
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&self.slice(line_start, self.pos));
            self.skip_eol();
            // Only merge when the very next line continues the comment.
            if self.peek() != Some('#') {
                break;
            }
        }

        let kind = match level {
            1 => CommentKind::Comment,
            2 => CommentKind::Group,
            _ => CommentKind::Resource,
        };
        Ok(Comment {
            content,
            kind,
            span: Some(Span::new(start, self.pos)),
        })
    }

    // ------------------------------------------------------------------
    // Messages and terms
    // ------------------------------------------------------------------

    fn parse_identifier(&mut self) -> PResult<Identifier> {
        let start = self.pos;
        match self.peek() {
            Some(c) if Self::is_identifier_start(c) => {
                self.pos += 1;
            }
            _ => {
                return Err(ParseError::new("E3004", "expected an identifier", self.pos));
            }
        }
        while matches!(self.peek(), Some(c) if Self::is_identifier_char(c)) {
            self.pos += 1;
        }
        Ok(Identifier {
            name: self.slice(start, self.pos),
            span: Some(Span::new(start, self.pos)),
        })
    }

    fn parse_message(&mut self) -> PResult<Message> {
        let start = self.pos;
        let id = self.parse_identifier()?;
        self.skip_blank_inline();
        self.expect('=')?;

        let value = self.parse_pattern(0)?;
        let attributes = self.parse_attributes()?;

        if value.is_none() && attributes.is_empty() {
            return Err(ParseError::new(
                "E3002",
                format!("message `{}` has neither a value nor attributes", id.name),
                start,
            ));
        }

        Ok(Message {
            id,
            value,
            attributes,
            comment: None,
            span: Some(Span::new(start, self.pos)),
        })
    }

    fn parse_term(&mut self) -> PResult<Term> {
        let start = self.pos;
        self.expect('-')?;
        let id = self.parse_identifier()?;
        self.skip_blank_inline();
        self.expect('=')?;

        let value = self.parse_pattern(0)?.ok_or_else(|| {
            ParseError::new(
                "E3002",
                format!("term `-{}` must have a value", id.name),
                start,
            )
        })?;
        let attributes = self.parse_attributes()?;

        Ok(Term {
            id,
            value,
            attributes,
            comment: None,
            span: Some(Span::new(start, self.pos)),
        })
    }

    /// Parse attribute lines: indented `.name = pattern`
    fn parse_attributes(&mut self) -> PResult<Vec<Attribute>> {
        let mut attributes = Vec::new();
        loop {
            let mark = self.pos;
            if self.peek() != Some('\n') {
                break;
            }
            self.pos += 1;
            self.skip_blank();
            if self.peek() != Some('.') {
                self.pos = mark;
                break;
            }
            let attr_start = self.pos;
            self.pos += 1;
            let id = self.parse_identifier()?;
            self.skip_blank_inline();
            self.expect('=')?;
            let value = self.parse_pattern(0)?.ok_or_else(|| {
                ParseError::new(
                    "E3002",
                    format!("attribute `.{}` must have a value", id.name),
                    attr_start,
                )
            })?;
            attributes.push(Attribute {
                id,
                value,
                span: Some(Span::new(attr_start, self.pos)),
            });
        }
        Ok(attributes)
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    /// Parse an (optional) pattern starting after `=` or a variant key.
    ///
    /// Handles the inline and block layouts, joins continuation lines with
    /// `\n`, strips the common indent of block lines, and trims trailing
    /// blank lines. Returns `None` when no pattern is present.
    fn parse_pattern(&mut self, depth: usize) -> PResult<Option<Pattern>> {
        self.skip_blank_inline();

        let mut lines: Vec<RawLine> = Vec::new();

        if self.is_eol() {
            // Possible block pattern on the following lines.
            if !self.block_continues() {
                return Ok(None);
            }
        } else {
            let mut line = RawLine::inline();
            self.parse_pattern_line(&mut line, depth)?;
            lines.push(line);
        }

        // Continuation lines.
        loop {
            let mark = self.pos;
            if self.peek() != Some('\n') {
                break;
            }
            self.pos += 1;
            let indent = self.skip_blank_inline();
            if self.is_eol() {
                // Blank line inside (or trailing) the pattern; it only
                // survives as a newline if content follows, otherwise the
                // assembly pass trims it.
                lines.push(RawLine::blank());
                continue;
            }
            if indent == 0 || !self.is_pattern_continuation() {
                self.pos = mark;
                break;
            }
            let mut line = RawLine::block(indent);
            self.parse_pattern_line(&mut line, depth)?;
            lines.push(line);
        }

        Ok(assemble_pattern(lines))
    }

    /// Look ahead (without consuming) whether the upcoming lines start a
    /// block pattern
    fn block_continues(&self) -> bool {
        let mut pos = self.pos;
        loop {
            match self.src.get(pos) {
                Some('\n') => pos += 1,
                _ => break,
            }
            // Scan one line: indent then first significant char.
            let mut indent = 0;
            while self.src.get(pos + indent) == Some(&' ') {
                indent += 1;
            }
            match self.src.get(pos + indent) {
                None => return false,
                Some('\n') => {
                    pos += indent;
                    continue;
                }
                Some(c) => {
                    if indent == 0 {
                        return false;
                    }
                    return !matches!(c, '.' | '[' | '*' | '}');
                }
            }
        }
        false
    }

    /// At a freshly indented line: does the first significant char continue
    /// the pattern (as opposed to starting an attribute or variant, or
    /// closing a placeable)?
    fn is_pattern_continuation(&self) -> bool {
        !matches!(self.peek(), None | Some('.') | Some('[') | Some('*') | Some('}'))
    }

    /// Parse the remainder of one pattern line into text/placeable items
    fn parse_pattern_line(&mut self, line: &mut RawLine, depth: usize) -> PResult<()> {
        let mut text_start = self.pos;
        loop {
            match self.peek() {
                None | Some('\n') => {
                    if self.pos > text_start {
                        line.items.push(RawItem::Text {
                            content: self.slice(text_start, self.pos),
                            span: Span::new(text_start, self.pos),
                        });
                    }
                    return Ok(());
                }
                Some('{') => {
                    if self.pos > text_start {
                        line.items.push(RawItem::Text {
                            content: self.slice(text_start, self.pos),
                            span: Span::new(text_start, self.pos),
                        });
                    }
                    let placeable = self.parse_placeable(depth)?;
                    line.items.push(RawItem::Placeable(placeable));
                    text_start = self.pos;
                }
                Some('}') => {
                    return Err(ParseError::new(
                        "E3002",
                        "unbalanced `}` in pattern",
                        self.pos,
                    ));
                }
                _ => {
                    self.pos += 1;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Placeables and expressions
    // ------------------------------------------------------------------

    fn enter_depth(&self, depth: usize, pos: usize) -> PResult<usize> {
        if depth >= self.max_depth {
            return Err(ParseError::new(
                "E3005",
                format!("placeable nesting exceeds the limit of {}", self.max_depth),
                pos,
            ));
        }
        Ok(depth + 1)
    }

    fn parse_placeable(&mut self, depth: usize) -> PResult<Placeable> {
        let start = self.pos;
        let depth = self.enter_depth(depth, start)?;
        self.expect('{')?;
        self.skip_blank();
        let expression = self.parse_expression(depth)?;
        self.skip_blank();
        self.expect('}').map_err(|_| {
            ParseError::new("E3002", "expected `}` to close the placeable", self.pos)
        })?;
        Ok(Placeable {
            expression,
            span: Some(Span::new(start, self.pos)),
        })
    }

    fn parse_expression(&mut self, depth: usize) -> PResult<Expression> {
        let selector_start = self.pos;
        let inline = self.parse_inline_expression(depth)?;
        let mark = self.pos;
        self.skip_blank_inline();

        if self.peek() == Some('-') && self.peek_at(1) == Some('>') {
            self.pos += 2;
            self.validate_selector(&inline, selector_start)?;
            let variants = self.parse_variants(depth)?;
            return Ok(Expression::Select(SelectExpression {
                selector: Box::new(inline),
                variants,
                span: Some(Span::new(selector_start, self.pos)),
            }));
        }

        self.pos = mark;
        Ok(Expression::Inline(inline))
    }

    /// Selectors are restricted to values: literals, variables, functions,
    /// and term attributes. Messages and bare terms cannot select.
    fn validate_selector(&self, selector: &InlineExpression, pos: usize) -> PResult<()> {
        match selector {
            InlineExpression::StringLiteral(_)
            | InlineExpression::NumberLiteral(_)
            | InlineExpression::VariableReference { .. }
            | InlineExpression::FunctionReference { .. } => Ok(()),
            InlineExpression::TermReference {
                attribute: Some(_), ..
            } => Ok(()),
            InlineExpression::TermReference { .. } => Err(ParseError::new(
                "E3002",
                "a term value cannot be used as a selector; select on a term attribute instead",
                pos,
            )),
            InlineExpression::MessageReference { .. } => Err(ParseError::new(
                "E3002",
                "a message cannot be used as a selector",
                pos,
            )),
            InlineExpression::Placeable(_) => Err(ParseError::new(
                "E3002",
                "a placeable cannot be used as a selector",
                pos,
            )),
        }
    }

    fn parse_variants(&mut self, depth: usize) -> PResult<Vec<Variant>> {
        let mut variants = Vec::new();
        let mut default_count = 0usize;

        loop {
            let mark = self.pos;
            self.skip_blank_inline();
            if self.peek() != Some('\n') {
                break;
            }
            self.skip_blank();
            let variant_start = self.pos;
            let default = self.eat('*');
            if self.peek() != Some('[') {
                if default {
                    return Err(ParseError::new(
                        "E3002",
                        "expected `[` after `*`",
                        self.pos,
                    ));
                }
                self.pos = mark;
                break;
            }
            self.pos += 1;
            self.skip_blank_inline();
            let key = self.parse_variant_key()?;
            self.skip_blank_inline();
            self.expect(']')?;
            let value = self.parse_pattern(depth)?.ok_or_else(|| {
                ParseError::new("E3002", "variant must have a pattern", variant_start)
            })?;
            if default {
                default_count += 1;
            }
            variants.push(Variant {
                key,
                value,
                default,
                span: Some(Span::new(variant_start, self.pos)),
            });
        }

        if variants.is_empty() {
            return Err(ParseError::new(
                "E3002",
                "select expression must have at least one variant",
                self.pos,
            ));
        }
        if default_count != 1 {
            return Err(ParseError::new(
                "E3008",
                format!(
                    "select expression must have exactly one default variant, found {default_count}"
                ),
                self.pos,
            ));
        }
        Ok(variants)
    }

    fn parse_variant_key(&mut self) -> PResult<VariantKey> {
        match self.peek() {
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let number = self.parse_number_literal()?;
                Ok(VariantKey::Number(number))
            }
            _ => {
                let id = self.parse_identifier()?;
                Ok(VariantKey::Identifier {
                    name: id.name,
                    span: id.span,
                })
            }
        }
    }

    fn parse_inline_expression(&mut self, depth: usize) -> PResult<InlineExpression> {
        match self.peek() {
            Some('"') => self.parse_string_literal().map(InlineExpression::StringLiteral),
            Some('$') => {
                let start = self.pos;
                self.pos += 1;
                let id = self.parse_identifier()?;
                Ok(InlineExpression::VariableReference {
                    id,
                    span: Some(Span::new(start, self.pos)),
                })
            }
            Some('{') => {
                let placeable = self.parse_placeable(depth)?;
                Ok(InlineExpression::Placeable(Box::new(placeable)))
            }
            Some('-') => {
                if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
                    return self.parse_number_literal().map(InlineExpression::NumberLiteral);
                }
                let start = self.pos;
                self.pos += 1;
                let id = self.parse_identifier()?;
                let attribute = if self.peek() == Some('.') {
                    self.pos += 1;
                    Some(self.parse_identifier()?)
                } else {
                    None
                };
                let arguments = if self.peek() == Some('(') {
                    Some(self.parse_call_arguments(depth)?)
                } else {
                    None
                };
                Ok(InlineExpression::TermReference {
                    id,
                    attribute,
                    arguments,
                    span: Some(Span::new(start, self.pos)),
                })
            }
            Some(c) if c.is_ascii_digit() => {
                self.parse_number_literal().map(InlineExpression::NumberLiteral)
            }
            Some(c) if Self::is_identifier_start(c) => {
                let start = self.pos;
                let id = self.parse_identifier()?;
                if self.peek() == Some('(') {
                    if !is_function_name(&id.name) {
                        return Err(ParseError::new(
                            "E3004",
                            format!(
                                "`{}` is not a valid function name; functions are all-uppercase",
                                id.name
                            ),
                            start,
                        ));
                    }
                    let arguments = self.parse_call_arguments(depth)?;
                    return Ok(InlineExpression::FunctionReference {
                        id,
                        arguments,
                        span: Some(Span::new(start, self.pos)),
                    });
                }
                let attribute = if self.peek() == Some('.') {
                    self.pos += 1;
                    Some(self.parse_identifier()?)
                } else {
                    None
                };
                Ok(InlineExpression::MessageReference {
                    id,
                    attribute,
                    span: Some(Span::new(start, self.pos)),
                })
            }
            _ => Err(ParseError::new(
                "E3002",
                "expected an inline expression",
                self.pos,
            )),
        }
    }

    fn parse_string_literal(&mut self) -> PResult<StringLiteral> {
        let start = self.pos;
        self.expect('"')?;
        let content_start = self.pos;
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(ParseError::new(
                        "E3003",
                        "unterminated string literal",
                        start,
                    ));
                }
                Some('"') => break,
                Some('\\') => {
                    self.pos += 1;
                    if matches!(self.peek(), None | Some('\n')) {
                        return Err(ParseError::new(
                            "E3003",
                            "unterminated string literal",
                            start,
                        ));
                    }
                    self.pos += 1;
                }
                _ => {
                    self.pos += 1;
                }
            }
        }
        let raw = self.slice(content_start, self.pos);
        self.pos += 1; // closing quote
        // Validate escapes now so the resolver can rely on them.
        if let Err(e) = unescape(&raw) {
            return Err(ParseError::new(
                "E3002",
                e.to_string(),
                content_start + e.offset,
            ));
        }
        Ok(StringLiteral {
            raw,
            span: Some(Span::new(start, self.pos)),
        })
    }

    fn parse_number_literal(&mut self) -> PResult<NumberLiteral> {
        let start = self.pos;
        self.eat('-');
        let int_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == int_start {
            return Err(ParseError::new("E3002", "expected a digit", self.pos));
        }
        if self.peek() == Some('.') {
            let frac_start = self.pos + 1;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.pos == frac_start {
                return Err(ParseError::new(
                    "E3002",
                    "expected a digit after the decimal point",
                    self.pos,
                ));
            }
        }
        let raw = self.slice(start, self.pos);
        let mut literal = NumberLiteral::from_raw(raw);
        literal.span = Some(Span::new(start, self.pos));
        Ok(literal)
    }

    fn parse_call_arguments(&mut self, depth: usize) -> PResult<CallArguments> {
        let start = self.pos;
        let depth = self.enter_depth(depth, start)?;
        self.expect('(')?;
        self.skip_blank();

        let mut positional = Vec::new();
        let mut named: Vec<NamedArgument> = Vec::new();

        while self.peek() != Some(')') {
            if self.is_eof() {
                return Err(ParseError::new(
                    "E3002",
                    "expected `)` to close the argument list",
                    self.pos,
                ));
            }
            let arg_start = self.pos;
            let expr = self.parse_inline_expression(depth)?;
            self.skip_blank();

            if self.peek() == Some(':') {
                let name = match expr {
                    InlineExpression::MessageReference {
                        id,
                        attribute: None,
                        ..
                    } => id,
                    _ => {
                        return Err(ParseError::new(
                            "E3002",
                            "named argument name must be a plain identifier",
                            arg_start,
                        ));
                    }
                };
                self.pos += 1;
                self.skip_blank();
                let value_start = self.pos;
                let value = self.parse_inline_expression(depth)?;
                if !matches!(
                    value,
                    InlineExpression::StringLiteral(_) | InlineExpression::NumberLiteral(_)
                ) {
                    return Err(ParseError::new(
                        "E3002",
                        "named argument values must be string or number literals",
                        value_start,
                    ));
                }
                if named.iter().any(|n| n.name.name == name.name) {
                    return Err(ParseError::new(
                        "E3009",
                        format!("duplicate named argument `{}`", name.name),
                        arg_start,
                    ));
                }
                let span = Some(Span::new(arg_start, self.pos));
                named.push(NamedArgument { name, value, span });
            } else {
                if !named.is_empty() {
                    return Err(ParseError::new(
                        "E3002",
                        "positional arguments must precede named arguments",
                        arg_start,
                    ));
                }
                positional.push(expr);
            }

            self.skip_blank();
            if !self.eat(',') {
                break;
            }
            self.skip_blank();
        }
        self.expect(')')?;

        Ok(CallArguments {
            positional,
            named,
            span: Some(Span::new(start, self.pos)),
        })
    }
}

/// FTL function names: `[A-Z][A-Z0-9_-]*`
pub fn is_function_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

enum ParsedEntry {
    Message(Message),
    Term(Term),
    Comment(Comment),
}

/// One physical line of a pattern before dedenting
struct RawLine {
    /// Indent in spaces; `None` for the inline first line
    indent: Option<usize>,
    blank: bool,
    items: Vec<RawItem>,
}

impl RawLine {
    fn inline() -> Self {
        RawLine {
            indent: None,
            blank: false,
            items: Vec::new(),
        }
    }

    fn block(indent: usize) -> Self {
        RawLine {
            indent: Some(indent),
            blank: false,
            items: Vec::new(),
        }
    }

    fn blank() -> Self {
        RawLine {
            indent: None,
            blank: true,
            items: Vec::new(),
        }
    }

    fn has_content(&self) -> bool {
        !self.blank
            && self.items.iter().any(|item| match item {
                RawItem::Text { content, .. } => !content.trim().is_empty(),
                RawItem::Placeable(_) => true,
            })
    }
}

enum RawItem {
    Text { content: String, span: Span },
    Placeable(Placeable),
}

/// Dedent, join, and trim collected pattern lines into the final Pattern
fn assemble_pattern(mut lines: Vec<RawLine>) -> Option<Pattern> {
    // Trim trailing blank lines (and all-blank text lines).
    while let Some(last) = lines.last() {
        if last.blank || !last.has_content() {
            lines.pop();
        } else {
            break;
        }
    }
    if lines.is_empty() {
        return None;
    }

    let common_indent = lines
        .iter()
        .filter(|l| l.indent.is_some() && l.has_content())
        .filter_map(|l| l.indent)
        .min()
        .unwrap_or(0);

    let mut elements: Vec<PatternElement> = Vec::new();
    let mut buf = String::new();
    let mut buf_span: Option<Span> = None;

    let mut flush =
        |buf: &mut String, buf_span: &mut Option<Span>, elements: &mut Vec<PatternElement>| {
            if !buf.is_empty() {
                elements.push(PatternElement::Text(TextElement {
                    value: std::mem::take(buf),
                    span: buf_span.take(),
                }));
            }
        };

    for (idx, line) in lines.iter().enumerate() {
        if idx > 0 || line.indent.is_some() {
            if idx > 0 {
                buf.push('\n');
            }
            if line.blank {
                continue;
            }
            if let Some(indent) = line.indent {
                for _ in common_indent..indent {
                    buf.push(' ');
                }
            }
        }
        for item in &line.items {
            match item {
                RawItem::Text { content, span } => {
                    if buf.is_empty() && buf_span.is_none() {
                        buf_span = Some(*span);
                    } else if let Some(s) = &mut buf_span {
                        s.end = span.end;
                    }
                    buf.push_str(content);
                }
                RawItem::Placeable(p) => {
                    flush(&mut buf, &mut buf_span, &mut elements);
                    elements.push(PatternElement::Placeable(p.clone()));
                }
            }
        }
    }
    flush(&mut buf, &mut buf_span, &mut elements);

    // Trim leading blank on the very first text element (inline leading
    // space was already consumed by skip_blank_inline; this covers block
    // patterns that begin with spaces beyond the common indent).
    if elements.is_empty() {
        return None;
    }
    Some(Pattern { elements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn single_message(resource: &Resource) -> &Message {
        assert_eq!(resource.body.len(), 1, "expected one entry: {resource:?}");
        match &resource.body[0] {
            Entry::Message(m) => m,
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    fn pattern_text(pattern: &Pattern) -> String {
        let mut out = String::new();
        for el in &pattern.elements {
            match el {
                PatternElement::Text(t) => out.push_str(&t.value),
                PatternElement::Placeable(_) => out.push('\u{FFFC}'),
            }
        }
        out
    }

    #[test]
    fn test_parse_simple_message() {
        let resource = parse("hello = Hello, world!");
        let m = single_message(&resource);
        assert_eq!(m.id.name, "hello");
        assert_eq!(pattern_text(m.value.as_ref().unwrap()), "Hello, world!");
    }

    #[test]
    fn test_parse_message_with_placeable() {
        let resource = parse("hello = Hello, { $name }!");
        let m = single_message(&resource);
        let p = m.value.as_ref().unwrap();
        assert_eq!(p.elements.len(), 3);
        match &p.elements[1] {
            PatternElement::Placeable(pl) => match &pl.expression {
                Expression::Inline(InlineExpression::VariableReference { id, .. }) => {
                    assert_eq!(id.name, "name");
                }
                other => panic!("Expected VariableReference, got {other:?}"),
            },
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_term() {
        let resource = parse("-brand = Firefox\nabout = About { -brand }");
        assert_eq!(resource.body.len(), 2);
        match &resource.body[0] {
            Entry::Term(t) => assert_eq!(t.id.name, "brand"),
            other => panic!("Expected Term, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_attributes() {
        let source = "login = Log in\n    .title = Login page\n    .aria-label = Sign in form";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(m.attributes.len(), 2);
        assert_eq!(m.attributes[0].id.name, "title");
        assert_eq!(m.attributes[1].id.name, "aria-label");
    }

    #[test]
    fn test_parse_attribute_only_message() {
        let resource = parse("login =\n    .title = Login");
        let m = single_message(&resource);
        assert!(m.value.is_none());
        assert_eq!(m.attributes.len(), 1);
    }

    #[test]
    fn test_parse_block_pattern_dedent() {
        let source = "multi =\n    first line\n    second line";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(
            pattern_text(m.value.as_ref().unwrap()),
            "first line\nsecond line"
        );
    }

    #[test]
    fn test_parse_block_pattern_nested_indent() {
        let source = "multi =\n    first\n      deeper";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(pattern_text(m.value.as_ref().unwrap()), "first\n  deeper");
    }

    #[test]
    fn test_parse_inline_then_continuation() {
        let source = "multi = first\n    second";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(pattern_text(m.value.as_ref().unwrap()), "first\nsecond");
    }

    #[test]
    fn test_trailing_spaces_preserved_trailing_blank_lines_trimmed() {
        let source = "m = content   \n\n\nnext = x";
        let resource = parse(source);
        assert_eq!(resource.body.len(), 2);
        match &resource.body[0] {
            Entry::Message(m) => {
                assert_eq!(pattern_text(m.value.as_ref().unwrap()), "content   ");
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_select_expression() {
        let source = "items = { $n ->\n    [one] one item\n   *[other] { $n } items\n}";
        let resource = parse(source);
        let m = single_message(&resource);
        let p = m.value.as_ref().unwrap();
        assert_eq!(p.elements.len(), 1);
        match &p.elements[0] {
            PatternElement::Placeable(pl) => match &pl.expression {
                Expression::Select(sel) => {
                    assert_eq!(sel.variants.len(), 2);
                    assert!(!sel.variants[0].default);
                    assert!(sel.variants[1].default);
                    assert_eq!(
                        sel.default_variant().map(|v| match &v.key {
                            VariantKey::Identifier { name, .. } => name.clone(),
                            VariantKey::Number(n) => n.raw.clone(),
                        }),
                        Some("other".to_string())
                    );
                }
                other => panic!("Expected Select, got {other:?}"),
            },
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }

    #[test]
    fn test_select_missing_default_is_junk() {
        let source = "items = { $n ->\n    [one] one\n    [two] two\n}";
        let resource = parse(source);
        let junk: Vec<_> = resource.junk().collect();
        assert_eq!(junk.len(), 1);
        assert_eq!(junk[0].annotations[0].code, "E3008");
    }

    #[test]
    fn test_select_numeric_variant_keys() {
        let source = "score = { $n ->\n    [0] zero\n   *[other] lots\n}";
        let resource = parse(source);
        let m = single_message(&resource);
        match &m.value.as_ref().unwrap().elements[0] {
            PatternElement::Placeable(pl) => match &pl.expression {
                Expression::Select(sel) => match &sel.variants[0].key {
                    VariantKey::Number(n) => assert_eq!(n.raw, "0"),
                    other => panic!("Expected Number key, got {other:?}"),
                },
                other => panic!("Expected Select, got {other:?}"),
            },
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_reference() {
        let source = r#"size = { NUMBER($bytes, maximumFractionDigits: 1) }"#;
        let resource = parse(source);
        let m = single_message(&resource);
        match &m.value.as_ref().unwrap().elements[0] {
            PatternElement::Placeable(pl) => match &pl.expression {
                Expression::Inline(InlineExpression::FunctionReference { id, arguments, .. }) => {
                    assert_eq!(id.name, "NUMBER");
                    assert_eq!(arguments.positional.len(), 1);
                    assert_eq!(arguments.named.len(), 1);
                    assert_eq!(arguments.named[0].name.name, "maximumFractionDigits");
                }
                other => panic!("Expected FunctionReference, got {other:?}"),
            },
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }

    #[test]
    fn test_lowercase_function_call_is_junk() {
        let resource = parse("m = { number($x) }");
        assert_eq!(resource.junk().count(), 1);
    }

    #[test]
    fn test_duplicate_named_argument_is_junk() {
        let resource = parse(r#"m = { NUMBER($x, style: "a", style: "b") }"#);
        let junk: Vec<_> = resource.junk().collect();
        assert_eq!(junk.len(), 1);
        assert_eq!(junk[0].annotations[0].code, "E3009");
    }

    #[test]
    fn test_parameterized_term() {
        let source = r#"-thing = { $case ->
   *[nominative] thing
    [genitive] thing's
}
about = About { -thing(case: "genitive") }"#;
        let resource = parse(source);
        assert_eq!(resource.junk().count(), 0);
        assert_eq!(resource.terms().count(), 1);
        assert_eq!(resource.messages().count(), 1);
    }

    #[test]
    fn test_comments_kinds() {
        let source = "# simple\n\n## group\n\n### resource\n\nm = x";
        let resource = parse(source);
        let kinds: Vec<_> = resource
            .body
            .iter()
            .filter_map(|e| match e {
                Entry::Comment(c) => Some(c.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![CommentKind::Comment, CommentKind::Group, CommentKind::Resource]
        );
    }

    #[test]
    fn test_comment_attaches_to_following_message() {
        let source = "# The login button label\nlogin = Log in";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(
            m.comment.as_ref().map(|c| c.content.as_str()),
            Some("The login button label")
        );
    }

    #[test]
    fn test_comment_with_blank_line_stays_standalone() {
        let source = "# standalone\n\nlogin = Log in";
        let resource = parse(source);
        assert_eq!(resource.body.len(), 2);
        match &resource.body[0] {
            Entry::Comment(c) => assert_eq!(c.content, "standalone"),
            other => panic!("Expected Comment, got {other:?}"),
        }
        match &resource.body[1] {
            Entry::Message(m) => assert!(m.comment.is_none()),
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_multiline_comment_merges() {
        let source = "# line one\n# line two\nm = x";
        let resource = parse(source);
        let m = single_message(&resource);
        assert_eq!(
            m.comment.as_ref().map(|c| c.content.as_str()),
            Some("line one\nline two")
        );
    }

    #[test]
    fn test_indented_entry_is_junk_with_column_rule() {
        let resource = parse("  oops = indented");
        let junk: Vec<_> = resource.junk().collect();
        assert_eq!(junk.len(), 1);
        assert_eq!(junk[0].annotations[0].code, "E3001");
        assert!(junk[0].annotations[0].message.contains("column 1"));
    }

    #[test]
    fn test_junk_recovers_at_next_entry() {
        let source = "== broken ==\nvalid = ok";
        let resource = parse(source);
        assert_eq!(resource.junk().count(), 1);
        assert_eq!(resource.messages().count(), 1);
    }

    #[test]
    fn test_unterminated_string_is_junk() {
        let resource = parse("m = { \"unterminated }");
        let junk: Vec<_> = resource.junk().collect();
        assert_eq!(junk.len(), 1);
        assert_eq!(junk[0].annotations[0].code, "E3003");
    }

    #[test]
    fn test_crlf_normalization() {
        let resource = parse("a = one\r\nb = two\r");
        assert_eq!(resource.messages().count(), 2);
    }

    #[test]
    fn test_number_literals() {
        let resource = parse("m = { 3.14 } and { -7 }");
        let m = single_message(&resource);
        let numbers: Vec<String> = m
            .value
            .as_ref()
            .unwrap()
            .elements
            .iter()
            .filter_map(|el| match el {
                PatternElement::Placeable(pl) => match &pl.expression {
                    Expression::Inline(InlineExpression::NumberLiteral(n)) => Some(n.raw.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec!["3.14", "-7"]);
    }

    #[test]
    fn test_nesting_depth_budget() {
        let mut source = String::from("m = ");
        for _ in 0..40 {
            source.push('{');
            source.push(' ');
        }
        source.push_str("$x");
        for _ in 0..40 {
            source.push(' ');
            source.push('}');
        }
        let parser = Parser::with_config(ParserConfig {
            max_nesting_depth: 10,
            ..ParserConfig::default()
        });
        let resource = parser.parse(&source).unwrap();
        let junk: Vec<_> = resource.junk().collect();
        assert_eq!(junk.len(), 1);
        assert_eq!(junk[0].annotations[0].code, "E3005");
    }

    #[test]
    fn test_parse_error_budget() {
        let mut source = String::new();
        for i in 0..10 {
            // Each line starts like a message but has no `=`, so every
            // line recovers as its own Junk entry.
            let _ = writeln!(source, "bad entry number {i}");
        }
        let parser = Parser::with_config(ParserConfig {
            max_parse_errors: 3,
            ..ParserConfig::default()
        });
        let resource = parser.parse(&source).unwrap();
        let junk: Vec<_> = resource.junk().collect();
        // 3 recovered entries plus the budget-exhausted tail.
        assert_eq!(junk.len(), 4);
        assert_eq!(junk[3].annotations[0].code, "E3006");
    }

    #[test]
    fn test_source_size_rejection() {
        let parser = Parser::with_config(ParserConfig {
            max_source_size: 8,
            ..ParserConfig::default()
        });
        let err = parser.parse("m = too long for the budget").unwrap_err();
        assert!(matches!(err, ParserError::SourceTooLarge { .. }));

        // The convenience front-end never fails.
        let resource = parse("m = fine");
        assert_eq!(resource.messages().count(), 1);
    }

    #[test]
    fn test_spans_are_code_points() {
        // é is one code point; spans count code points, not bytes.
        let resource = parse("m = é{ $x }");
        let m = single_message(&resource);
        match &m.value.as_ref().unwrap().elements[1] {
            PatternElement::Placeable(pl) => {
                let span = pl.span.unwrap();
                assert_eq!(span.start, 5);
            }
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }

    #[test]
    fn test_message_without_value_or_attributes_is_junk() {
        let resource = parse("empty =\nnext = ok");
        assert_eq!(resource.junk().count(), 1);
        assert_eq!(resource.messages().count(), 1);
    }

    #[test]
    fn test_nested_placeable() {
        let resource = parse("m = { { $x } }");
        let m = single_message(&resource);
        match &m.value.as_ref().unwrap().elements[0] {
            PatternElement::Placeable(pl) => match &pl.expression {
                Expression::Inline(InlineExpression::Placeable(_)) => {}
                other => panic!("Expected nested Placeable, got {other:?}"),
            },
            other => panic!("Expected Placeable, got {other:?}"),
        }
    }
}
