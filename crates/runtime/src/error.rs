//! Formatting errors as data
//!
//! Resolver failures are collected, not thrown. Each `FluentError` is
//! immutable and content-addressed: a BLAKE2b-128 hash over every field,
//! computed at construction, stable for the value's lifetime. The cache
//! re-verifies these hashes on every read, so the encoding length-prefixes
//! variable fields and writes sentinel bytes for absent ones: `("ab","c")`
//! and `("a","bc")` must not collide, and `None` must differ from `""`.

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use serde::Serialize;

type Blake2b128 = Blake2b<U16>;

/// Error taxonomy. Codes are partitioned by category in disjoint ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Missing message, term, attribute, variable, or function (1000-1999)
    Reference,
    /// Cycles, exhausted budgets, function failures, type mismatches (2000-2999)
    Resolution,
    /// Parser-detected problems carried out of Junk annotations (3000-3999)
    Syntax,
    /// Locale and input parsing problems (4000-4999)
    Parsing,
    /// Output assembly problems (2000 range shares resolution semantics)
    Formatting,
    /// Structural validation findings (5000-5999)
    Validation,
}

impl ErrorCategory {
    fn tag(&self) -> u8 {
        match self {
            ErrorCategory::Reference => 1,
            ErrorCategory::Resolution => 2,
            ErrorCategory::Syntax => 3,
            ErrorCategory::Parsing => 4,
            ErrorCategory::Formatting => 5,
            ErrorCategory::Validation => 6,
        }
    }
}

/// Deterministic error codes, partitioned by category
pub mod codes {
    pub const UNKNOWN_MESSAGE: u16 = 1001;
    pub const UNKNOWN_TERM: u16 = 1002;
    pub const UNKNOWN_VARIABLE: u16 = 1003;
    pub const UNKNOWN_ATTRIBUTE: u16 = 1004;
    pub const UNKNOWN_FUNCTION: u16 = 1005;
    pub const NO_VALUE: u16 = 1006;

    pub const CYCLIC_REFERENCE: u16 = 2001;
    pub const TOO_DEEP: u16 = 2002;
    pub const EXPANSION_LIMIT: u16 = 2003;
    pub const FUNCTION_FAILED: u16 = 2004;
    pub const TYPE_MISMATCH: u16 = 2005;
    pub const REENTRY_LIMIT: u16 = 2006;

    pub const SYNTAX_JUNK: u16 = 3000;

    pub const INVALID_LOCALE: u16 = 4001;

    pub const VALIDATION_BASE: u16 = 5000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Structured detail attached to an error
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Diagnostic {
    /// Deterministic code, e.g. 1003 for an unknown variable
    pub code: u16,
    pub severity: Option<Severity>,
    /// Half-open code-point span in the source pattern, when known
    pub span: Option<(usize, usize)>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub hint: Option<String>,
    pub help_url: Option<String>,
    pub function_name: Option<String>,
    pub argument_name: Option<String>,
    pub expected_type: Option<String>,
    pub received_type: Option<String>,
    /// The reference chain for cycle reports, e.g. `msg:a -> msg:b`
    pub resolution_path: Option<String>,
}

impl Diagnostic {
    pub fn new(code: u16) -> Self {
        Diagnostic {
            code,
            severity: Some(Severity::Error),
            ..Diagnostic::default()
        }
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>) -> Self {
        self.argument_name = Some(name.into());
        self
    }

    pub fn types(mut self, expected: impl Into<String>, received: impl Into<String>) -> Self {
        self.expected_type = Some(expected.into());
        self.received_type = Some(received.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.resolution_path = Some(path.into());
        self
    }

    pub fn at(mut self, span: (usize, usize)) -> Self {
        self.span = Some(span);
        self
    }
}

/// An immutable, content-addressed formatting error.
///
/// Fields are private; accessors only. The hash is computed once in the
/// constructor and covers every field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{}] {}", self.code(), self.message)]
pub struct FluentError {
    message: String,
    category: ErrorCategory,
    diagnostic: Option<Diagnostic>,
    /// Source excerpt for parser-derived errors
    parse_context: Option<String>,
    hash: [u8; 16],
}

impl FluentError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::build(category, message.into(), None, None)
    }

    pub fn with_diagnostic(
        category: ErrorCategory,
        message: impl Into<String>,
        diagnostic: Diagnostic,
    ) -> Self {
        Self::build(category, message.into(), Some(diagnostic), None)
    }

    pub fn with_parse_context(
        category: ErrorCategory,
        message: impl Into<String>,
        diagnostic: Diagnostic,
        parse_context: impl Into<String>,
    ) -> Self {
        Self::build(
            category,
            message.into(),
            Some(diagnostic),
            Some(parse_context.into()),
        )
    }

    fn build(
        category: ErrorCategory,
        message: String,
        diagnostic: Option<Diagnostic>,
        parse_context: Option<String>,
    ) -> Self {
        let hash = content_hash(&category, &message, diagnostic.as_ref(), parse_context.as_deref());
        FluentError {
            message,
            category,
            diagnostic,
            parse_context,
            hash,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    pub fn parse_context(&self) -> Option<&str> {
        self.parse_context.as_deref()
    }

    /// Code from the diagnostic, or the category's base range
    pub fn code(&self) -> u16 {
        self.diagnostic.as_ref().map(|d| d.code).unwrap_or(match self.category {
            ErrorCategory::Reference => 1000,
            ErrorCategory::Resolution => 2000,
            ErrorCategory::Syntax => 3000,
            ErrorCategory::Parsing => 4000,
            ErrorCategory::Formatting => 2000,
            ErrorCategory::Validation => 5000,
        })
    }

    /// The 16-byte content hash assigned at construction
    pub fn content_hash(&self) -> &[u8; 16] {
        &self.hash
    }

    /// Recompute the hash and compare; false means the value was corrupted
    /// through unsafe aliasing or a bad deserialization.
    pub fn verify_hash(&self) -> bool {
        content_hash(
            &self.category,
            &self.message,
            self.diagnostic.as_ref(),
            self.parse_context.as_deref(),
        ) == self.hash
    }
}

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

fn feed_bytes(hasher: &mut Blake2b128, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_be_bytes());
    hasher.update(bytes);
}

fn feed_opt_str(hasher: &mut Blake2b128, value: Option<&str>) {
    match value {
        None => hasher.update([ABSENT]),
        Some(s) => {
            hasher.update([PRESENT]);
            feed_bytes(hasher, s.as_bytes());
        }
    }
}

fn feed_opt_u64(hasher: &mut Blake2b128, value: Option<u64>) {
    match value {
        None => hasher.update([ABSENT]),
        Some(v) => {
            hasher.update([PRESENT]);
            hasher.update(v.to_be_bytes());
        }
    }
}

fn content_hash(
    category: &ErrorCategory,
    message: &str,
    diagnostic: Option<&Diagnostic>,
    parse_context: Option<&str>,
) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    hasher.update([category.tag()]);
    feed_bytes(&mut hasher, message.as_bytes());
    match diagnostic {
        None => hasher.update([ABSENT]),
        Some(d) => {
            hasher.update([PRESENT]);
            hasher.update(d.code.to_be_bytes());
            feed_opt_u64(
                &mut hasher,
                d.severity.map(|s| match s {
                    Severity::Error => 0,
                    Severity::Warning => 1,
                }),
            );
            match d.span {
                None => hasher.update([ABSENT]),
                Some((start, end)) => {
                    hasher.update([PRESENT]);
                    hasher.update((start as u64).to_be_bytes());
                    hasher.update((end as u64).to_be_bytes());
                }
            }
            feed_opt_u64(&mut hasher, d.line.map(|v| v as u64));
            feed_opt_u64(&mut hasher, d.column.map(|v| v as u64));
            feed_opt_str(&mut hasher, d.hint.as_deref());
            feed_opt_str(&mut hasher, d.help_url.as_deref());
            feed_opt_str(&mut hasher, d.function_name.as_deref());
            feed_opt_str(&mut hasher, d.argument_name.as_deref());
            feed_opt_str(&mut hasher, d.expected_type.as_deref());
            feed_opt_str(&mut hasher, d.received_type.as_deref());
            feed_opt_str(&mut hasher, d.resolution_path.as_deref());
        }
    }
    feed_opt_str(&mut hasher, parse_context);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let e = FluentError::new(ErrorCategory::Reference, "unknown variable `$x`");
        assert!(e.verify_hash());
        let again = FluentError::new(ErrorCategory::Reference, "unknown variable `$x`");
        assert_eq!(e.content_hash(), again.content_hash());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = FluentError::new(ErrorCategory::Reference, "m");
        let other_category = FluentError::new(ErrorCategory::Resolution, "m");
        assert_ne!(base.content_hash(), other_category.content_hash());

        let with_diag = FluentError::with_diagnostic(
            ErrorCategory::Reference,
            "m",
            Diagnostic::new(codes::UNKNOWN_VARIABLE),
        );
        assert_ne!(base.content_hash(), with_diag.content_hash());

        let with_hint = FluentError::with_diagnostic(
            ErrorCategory::Reference,
            "m",
            Diagnostic::new(codes::UNKNOWN_VARIABLE).hint("pass the variable"),
        );
        assert_ne!(with_diag.content_hash(), with_hint.content_hash());
    }

    #[test]
    fn test_none_differs_from_empty() {
        let none = FluentError::with_diagnostic(
            ErrorCategory::Reference,
            "m",
            Diagnostic::new(codes::UNKNOWN_VARIABLE),
        );
        let empty = FluentError::with_diagnostic(
            ErrorCategory::Reference,
            "m",
            Diagnostic::new(codes::UNKNOWN_VARIABLE).hint(""),
        );
        assert_ne!(none.content_hash(), empty.content_hash());
    }

    #[test]
    fn test_length_prefix_defeats_concatenation() {
        // Shift a character across the field boundary; the hash must move.
        let a = FluentError::with_parse_context(
            ErrorCategory::Syntax,
            "ab",
            Diagnostic::new(codes::SYNTAX_JUNK),
            "c",
        );
        let b = FluentError::with_parse_context(
            ErrorCategory::Syntax,
            "a",
            Diagnostic::new(codes::SYNTAX_JUNK),
            "bc",
        );
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_display_carries_code() {
        let e = FluentError::with_diagnostic(
            ErrorCategory::Reference,
            "unknown variable `$x`",
            Diagnostic::new(codes::UNKNOWN_VARIABLE),
        );
        assert_eq!(e.to_string(), "[1003] unknown variable `$x`");
    }
}
