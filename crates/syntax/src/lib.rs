//! Syntax layer for the FTL translation language
//!
//! Provides the immutable AST, a total recursive-descent parser (malformed
//! input becomes recoverable `Junk`, never an error), a validating
//! serializer that inverts the parser on well-formed trees, and
//! introspection utilities (variable/reference/function extraction and a
//! dependency graph with cycle detection).
//!
//! ```
//! use ftl_syntax::parser::parse;
//! use ftl_syntax::serializer::serialize;
//!
//! let resource = parse("hello = Hello, { $name }!");
//! assert_eq!(resource.messages().count(), 1);
//! let text = serialize(&resource).unwrap();
//! assert_eq!(parse(&text).strip_spans(), resource.strip_spans());
//! ```

pub mod ast;
pub mod introspect;
pub mod parser;
pub mod serializer;
pub mod validate;

pub use ast::{Entry, Message, Pattern, Resource, Span, Term};
pub use parser::{parse, Parser, ParserConfig, ParserError};
pub use serializer::{serialize, Serializer, SerializerError, SerializerOptions};
pub use validate::{validate_resource, KnownIds, ValidationIssue};
