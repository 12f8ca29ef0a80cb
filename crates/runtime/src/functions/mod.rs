//! Function registry
//!
//! Custom formatters are registered under uppercase FTL names. FTL named
//! arguments arrive in camelCase; each registration declares its
//! implementation parameter names (snake_case) and gets a translation
//! table built up front. Functions may opt into locale injection, in which
//! case the bundle's locale arrives in the call context. A frozen registry
//! is shared safely; mutation requires an unfrozen copy.

pub mod registry;
pub mod types;

mod builtins;

pub use registry::{default_registry, FunctionRegistry, RegistryError};
pub use types::{
    camel_to_snake, snake_to_camel, FluentDateTime, FluentFunction, FunctionContext,
    FunctionEntry, FunctionError, FunctionSignature, NamedArgs,
};
