//! Core registry data structures: signatures, entries, and the casing
//! translation between FTL camelCase and implementation snake_case

use crate::value::FluentValue;
use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Named arguments after casing translation (snake_case keys)
pub type NamedArgs = BTreeMap<String, FluentValue>;

/// Failure inside a function implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        FunctionError {
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: &str, received: &str) -> Self {
        FunctionError::new(format!("expected {expected}, got {received}"))
    }
}

/// Call-time environment handed to every function
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    /// The bundle's locale; populated only for functions registered with
    /// locale injection
    pub locale: Option<String>,
}

/// The callable shape all registered functions share
pub type FluentFunction = Arc<
    dyn Fn(&[FluentValue], &NamedArgs, &FunctionContext) -> Result<FluentValue, FunctionError>
        + Send
        + Sync,
>;

/// Metadata describing one registered function
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    /// Uppercase name used in FTL source
    pub ftl_name: String,
    /// Implementation parameter names, snake_case
    pub params: Vec<String>,
    /// camelCase FTL key -> snake_case implementation key
    pub arg_casing: HashMap<String, String>,
    /// Whether the bundle locale is injected into the call context
    pub inject_locale: bool,
}

/// A registered function: signature plus callable
#[derive(Clone)]
pub struct FunctionEntry {
    pub signature: FunctionSignature,
    callable: FluentFunction,
}

impl std::fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl FunctionEntry {
    pub(crate) fn new(signature: FunctionSignature, callable: FluentFunction) -> Self {
        FunctionEntry {
            signature,
            callable,
        }
    }

    /// Invoke with panic isolation: a panicking user function becomes a
    /// `FunctionError`, never a crash of the formatting call.
    pub fn invoke(
        &self,
        positional: &[FluentValue],
        named: &NamedArgs,
        locale: &str,
    ) -> Result<FluentValue, FunctionError> {
        let context = FunctionContext {
            locale: self
                .signature
                .inject_locale
                .then(|| locale.to_string()),
        };
        match catch_unwind(AssertUnwindSafe(|| {
            (self.callable)(positional, named, &context)
        })) {
            Ok(result) => result,
            Err(_) => Err(FunctionError::new(format!(
                "function `{}` panicked",
                self.signature.ftl_name
            ))),
        }
    }

    /// Translate FTL camelCase keys to the implementation's snake_case
    pub fn translate_named(&self, ftl_named: BTreeMap<String, FluentValue>) -> NamedArgs {
        ftl_named
            .into_iter()
            .map(|(key, value)| {
                let impl_key = self
                    .signature
                    .arg_casing
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| camel_to_snake(&key));
                (impl_key, value)
            })
            .collect()
    }
}

/// `maximumFractionDigits` -> `maximum_fraction_digits`
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `maximum_fraction_digits` -> `maximumFractionDigits`
pub fn snake_to_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Collision form: underscores removed, lowercased. `_value` and `value`
/// normalize identically and therefore cannot coexist as parameters.
pub(crate) fn normalize_param(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Alias for callers building datetime argument values
pub type FluentDateTime = DateTime<FixedOffset>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::registry::default_registry;

    #[test]
    fn test_casing_conversions() {
        assert_eq!(camel_to_snake("maximumFractionDigits"), "maximum_fraction_digits");
        assert_eq!(snake_to_camel("maximum_fraction_digits"), "maximumFractionDigits");
        assert_eq!(snake_to_camel("value"), "value");
        assert_eq!(camel_to_snake("useGrouping"), "use_grouping");
    }

    #[test]
    fn test_normalize_param_collisions() {
        assert_eq!(normalize_param("_value"), normalize_param("value"));
        assert_ne!(normalize_param("min_digits"), normalize_param("max_digits"));
    }

    #[test]
    fn test_translate_named() {
        let reg = default_registry();
        let number = reg.get("NUMBER").unwrap();
        let mut ftl = BTreeMap::new();
        ftl.insert("maximumFractionDigits".to_string(), FluentValue::Int(2));
        ftl.insert("unknownOption".to_string(), FluentValue::Int(1));
        let named = number.translate_named(ftl);
        assert!(named.contains_key("maximum_fraction_digits"));
        assert!(named.contains_key("unknown_option"));
    }
}
