//! The registry itself: name-keyed entries, freeze/copy semantics, and
//! the shared frozen default with the builtins preregistered

use super::builtins;
use super::types::{
    normalize_param, snake_to_camel, FluentFunction, FunctionContext, FunctionEntry,
    FunctionError, FunctionSignature, NamedArgs,
};
use crate::value::FluentValue;
use ftl_syntax::parser::is_function_name;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Registration-time problems
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is frozen; obtain a mutable copy with `copy_unfrozen`")]
    Frozen,

    #[error("`{0}` is not a valid FTL function name")]
    InvalidName(String),

    #[error("parameters `{first}` and `{second}` collide after underscore normalization")]
    CasingCollision { first: String, second: String },

    #[error("locale-injected function `{0}` must declare at least one parameter")]
    SignatureInvalid(String),
}

/// Registry mapping uppercase FTL names to functions
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, FunctionEntry>,
    frozen: bool,
}

impl FunctionRegistry {
    /// An empty, mutable registry
    pub fn new() -> Self {
        FunctionRegistry::default()
    }

    /// A mutable copy of the shared default registry (NUMBER, DATETIME,
    /// CURRENCY preregistered)
    pub fn with_defaults() -> Self {
        default_registry().copy_unfrozen()
    }

    /// Register `callable` under `name` (uppercased). `params` declares the
    /// implementation's snake_case parameter names; the casing table is
    /// derived from them. `inject_locale` requests the bundle locale in the
    /// call context and requires a non-empty parameter list.
    pub fn register<F>(
        &mut self,
        name: &str,
        params: &[&str],
        inject_locale: bool,
        callable: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[FluentValue], &NamedArgs, &FunctionContext) -> Result<FluentValue, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        if self.frozen {
            return Err(RegistryError::Frozen);
        }
        let ftl_name = name.to_ascii_uppercase();
        if !is_function_name(&ftl_name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if inject_locale && params.is_empty() {
            return Err(RegistryError::SignatureInvalid(ftl_name));
        }

        let mut arg_casing = HashMap::new();
        let mut normalized: HashMap<String, String> = HashMap::new();
        for param in params {
            let norm = normalize_param(param);
            if let Some(first) = normalized.get(&norm) {
                return Err(RegistryError::CasingCollision {
                    first: first.clone(),
                    second: (*param).to_string(),
                });
            }
            normalized.insert(norm, (*param).to_string());
            arg_casing.insert(snake_to_camel(param), (*param).to_string());
        }

        let signature = FunctionSignature {
            ftl_name: ftl_name.clone(),
            params: params.iter().map(|p| p.to_string()).collect(),
            arg_casing,
            inject_locale,
        };
        let callable: FluentFunction = Arc::new(callable);
        self.entries
            .insert(ftl_name, FunctionEntry::new(signature, callable));
        Ok(())
    }

    pub fn get(&self, ftl_name: &str) -> Option<&FunctionEntry> {
        self.entries.get(ftl_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make the registry immutable for safe sharing
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mutable clone; the original stays frozen
    pub fn copy_unfrozen(&self) -> Self {
        FunctionRegistry {
            entries: self.entries.clone(),
            frozen: false,
        }
    }
}

/// The process-wide frozen registry with the builtins preregistered.
/// Consumers wanting to customize take [`FunctionRegistry::with_defaults`].
pub fn default_registry() -> &'static FunctionRegistry {
    static DEFAULT: OnceLock<FunctionRegistry> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        let mut registry = FunctionRegistry::new();
        registry
            .register(
                "NUMBER",
                &[
                    "value",
                    "minimum_fraction_digits",
                    "maximum_fraction_digits",
                    "use_grouping",
                ],
                false,
                builtins::number,
            )
            .expect("builtin NUMBER registration");
        registry
            .register(
                "DATETIME",
                &["value", "date_style", "time_style"],
                true,
                builtins::datetime,
            )
            .expect("builtin DATETIME registration");
        registry
            .register(
                "CURRENCY",
                &["value", "currency", "minimum_fraction_digits"],
                true,
                builtins::currency,
            )
            .expect("builtin CURRENCY registration");
        registry.freeze();
        registry
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_is_frozen_with_builtins() {
        let reg = default_registry();
        assert!(reg.is_frozen());
        assert!(reg.get("NUMBER").is_some());
        assert!(reg.get("DATETIME").is_some());
        assert!(reg.get("CURRENCY").is_some());
    }

    #[test]
    fn test_frozen_rejects_registration() {
        let mut reg = default_registry().clone();
        let err = reg
            .register("X", &[], false, |_, _, _| Ok(FluentValue::Null))
            .unwrap_err();
        assert_eq!(err, RegistryError::Frozen);
    }

    #[test]
    fn test_copy_unfrozen_allows_customization() {
        let mut reg = FunctionRegistry::with_defaults();
        assert!(!reg.is_frozen());
        reg.register("STRLEN", &["value"], false, |positional, _, _| {
            match positional.first() {
                Some(FluentValue::Str(s)) => Ok(FluentValue::Int(s.chars().count() as i64)),
                _ => Err(FunctionError::new("STRLEN takes a string")),
            }
        })
        .unwrap();
        assert!(reg.get("STRLEN").is_some());
        // The shared default is untouched.
        assert!(default_registry().get("STRLEN").is_none());
    }

    #[test]
    fn test_name_uppercased_and_validated() {
        let mut reg = FunctionRegistry::new();
        reg.register("hello", &[], false, |_, _, _| Ok(FluentValue::Null))
            .unwrap();
        assert!(reg.get("HELLO").is_some());
        assert!(matches!(
            reg.register("9BAD", &[], false, |_, _, _| Ok(FluentValue::Null)),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_casing_collision_rejected() {
        let mut reg = FunctionRegistry::new();
        let err = reg
            .register("F", &["value", "_value"], false, |_, _, _| {
                Ok(FluentValue::Null)
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::CasingCollision { .. }));
    }

    #[test]
    fn test_locale_injection_requires_params() {
        let mut reg = FunctionRegistry::new();
        assert!(matches!(
            reg.register("L", &[], true, |_, _, _| Ok(FluentValue::Null)),
            Err(RegistryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_locale_injected_only_when_opted_in() {
        let mut reg = FunctionRegistry::new();
        reg.register("ECHO", &["value"], true, |_, _, ctx| {
            Ok(FluentValue::Str(ctx.locale.clone().unwrap_or_default()))
        })
        .unwrap();
        reg.register("PLAIN", &["value"], false, |_, _, ctx| {
            assert!(ctx.locale.is_none());
            Ok(FluentValue::Null)
        })
        .unwrap();

        let echo = reg.get("ECHO").unwrap();
        let result = echo.invoke(&[], &NamedArgs::new(), "pl").unwrap();
        assert_eq!(result, FluentValue::Str("pl".into()));
        reg.get("PLAIN")
            .unwrap()
            .invoke(&[], &NamedArgs::new(), "pl")
            .unwrap();
    }

    #[test]
    fn test_panicking_function_becomes_error() {
        let mut reg = FunctionRegistry::new();
        reg.register("BOOM", &["value"], false, |_, _, _| -> Result<FluentValue, FunctionError> {
            panic!("boom")
        })
        .unwrap();
        let err = reg
            .get("BOOM")
            .unwrap()
            .invoke(&[], &NamedArgs::new(), "en")
            .unwrap_err();
        assert!(err.message.contains("panicked"));
    }
}
