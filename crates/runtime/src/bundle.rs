//! Bundle: the user-facing coordinator
//!
//! Owns the message/term registries and the function registry behind a
//! reentrant readers-writer lock, the optional integrity cache, the
//! security limits, and the strict-vs-lenient failure policy. Parsing
//! happens outside the lock; registration inside the write lock; the
//! format path holds a read lock so user functions may re-enter.

use crate::cache::{fingerprint, CacheConfig, CacheError, CacheStats, IntegrityCache, WriteLogEntry};
use crate::error::{codes, Diagnostic, ErrorCategory, FluentError};
use crate::functions::{
    FunctionContext, FunctionError, FunctionRegistry, NamedArgs, RegistryError,
};
use crate::plurals::is_valid_locale;
use crate::resolver::{resolve_message, ResolveOutput, Snapshot};
use crate::rwlock::{LockError, ReentrantRwLock};
use crate::value::{FluentArgs, FluentValue};
use ftl_syntax::ast::{Entry, Message, Term};
use ftl_syntax::introspect::{
    self, DependencyGraph, FunctionUse, ReferenceUse, VariableUse,
};
use ftl_syntax::parser::{Parser, ParserConfig, ParserError};
use ftl_syntax::validate::{validate_resource, KnownIds, ValidationIssue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Security limits enforced per bundle
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_source_size: usize,
    pub max_nesting_depth: usize,
    pub max_expansion_size: usize,
    pub max_parse_errors: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_source_size: 10_000_000,
            max_nesting_depth: 100,
            max_expansion_size: 1_000_000,
            max_parse_errors: 100,
        }
    }
}

/// Bundle construction options
#[derive(Debug, Default)]
pub struct BundleConfig {
    pub locale: String,
    /// Wrap interpolations in U+2068/U+2069
    pub use_isolating: bool,
    /// Surface the first error of a format call as a failure
    pub strict: bool,
    pub limits: Limits,
    /// `None` disables caching entirely
    pub cache: Option<CacheConfig>,
    /// `None` takes a mutable copy of the shared default registry
    pub functions: Option<FunctionRegistry>,
}

impl BundleConfig {
    pub fn new(locale: impl Into<String>) -> Self {
        BundleConfig {
            locale: locale.into(),
            use_isolating: true,
            strict: true,
            limits: Limits::default(),
            cache: None,
            functions: None,
        }
    }
}

/// Bundle-level failures
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("invalid locale `{0}`")]
    InvalidLocale(String),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("resource rejected: {junk_count} junk entries, first: {first}")]
    JunkRejected { junk_count: usize, first: String },

    #[error("formatting failed: {0}")]
    Format(FluentError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Outcome of a lenient format call
#[derive(Debug, Clone, PartialEq)]
pub struct FormatResult {
    pub value: String,
    pub errors: Vec<FluentError>,
}

/// Value plus all attributes of one message
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundResult {
    pub value: Option<FormatResult>,
    pub attributes: BTreeMap<String, FormatResult>,
}

/// Registration report from `add_resource`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    pub messages: usize,
    pub terms: usize,
    pub junk: usize,
}

#[derive(Debug, Default)]
struct Registries {
    messages: HashMap<String, Arc<Message>>,
    terms: HashMap<String, Arc<Term>>,
    functions: FunctionRegistry,
}

/// A collection of messages for one locale
#[derive(Debug)]
pub struct Bundle {
    locale: String,
    use_isolating: bool,
    strict: bool,
    limits: Limits,
    registries: ReentrantRwLock<Registries>,
    cache: Option<IntegrityCache>,
}

impl Bundle {
    /// Bundle with default configuration (strict, isolating, no cache)
    pub fn new(locale: impl Into<String>) -> Result<Self, BundleError> {
        Bundle::with_config(BundleConfig::new(locale))
    }

    pub fn with_config(config: BundleConfig) -> Result<Self, BundleError> {
        if !is_valid_locale(&config.locale) {
            return Err(BundleError::InvalidLocale(config.locale));
        }
        let functions = config
            .functions
            .unwrap_or_else(FunctionRegistry::with_defaults);
        Ok(Bundle {
            locale: config.locale,
            use_isolating: config.use_isolating,
            strict: config.strict,
            limits: config.limits,
            registries: ReentrantRwLock::new(Registries {
                messages: HashMap::new(),
                terms: HashMap::new(),
                functions,
            }),
            cache: config.cache.map(IntegrityCache::new),
        })
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn parser(&self) -> Parser {
        Parser::with_config(ParserConfig {
            max_source_size: self.limits.max_source_size,
            max_nesting_depth: self.limits.max_nesting_depth,
            max_parse_errors: self.limits.max_parse_errors,
        })
    }

    /// Parse and register a resource.
    ///
    /// Parsing runs before the write lock is taken. Entries override
    /// earlier registrations with the same id. Registration invalidates
    /// the cache. In strict mode a resource containing Junk is rejected
    /// whole.
    pub fn add_resource(&self, source: &str) -> Result<AddReport, BundleError> {
        let resource = self.parser().parse(source)?;

        let junk: Vec<String> = resource
            .junk()
            .map(|j| {
                j.annotations
                    .first()
                    .map(|a| format!("{}: {}", a.code, a.message))
                    .unwrap_or_else(|| "unparseable entry".to_string())
            })
            .collect();
        if self.strict && !junk.is_empty() {
            return Err(BundleError::JunkRejected {
                junk_count: junk.len(),
                first: junk[0].clone(),
            });
        }

        let mut report = AddReport {
            junk: junk.len(),
            ..AddReport::default()
        };
        {
            let mut registries = self.registries.write(None)?;
            for entry in resource.body {
                match entry {
                    Entry::Message(m) => {
                        registries
                            .messages
                            .insert(m.id.name.clone(), Arc::new(m));
                        report.messages += 1;
                    }
                    Entry::Term(t) => {
                        registries.terms.insert(t.id.name.clone(), Arc::new(t));
                        report.terms += 1;
                    }
                    _ => {}
                }
            }
        }
        self.invalidate_cache()?;
        Ok(report)
    }

    /// Register a custom function. A frozen registry is replaced by a
    /// mutable copy first (copy-on-write), so shared defaults stay shared.
    pub fn add_function<F>(
        &self,
        name: &str,
        params: &[&str],
        inject_locale: bool,
        callable: F,
    ) -> Result<(), BundleError>
    where
        F: Fn(&[FluentValue], &NamedArgs, &FunctionContext) -> Result<FluentValue, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        {
            let mut registries = self.registries.write(None)?;
            if registries.functions.is_frozen() {
                registries.functions = registries.functions.copy_unfrozen();
            }
            registries
                .functions
                .register(name, params, inject_locale, callable)?;
        }
        self.invalidate_cache()?;
        Ok(())
    }

    fn invalidate_cache(&self) -> Result<(), BundleError> {
        if let Some(cache) = &self.cache {
            cache.clear()?;
        }
        Ok(())
    }

    pub fn has_message(&self, id: &str) -> bool {
        self.registries
            .read(None)
            .map(|r| r.messages.contains_key(id))
            .unwrap_or(false)
    }

    pub fn has_term(&self, id: &str) -> bool {
        self.registries
            .read(None)
            .map(|r| r.terms.contains_key(id))
            .unwrap_or(false)
    }

    /// Registered message ids, sorted
    pub fn message_ids(&self) -> Vec<String> {
        match self.registries.read(None) {
            Ok(r) => {
                let mut ids: Vec<String> = r.messages.keys().cloned().collect();
                ids.sort();
                ids
            }
            Err(_) => Vec::new(),
        }
    }

    /// Format a message's value
    pub fn format_value(&self, id: &str, args: &FluentArgs) -> Result<FormatResult, BundleError> {
        self.format_message(id, args, None)
    }

    /// Format a message's value or one attribute.
    ///
    /// Read-locked fast path with cache lookup. Strict bundles raise the
    /// first collected error; the failure is cached so a subsequent hit
    /// re-raises without re-resolving. Lenient bundles always return
    /// `(value, errors)`.
    pub fn format_message(
        &self,
        id: &str,
        args: &FluentArgs,
        attribute: Option<&str>,
    ) -> Result<FormatResult, BundleError> {
        let key = self
            .cache
            .as_ref()
            .map(|_| fingerprint(id, attribute, args, &self.locale, self.use_isolating));

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(entry) = cache.get(key)? {
                let result = FormatResult {
                    value: entry.formatted,
                    errors: entry.errors,
                };
                return self.apply_policy(result);
            }
        }

        let output = self.resolve_uncached(id, args, attribute)?;
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            cache.put(key, output.value.clone(), output.errors.clone())?;
        }
        self.apply_policy(FormatResult {
            value: output.value,
            errors: output.errors,
        })
    }

    fn resolve_uncached(
        &self,
        id: &str,
        args: &FluentArgs,
        attribute: Option<&str>,
    ) -> Result<ResolveOutput, BundleError> {
        let registries = self.registries.read(None)?;
        let Some(message) = registries.messages.get(id).cloned() else {
            let reference = match attribute {
                Some(attr) => format!("{id}.{attr}"),
                None => id.to_string(),
            };
            let error = FluentError::with_diagnostic(
                ErrorCategory::Reference,
                format!("unknown message `{id}`"),
                Diagnostic::new(codes::UNKNOWN_MESSAGE)
                    .hint(format!("no message `{id}` is registered in this bundle")),
            );
            return Ok(ResolveOutput {
                value: format!("{{{reference}}}"),
                errors: vec![error],
            });
        };

        let env = Snapshot {
            messages: &registries.messages,
            terms: &registries.terms,
            functions: &registries.functions,
            locale: &self.locale,
            use_isolating: self.use_isolating,
            max_nesting_depth: self.limits.max_nesting_depth,
            max_expansion_size: self.limits.max_expansion_size,
        };
        Ok(resolve_message(&env, &message, args, attribute))
    }

    fn apply_policy(&self, result: FormatResult) -> Result<FormatResult, BundleError> {
        if self.strict {
            if let Some(first) = result.errors.first() {
                return Err(BundleError::Format(first.clone()));
            }
        }
        Ok(result)
    }

    /// Format a message's value and all of its attributes
    pub fn format_compound(
        &self,
        id: &str,
        args: &FluentArgs,
    ) -> Result<CompoundResult, BundleError> {
        let (has_value, attribute_names): (bool, Vec<String>) = {
            let registries = self.registries.read(None)?;
            match registries.messages.get(id) {
                Some(m) => (
                    m.value.is_some(),
                    m.attributes.iter().map(|a| a.id.name.clone()).collect(),
                ),
                // Let the format path produce the unknown-message outcome.
                None => (true, Vec::new()),
            }
        };

        let value = if has_value {
            Some(self.format_message(id, args, None)?)
        } else {
            None
        };

        let mut attributes = BTreeMap::new();
        for name in attribute_names {
            let formatted = self.format_message(id, args, Some(&name))?;
            attributes.insert(name, formatted);
        }
        Ok(CompoundResult { value, attributes })
    }

    /// Drop all cached format results; counters and audit trail survive
    pub fn clear_cache(&self) -> Result<(), BundleError> {
        self.invalidate_cache()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn cache_audit_log(&self) -> Option<Vec<WriteLogEntry>> {
        self.cache.as_ref().map(|c| c.audit_log())
    }

    #[doc(hidden)]
    pub fn cache(&self) -> Option<&IntegrityCache> {
        self.cache.as_ref()
    }

    /// Stateless validation of a source text against this bundle's
    /// registries: references satisfied by already-registered entries are
    /// not reported.
    pub fn validate(&self, source: &str) -> Result<Vec<ValidationIssue>, BundleError> {
        let resource = self.parser().parse(source)?;
        let known = {
            let registries = self.registries.read(None)?;
            KnownIds {
                messages: registries.messages.keys().cloned().collect(),
                terms: registries.terms.keys().cloned().collect(),
            }
        };
        Ok(validate_resource(&resource, &known))
    }

    /// Variables referenced by a registered message
    pub fn message_variables(&self, id: &str) -> Result<Option<Vec<VariableUse>>, BundleError> {
        let registries = self.registries.read(None)?;
        Ok(registries
            .messages
            .get(id)
            .map(|m| introspect::message_variables(m)))
    }

    /// Message/term references made by a registered message
    pub fn message_references(&self, id: &str) -> Result<Option<Vec<ReferenceUse>>, BundleError> {
        let registries = self.registries.read(None)?;
        Ok(registries
            .messages
            .get(id)
            .map(|m| introspect::message_references(m)))
    }

    /// Function call sites in a registered message
    pub fn message_functions(&self, id: &str) -> Result<Option<Vec<FunctionUse>>, BundleError> {
        let registries = self.registries.read(None)?;
        Ok(registries
            .messages
            .get(id)
            .map(|m| introspect::message_functions(m)))
    }

    /// Dependency graph over every registered message and term
    pub fn dependency_graph(&self) -> Result<DependencyGraph, BundleError> {
        let registries = self.registries.read(None)?;
        let mut graph = DependencyGraph::new();
        for message in registries.messages.values() {
            graph.add_message(message);
        }
        for term in registries.terms.values() {
            graph.add_term(term);
        }
        Ok(graph)
    }

    /// All reference cycles among registered entries
    pub fn find_cycles(&self) -> Result<Vec<Vec<String>>, BundleError> {
        Ok(self.dependency_graph()?.find_cycles())
    }
}
