//! Localization: the fallback-chain orchestrator
//!
//! Owns an ordered locale chain and composes one bundle per locale,
//! constructed lazily on first access. Formatting walks the chain until a
//! bundle has the requested message, firing the `on_fallback` callback
//! when a non-primary locale satisfies the request. Resource loading goes
//! through the abstract `ResourceLoader` contract and is summarized per
//! locale.

use crate::bundle::{Bundle, BundleConfig, BundleError, Limits};
use crate::cache::CacheConfig;
use crate::error::FluentError;
use crate::loader::{LoaderError, ResourceLoader};
use crate::value::FluentArgs;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Chain-level failures
#[derive(Debug, thiserror::Error)]
pub enum LocalizationError {
    #[error("the locale chain must contain at least one locale")]
    EmptyChain,

    #[error("no locale in the chain provides message `{0}`")]
    MessageNotFound(String),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// Per-locale load breakdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocaleLoad {
    pub locale: String,
    /// Resources parsed and registered
    pub loaded: usize,
    /// Resources the loader had no source for
    pub not_found: usize,
    /// Loader or registration failures
    pub errors: usize,
    /// Junk entries across this locale's loaded resources
    pub junk_entries: usize,
}

/// Aggregated load results across the chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub per_locale: Vec<LocaleLoad>,
}

impl LoadSummary {
    pub fn total_loaded(&self) -> usize {
        self.per_locale.iter().map(|l| l.loaded).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.per_locale.iter().map(|l| l.errors).sum()
    }
}

/// A formatted value plus the locale that provided it
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizedValue {
    pub value: String,
    pub errors: Vec<FluentError>,
    /// The chain member that had the message
    pub locale: String,
}

type FallbackCallback = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Fallback chain over lazily built bundles
pub struct Localization<L: ResourceLoader> {
    locales: Vec<String>,
    resource_ids: Vec<String>,
    loader: L,
    use_isolating: bool,
    limits: Limits,
    cache: Option<CacheConfig>,
    bundles: Mutex<HashMap<String, Arc<Bundle>>>,
    loads: Mutex<HashMap<String, LocaleLoad>>,
    on_fallback: Option<FallbackCallback>,
}

impl<L: ResourceLoader> Localization<L> {
    /// Build a chain. `locales` orders the fallbacks, primary first.
    pub fn new(
        locales: Vec<String>,
        resource_ids: Vec<String>,
        loader: L,
    ) -> Result<Self, LocalizationError> {
        if locales.is_empty() {
            return Err(LocalizationError::EmptyChain);
        }
        Ok(Localization {
            locales,
            resource_ids,
            loader,
            use_isolating: true,
            limits: Limits::default(),
            cache: None,
            bundles: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
            on_fallback: None,
        })
    }

    pub fn with_isolating(mut self, use_isolating: bool) -> Self {
        self.use_isolating = use_isolating;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Invoked as `(requested_locale, resolved_locale, message_id)` when a
    /// non-primary locale satisfies a request
    pub fn with_on_fallback(
        mut self,
        callback: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_fallback = Some(Box::new(callback));
        self
    }

    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    /// The bundle for one chain member, constructing and loading it on
    /// first access. Chain bundles are lenient: per-message errors come
    /// back as data so the chain can keep serving.
    pub fn bundle_for(&self, locale: &str) -> Result<Arc<Bundle>, LocalizationError> {
        if let Some(bundle) = self.bundles.lock().unwrap().get(locale) {
            return Ok(bundle.clone());
        }

        let bundle = Bundle::with_config(BundleConfig {
            locale: locale.to_string(),
            use_isolating: self.use_isolating,
            strict: false,
            limits: self.limits.clone(),
            cache: self.cache.clone(),
            functions: None,
        })?;

        let mut load = LocaleLoad {
            locale: locale.to_string(),
            ..LocaleLoad::default()
        };
        for resource_id in &self.resource_ids {
            match self.loader.load(locale, resource_id) {
                Ok(Some(source)) => match bundle.add_resource(&source) {
                    Ok(report) => {
                        load.loaded += 1;
                        load.junk_entries += report.junk;
                    }
                    Err(e) => {
                        tracing::debug!(
                            locale,
                            resource = resource_id,
                            error = %e,
                            "failed to register resource"
                        );
                        load.errors += 1;
                    }
                },
                Ok(None) => {
                    tracing::debug!(
                        path = %self.loader.describe_path(locale, resource_id),
                        "resource not found for locale"
                    );
                    load.not_found += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        path = %self.loader.describe_path(locale, resource_id),
                        error = %e,
                        "loader error"
                    );
                    load.errors += 1;
                }
            }
        }

        let bundle = Arc::new(bundle);
        self.loads
            .lock()
            .unwrap()
            .insert(locale.to_string(), load);
        self.bundles
            .lock()
            .unwrap()
            .entry(locale.to_string())
            .or_insert_with(|| bundle.clone());
        Ok(bundle)
    }

    /// Eagerly construct every bundle and report the per-locale results
    pub fn preload(&self) -> Result<LoadSummary, LocalizationError> {
        for locale in &self.locales {
            self.bundle_for(locale)?;
        }
        Ok(self.load_summary())
    }

    /// Load results for every locale touched so far, in chain order
    pub fn load_summary(&self) -> LoadSummary {
        let loads = self.loads.lock().unwrap();
        LoadSummary {
            per_locale: self
                .locales
                .iter()
                .filter_map(|l| loads.get(l).cloned())
                .collect(),
        }
    }

    /// Format a message's value, walking the chain until some bundle has
    /// the message.
    pub fn format_value(
        &self,
        id: &str,
        args: &FluentArgs,
    ) -> Result<LocalizedValue, LocalizationError> {
        self.format_pattern(id, args, None)
    }

    /// Format a message's value or attribute through the chain
    pub fn format_pattern(
        &self,
        id: &str,
        args: &FluentArgs,
        attribute: Option<&str>,
    ) -> Result<LocalizedValue, LocalizationError> {
        let requested = &self.locales[0];
        for locale in &self.locales {
            let bundle = self.bundle_for(locale)?;
            if !bundle.has_message(id) {
                continue;
            }
            let result = bundle.format_message(id, args, attribute)?;
            if locale != requested {
                if let Some(callback) = &self.on_fallback {
                    callback(requested, locale, id);
                }
            }
            return Ok(LocalizedValue {
                value: result.value,
                errors: result.errors,
                locale: locale.clone(),
            });
        }
        Err(LocalizationError::MessageNotFound(id.to_string()))
    }
}

impl<L: ResourceLoader> std::fmt::Debug for Localization<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Localization")
            .field("locales", &self.locales)
            .field("resource_ids", &self.resource_ids)
            .finish_non_exhaustive()
    }
}
