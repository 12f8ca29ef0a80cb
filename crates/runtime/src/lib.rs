//! Runtime for the FTL localization engine
//!
//! Builds on `ftl-syntax` to provide the full formatting stack: the
//! dynamic value model, the resolver with CLDR plural selection and bidi
//! isolation, content-addressed errors, an integrity-checked LRU format
//! cache, a reentrant readers-writer lock, the `Bundle` façade, and the
//! `Localization` fallback chain.
//!
//! ```
//! use ftl_runtime::bundle::{Bundle, BundleConfig};
//! use ftl_runtime::args;
//!
//! let bundle = Bundle::with_config(BundleConfig {
//!     use_isolating: false,
//!     ..BundleConfig::new("en")
//! }).unwrap();
//! bundle.add_resource("hello = Hello, { $name }!").unwrap();
//! let out = bundle.format_value("hello", &args!(name => "Alice")).unwrap();
//! assert_eq!(out.value, "Hello, Alice!");
//! ```

pub mod bundle;
pub mod cache;
pub mod depth;
pub mod error;
pub mod functions;
pub mod loader;
pub mod localization;
pub mod plurals;
pub mod resolver;
pub mod rwlock;
pub mod value;

pub use bundle::{Bundle, BundleConfig, BundleError, FormatResult, Limits};
pub use cache::{CacheConfig, CacheError, CacheStats, IntegrityCache};
pub use error::{Diagnostic, ErrorCategory, FluentError, Severity};
pub use functions::{FunctionContext, FunctionError, FunctionRegistry, NamedArgs};
pub use loader::{FileLoader, LoaderError, ResourceLoader};
pub use localization::{LoadSummary, Localization, LocalizationError, LocalizedValue};
pub use plurals::clear_all_caches;
pub use rwlock::{LockError, ReentrantRwLock};
pub use value::{FluentArgs, FluentNumber, FluentValue};
