//! Resource loading
//!
//! `ResourceLoader` is the abstract contract the localization front-end
//! consumes: `load(locale, resource_id) -> source`. The file-backed
//! implementation anchors every path under a fixed root directory and
//! rejects anything that could traverse out of it.

use crate::plurals::is_valid_locale;
use std::path::{Component, Path, PathBuf};

/// Loader failures. "Not found" is not a failure; `load` returns
/// `Ok(None)` for it so the fallback chain can keep walking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("invalid locale `{0}`")]
    InvalidLocale(String),

    #[error("invalid resource id `{0}`")]
    InvalidResourceId(String),

    #[error("failed to read `{path}`: {detail}")]
    Io { path: String, detail: String },
}

/// Abstract source of FTL text per `(locale, resource_id)`
pub trait ResourceLoader: Send + Sync {
    /// Fetch the source for a resource in a locale; `Ok(None)` when the
    /// resource does not exist for that locale.
    fn load(&self, locale: &str, resource_id: &str) -> Result<Option<String>, LoaderError>;

    /// Human-readable description of where `load` would look, for
    /// diagnostics and load summaries.
    fn describe_path(&self, locale: &str, resource_id: &str) -> String;
}

/// File-backed loader over a fixed anchor directory.
///
/// The directory template contains a `{locale}` placeholder, e.g.
/// `"locales/{locale}"`; the resource id is joined beneath it. Locales
/// containing path separators or `..`, and resource ids that are
/// absolute, contain `..`, or have empty components, are rejected before
/// any filesystem access.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
    template: String,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        FileLoader {
            root: root.into(),
            template: template.into(),
        }
    }

    fn validate_locale(locale: &str) -> Result<(), LoaderError> {
        // The locale grammar already excludes separators and dots; check
        // it first so anything odd is refused with the precise reason.
        if !is_valid_locale(locale)
            || locale.contains("..")
            || locale.contains('/')
            || locale.contains('\\')
        {
            return Err(LoaderError::InvalidLocale(locale.to_string()));
        }
        Ok(())
    }

    fn validate_resource_id(resource_id: &str) -> Result<(), LoaderError> {
        let invalid = || LoaderError::InvalidResourceId(resource_id.to_string());
        if resource_id.is_empty() {
            return Err(invalid());
        }
        let path = Path::new(resource_id);
        if path.is_absolute() {
            return Err(invalid());
        }
        // Empty components ("a//b") and any parent-dir step are refused.
        if resource_id.split(['/', '\\']).any(|c| c.is_empty()) {
            return Err(invalid());
        }
        for component in path.components() {
            // `..` parses as ParentDir, `.` as CurDir; only plain names
            // survive.
            match component {
                Component::Normal(_) => {}
                _ => return Err(invalid()),
            }
        }
        Ok(())
    }

    fn path_for(&self, locale: &str, resource_id: &str) -> PathBuf {
        let subdir = self.template.replace("{locale}", locale);
        self.root.join(subdir).join(resource_id)
    }
}

impl ResourceLoader for FileLoader {
    fn load(&self, locale: &str, resource_id: &str) -> Result<Option<String>, LoaderError> {
        Self::validate_locale(locale)?;
        Self::validate_resource_id(resource_id)?;
        let path = self.path_for(locale, resource_id);
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "resource not found");
                Ok(None)
            }
            Err(e) => Err(LoaderError::Io {
                path: path.display().to_string(),
                detail: e.to_string(),
            }),
        }
    }

    fn describe_path(&self, locale: &str, resource_id: &str) -> String {
        self.path_for(locale, resource_id).display().to_string()
    }
}
