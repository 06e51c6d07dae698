//! Versioned cache generations.
//!
//! A generation is one versioned instance of the store, named
//! `{app_name}-{version}`. Versions never contain the separator, so the text
//! after the last `-` is always the version and an app named `shop` never
//! claims `shop-beta-v1`. Retirement is a pure function of the names that
//! exist and the generation that is current.

use std::fmt;

/// Separator between the application name and the version in a generation name.
pub const GENERATION_SEPARATOR: char = '-';

/// One versioned instance of the local cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheGeneration {
    app_name: String,
    version: String,
}

impl CacheGeneration {
    pub fn new(app_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The store name, e.g. `shell-app-v2`.
    pub fn name(&self) -> String {
        format!("{}{}{}", self.app_name, GENERATION_SEPARATOR, self.version)
    }

    /// Prefix shared by every generation of this application.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.app_name, GENERATION_SEPARATOR)
    }

    /// Whether `name` belongs to this application (any version).
    pub fn is_sibling(&self, name: &str) -> bool {
        match name.strip_prefix(&self.prefix()) {
            Some(version) => !version.is_empty() && !version.contains(GENERATION_SEPARATOR),
            None => false,
        }
    }

    /// Whether `name` is this exact generation.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.name()
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.app_name, GENERATION_SEPARATOR, self.version)
    }
}

/// Names to delete when `current` takes over: same application, other version.
///
/// Names of other applications sharing the store are never selected.
pub fn stale_generations<S: AsRef<str>>(existing: &[S], current: &CacheGeneration) -> Vec<String> {
    existing
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| current.is_sibling(name) && !current.is_current(name))
        .map(str::to_string)
        .collect()
}
