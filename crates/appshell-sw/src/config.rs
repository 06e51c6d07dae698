//! Worker configuration.
//!
//! Everything here is fixed at build/deploy time. A worker reads its
//! configuration once and never reloads it.

use std::path::Path;
use std::time::Duration;

use appshell_common::RetryConfig;
use appshell_net::normalize_path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::generation::{CacheGeneration, GENERATION_SEPARATOR};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Retry policy for a single manifest entry during install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheRetry {
    /// Total attempts per entry (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry, doubled each time after.
    pub initial_delay_ms: u64,
}

impl Default for PrecacheRetry {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 100,
        }
    }
}

impl PrecacheRetry {
    pub fn to_retry_config(self) -> RetryConfig {
        RetryConfig::with_attempts(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
        )
    }
}

fn default_root_document() -> String {
    "/index.html".to_string()
}

fn default_fallback_document() -> String {
    "/fallback.html".to_string()
}

fn default_script_path() -> String {
    "/serviceworker.js".to_string()
}

/// Static configuration of an offline worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Application naming prefix for cache generations.
    pub app_name: String,

    /// Version tag of this worker build.
    pub version: String,

    /// Origin that manifest paths are resolved against.
    pub origin: Url,

    /// Application-shell assets to precache, in order.
    #[serde(default)]
    pub manifest: Vec<String>,

    /// Shell entry page served for every navigation.
    #[serde(default = "default_root_document")]
    pub root_document: String,

    /// Served when an asset is neither cached nor reachable.
    #[serde(default = "default_fallback_document")]
    pub fallback_document: String,

    /// The worker's own delivery script. Never cached.
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Deadline for the whole precache step.
    #[serde(default)]
    pub install_timeout_ms: Option<u64>,

    /// Deadline for cache retirement plus client take-over.
    #[serde(default)]
    pub activate_timeout_ms: Option<u64>,

    #[serde(default)]
    pub precache_retry: PrecacheRetry,
}

impl WorkerConfig {
    /// Create a configuration with default document paths and an empty manifest.
    pub fn new(app_name: impl Into<String>, version: impl Into<String>, origin: Url) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
            origin,
            manifest: Vec::new(),
            root_document: default_root_document(),
            fallback_document: default_fallback_document(),
            script_path: default_script_path(),
            install_timeout_ms: None,
            activate_timeout_ms: None,
            precache_retry: PrecacheRetry::default(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json)?;
        config.manifest = dedup_preserving_order(std::mem::take(&mut config.manifest));
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the precache manifest. Repeated paths keep their first position.
    pub fn with_manifest<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = dedup_preserving_order(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_root_document(mut self, path: impl Into<String>) -> Self {
        self.root_document = path.into();
        self
    }

    pub fn with_fallback_document(mut self, path: impl Into<String>) -> Self {
        self.fallback_document = path.into();
        self
    }

    pub fn with_script_path(mut self, path: impl Into<String>) -> Self {
        self.script_path = path.into();
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_activate_timeout(mut self, timeout: Duration) -> Self {
        self.activate_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_precache_retry(mut self, retry: PrecacheRetry) -> Self {
        self.precache_retry = retry;
        self
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".into()));
        }
        if self.version.contains(GENERATION_SEPARATOR) {
            return Err(ConfigError::Invalid(format!(
                "version {:?} must not contain {GENERATION_SEPARATOR:?}",
                self.version
            )));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }

        let documents = [
            ("root_document", &self.root_document),
            ("fallback_document", &self.fallback_document),
            ("script_path", &self.script_path),
        ];
        for (field, path) in documents {
            self.check_path(field, path)?;
        }
        for path in &self.manifest {
            self.check_path("manifest", path)?;
        }

        if self.manifest.contains(&self.script_path) {
            return Err(ConfigError::Invalid(format!(
                "manifest must not list the worker script {}",
                self.script_path
            )));
        }
        Ok(())
    }

    fn check_path(&self, field: &str, path: &str) -> Result<(), ConfigError> {
        if !path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "{field} entry {path:?} must be an absolute path"
            )));
        }
        self.resolve(path).map(|_| ())
    }

    /// The cache generation this configuration owns.
    pub fn generation(&self) -> CacheGeneration {
        CacheGeneration::new(&self.app_name, &self.version)
    }

    /// Resolve a configured path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin
            .join(path)
            .map_err(|e| ConfigError::Invalid(format!("cannot resolve {path:?}: {e}")))
    }

    /// The store key a configured path is cached under.
    pub fn key_for(&self, path: &str) -> String {
        self.resolve(path)
            .map(|url| normalize_path(&url))
            .unwrap_or_else(|_| path.to_string())
    }

    pub fn root_key(&self) -> String {
        self.key_for(&self.root_document)
    }

    pub fn fallback_key(&self) -> String {
        self.key_for(&self.fallback_document)
    }

    pub fn script_key(&self) -> String {
        self.key_for(&self.script_path)
    }

    pub fn install_timeout(&self) -> Option<Duration> {
        self.install_timeout_ms.map(Duration::from_millis)
    }

    pub fn activate_timeout(&self) -> Option<Duration> {
        self.activate_timeout_ms.map(Duration::from_millis)
    }
}

fn dedup_preserving_order(paths: Vec<String>) -> Vec<String> {
    let mut seen = hashbrown::HashSet::with_capacity(paths.len());
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new("shell-app", "v2", origin());
        assert_eq!(config.root_document, "/index.html");
        assert_eq!(config.fallback_document, "/fallback.html");
        assert_eq!(config.script_path, "/serviceworker.js");
        assert!(config.manifest.is_empty());
        assert!(config.install_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "app_name": "cleancab-filter-app",
                "version": "v2",
                "origin": "https://example.com/",
                "manifest": ["/cleancab-filter/index.html", "/cleancab-filter/fallback.html"],
                "root_document": "/cleancab-filter/index.html",
                "fallback_document": "/cleancab-filter/fallback.html",
                "script_path": "/cleancab-filter/serviceworker.js",
                "install_timeout_ms": 5000
            }"#,
        )
        .unwrap();

        assert_eq!(config.generation().name(), "cleancab-filter-app-v2");
        assert_eq!(config.manifest.len(), 2);
        assert_eq!(config.install_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.precache_retry, PrecacheRetry::default());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            WorkerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_manifest_dedup_keeps_first_position() {
        let config = WorkerConfig::new("app", "v1", origin())
            .with_manifest(["/a.png", "/index.html", "/a.png", "/b.css"]);
        assert_eq!(config.manifest, vec!["/a.png", "/index.html", "/b.css"]);
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let config = WorkerConfig::new("app", "v1", origin()).with_manifest(["a.png"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_version() {
        let config = WorkerConfig::new("app", " ", origin());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_separator_in_version() {
        let config = WorkerConfig::new("shop", "beta-v1", origin());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = WorkerConfig::new("shop-beta", "v1", origin());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_origin() {
        let config = WorkerConfig::new("app", "v1", Url::parse("file:///srv/app/").unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_script_in_manifest() {
        let config = WorkerConfig::new("app", "v1", origin())
            .with_manifest(["/index.html", "/serviceworker.js"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_keys_drop_query() {
        let config = WorkerConfig::new("app", "v1", origin()).with_root_document("/index.html?utm=1");
        assert_eq!(config.root_key(), "/index.html");
        assert_eq!(config.script_key(), "/serviceworker.js");
    }

    #[test]
    fn test_precache_retry_conversion() {
        let retry = PrecacheRetry {
            max_attempts: 4,
            initial_delay_ms: 20,
        };
        let config = retry.to_retry_config();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.initial_delay, Duration::from_millis(20));
    }
}
