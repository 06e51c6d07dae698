//! Cache store capability.
//!
//! The store maps generation names to caches, and each cache maps a request
//! key to a stored response. Components never hold a store-wide singleton;
//! they open the generation they need by name.
//!
//! ```text
//! CacheStore (by generation name)
//!     └── Cache
//!             └── key → CacheEntry
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use appshell_net::{Response, ResponseSource, Url};
use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Cache store errors.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// URL the response was fetched from, if known.
    pub url: Option<String>,

    /// Response status.
    pub status: u16,

    /// Response headers in arrival order. Repeated names keep every value.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage. Header values that are not valid UTF-8 are dropped.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: response.url.as_ref().map(|u| u.to_string()),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from this entry, tagged with `source`.
    pub fn to_response(&self, source: ResponseSource) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Response {
            url: self.url.as_deref().and_then(|u| Url::parse(u).ok()),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone(),
            source,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One opened generation.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Generation name this handle was opened with.
    fn name(&self) -> &str;

    /// Look up an entry by key.
    async fn match_key(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing any previous entry under the same key.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }
}

/// The store of named generations.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError>;

    /// Check if a generation exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// All generation names.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a generation and every entry in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;
}

type Entries = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Handle to a generation inside a [`MemoryCacheStore`].
#[derive(Debug, Clone)]
pub struct MemoryCache {
    name: String,
    entries: Entries,
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_key(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.read().await.get(key).cloned();
        trace!(cache = %self.name, key, hit = entry.is_some(), "Cache lookup");
        Ok(entry)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), entry);
        trace!(cache = %self.name, key, "Cache write");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().await.len())
    }
}

/// In-process [`CacheStore`].
///
/// Handles opened under the same name share entries. A handle to a deleted
/// generation keeps its detached entries; reopening the name starts empty.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Entries>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        let entries = {
            let mut caches = self.caches.write().await;
            caches
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(cache = name, "Creating cache generation");
                    Entries::default()
                })
                .clone()
        };
        Ok(Arc::new(MemoryCache {
            name: name.to_string(),
            entries,
        }))
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}
