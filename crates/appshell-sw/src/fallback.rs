//! Offline fallback for assets that are neither cached nor reachable.

use std::sync::Arc;

use appshell_net::{Response, ResponseSource};
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::store::CacheStore;

/// Body of the synthesized response when no fallback document is cached.
pub const OFFLINE_BODY: &str = "Offline";

/// Supplies substitute content once network and cache have both failed.
pub struct FallbackResolver {
    store: Arc<dyn CacheStore>,
    generation: String,
    fallback_key: String,
}

impl FallbackResolver {
    pub fn new(store: Arc<dyn CacheStore>, generation: String, fallback_key: String) -> Self {
        Self {
            store,
            generation,
            fallback_key,
        }
    }

    /// The cached fallback document, or a synthesized 503.
    pub async fn resolve(&self) -> Response {
        let cache = match self.store.open(&self.generation).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(generation = %self.generation, error = %e, "Cannot open generation for fallback");
                return Self::service_unavailable();
            }
        };

        match cache.match_key(&self.fallback_key).await {
            Ok(Some(entry)) => {
                debug!(key = %self.fallback_key, "Serving fallback document");
                entry.to_response(ResponseSource::Fallback)
            }
            Ok(None) => {
                warn!(key = %self.fallback_key, "No fallback document cached");
                Self::service_unavailable()
            }
            Err(e) => {
                error!(key = %self.fallback_key, error = %e, "Fallback lookup failed");
                Self::service_unavailable()
            }
        }
    }

    /// The last-resort response: `503 Service Unavailable`, plain text.
    pub fn service_unavailable() -> Response {
        Response::synthesized(StatusCode::SERVICE_UNAVAILABLE, "text/plain", OFFLINE_BODY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheEntry, MemoryCacheStore};

    #[tokio::test]
    async fn test_serves_cached_fallback() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = store.open("app-v1").await.unwrap();
        let page = Response::new(StatusCode::OK, "<p>offline</p>");
        cache
            .put("/fallback.html", CacheEntry::from_response(&page))
            .await
            .unwrap();

        let resolver = FallbackResolver::new(store, "app-v1".into(), "/fallback.html".into());
        let response = resolver.resolve().await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.text().unwrap(), "<p>offline</p>");
    }

    #[tokio::test]
    async fn test_synthesizes_503_without_fallback() {
        let store = Arc::new(MemoryCacheStore::new());
        let resolver = FallbackResolver::new(store, "app-v1".into(), "/fallback.html".into());
        let response = resolver.resolve().await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.source, ResponseSource::Synthesized);
        assert!(!response.body.is_empty());
    }

    #[tokio::test]
    async fn test_ignores_other_generations() {
        let store = Arc::new(MemoryCacheStore::new());
        let old = store.open("app-v1").await.unwrap();
        old.put(
            "/fallback.html",
            CacheEntry::from_response(&Response::new(StatusCode::OK, "stale")),
        )
        .await
        .unwrap();

        let resolver = FallbackResolver::new(store, "app-v2".into(), "/fallback.html".into());
        assert_eq!(resolver.resolve().await.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
