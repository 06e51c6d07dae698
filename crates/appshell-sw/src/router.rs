//! Request routing for intercepted fetches.
//!
//! Every request resolves to exactly one [`Response`]; routing never returns
//! an error to the caller.
//!
//! | Route        | Strategy                                                  |
//! |--------------|-----------------------------------------------------------|
//! | `Navigation` | cached shell → network → cached shell again → 503         |
//! | `SelfScript` | network only, never read or written                       |
//! | `PassThrough`| network only (non-GET), fallback on failure               |
//! | `Asset`      | exact key → path key → network + store → fallback         |

use std::sync::Arc;

use appshell_net::{NetworkFetch, Request, Response, ResponseSource};
use http::{Method, StatusCode};
use tracing::{debug, error, trace, warn};

use crate::config::WorkerConfig;
use crate::fallback::FallbackResolver;
use crate::store::{Cache, CacheEntry, CacheStore};

/// Serving strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Full document load; always answered with the shell document.
    Navigation,
    /// The worker's own script; bypasses the store entirely.
    SelfScript,
    /// Non-GET sub-resource; forwarded uncached.
    PassThrough,
    /// Cacheable sub-resource.
    Asset,
}

/// Decides, per request, whether to answer from the store, the network, or a fallback.
pub struct RequestRouter {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn NetworkFetch>,
    fallback: FallbackResolver,
    generation: String,
    root_key: String,
    script_key: String,
}

impl RequestRouter {
    pub fn new(
        config: &WorkerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkFetch>,
    ) -> Self {
        let generation = config.generation().name();
        let fallback =
            FallbackResolver::new(Arc::clone(&store), generation.clone(), config.fallback_key());
        Self {
            store,
            network,
            fallback,
            generation,
            root_key: config.root_key(),
            script_key: config.script_key(),
        }
    }

    /// Classify a request.
    pub fn classify(&self, request: &Request) -> Route {
        if request.is_navigation() {
            Route::Navigation
        } else if request.normalized_path() == self.script_key {
            Route::SelfScript
        } else if request.method != Method::GET {
            Route::PassThrough
        } else {
            Route::Asset
        }
    }

    /// Produce the response for an intercepted request.
    pub async fn route(&self, request: &Request) -> Response {
        let route = self.classify(request);
        trace!(url = %request.url, ?route, "Routing request");

        match route {
            Route::Navigation => self.navigate(request).await,
            Route::SelfScript => self.fetch_uncached(request, false).await,
            Route::PassThrough => self.fetch_uncached(request, true).await,
            Route::Asset => self.serve_asset(request).await,
        }
    }

    async fn navigate(&self, request: &Request) -> Response {
        if let Some(shell) = self.lookup_key(&self.root_key).await {
            debug!(url = %request.url, key = %self.root_key, "Serving cached shell for navigation");
            return shell;
        }

        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Navigation fetch failed, retrying cache");
                match self.lookup_key(&self.root_key).await {
                    Some(shell) => shell,
                    None => {
                        error!(url = %request.url, "No shell document available offline");
                        FallbackResolver::service_unavailable()
                    }
                }
            }
        }
    }

    async fn fetch_uncached(&self, request: &Request, use_fallback: bool) -> Response {
        debug!(url = %request.url, method = %request.method, "Bypassing cache");
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %request.url, error = %e, "Uncached fetch failed");
                if use_fallback {
                    self.fallback.resolve().await
                } else {
                    FallbackResolver::service_unavailable()
                }
            }
        }
    }

    async fn serve_asset(&self, request: &Request) -> Response {
        let key = request.normalized_path();
        let cache = self.open_active().await;

        if let Some(ref cache) = cache {
            if let Some(hit) = lookup(cache.as_ref(), request.cache_key(), &key).await {
                debug!(url = %request.url, key = %key, "Found response in cache");
                return hit;
            }
        }

        debug!(url = %request.url, key = %key, "No response in cache, fetching from network");
        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetching failed");
                return self.fallback.resolve().await;
            }
        };

        if let Some(cache) = cache {
            store_copy(cache.as_ref(), &key, &response).await;
        }
        response
    }

    async fn open_active(&self) -> Option<Arc<dyn Cache>> {
        match self.store.open(&self.generation).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                error!(generation = %self.generation, error = %e, "Cannot open active generation");
                None
            }
        }
    }

    async fn lookup_key(&self, key: &str) -> Option<Response> {
        let cache = self.open_active().await?;
        match cache.match_key(key).await {
            Ok(entry) => entry.map(|e| e.to_response(ResponseSource::Cache)),
            Err(e) => {
                error!(key, error = %e, "Cache lookup failed");
                None
            }
        }
    }
}

/// Exact request key first, then the normalized path.
async fn lookup(cache: &dyn Cache, exact: &str, normalized: &str) -> Option<Response> {
    for key in [exact, normalized] {
        match cache.match_key(key).await {
            Ok(Some(entry)) => return Some(entry.to_response(ResponseSource::Cache)),
            Ok(None) => {}
            Err(e) => error!(key, error = %e, "Cache lookup failed"),
        }
    }
    None
}

/// Persist one copy of a fresh network response. The caller keeps the other.
async fn store_copy(cache: &dyn Cache, key: &str, response: &Response) {
    if !response.ok() || response.status == StatusCode::PARTIAL_CONTENT {
        trace!(key, status = %response.status, "Not caching response");
        return;
    }

    if let Err(e) = cache.put(key, CacheEntry::from_response(response)).await {
        warn!(key, error = %e, "Failed to update cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCacheStore;
    use appshell_net::{NetError, OfflineFetcher, Url};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NetworkFetch for EchoFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::OK, format!("fresh {}", request.url.path())))
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new("app", "v1", Url::parse("https://example.com/").unwrap())
    }

    fn request(path: &str) -> Request {
        Request::parse(&format!("https://example.com{path}")).unwrap()
    }

    fn router(network: Arc<dyn NetworkFetch>) -> (RequestRouter, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        (RequestRouter::new(&config(), store.clone(), network), store)
    }

    #[test]
    fn test_classify() {
        let (router, _) = router(Arc::new(OfflineFetcher));

        let nav = Request::navigate(Url::parse("https://example.com/any/route").unwrap());
        assert_eq!(router.classify(&nav), Route::Navigation);
        assert_eq!(router.classify(&request("/serviceworker.js?v=9")), Route::SelfScript);
        assert_eq!(
            router.classify(&request("/api/save").method(Method::POST)),
            Route::PassThrough
        );
        assert_eq!(router.classify(&request("/a.png")), Route::Asset);
    }

    #[tokio::test]
    async fn test_exact_key_wins_over_path_key() {
        let (router, store) = router(Arc::new(OfflineFetcher));
        let cache = store.open("app-v1").await.unwrap();
        let exact = Response::new(StatusCode::OK, "page two");
        let by_path = Response::new(StatusCode::OK, "any page");
        cache
            .put("https://example.com/list.json?page=2", CacheEntry::from_response(&exact))
            .await
            .unwrap();
        cache
            .put("/list.json", CacheEntry::from_response(&by_path))
            .await
            .unwrap();

        let response = router.route(&request("/list.json?page=2")).await;
        assert_eq!(response.text().unwrap(), "page two");

        let response = router.route(&request("/list.json?page=3")).await;
        assert_eq!(response.text().unwrap(), "any page");
    }

    #[tokio::test]
    async fn test_query_variants_share_path_entry() {
        let network = Arc::new(EchoFetcher {
            calls: AtomicUsize::new(0),
        });
        let (router, _) = router(network.clone());

        router.route(&request("/app.css?v=1")).await;
        let second = router.route(&request("/app.css?v=2")).await;

        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_not_cached() {
        struct NotFound;

        #[async_trait]
        impl NetworkFetch for NotFound {
            async fn fetch(&self, _request: &Request) -> Result<Response, NetError> {
                Ok(Response::new(StatusCode::NOT_FOUND, "missing"))
            }
        }

        let (router, store) = router(Arc::new(NotFound));
        let response = router.route(&request("/gone.png")).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let cache = store.open("app-v1").await.unwrap();
        assert!(cache.match_key("/gone.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cached_asset_keeps_repeated_headers() {
        use http::{header, HeaderValue};

        struct Preloads;

        #[async_trait]
        impl NetworkFetch for Preloads {
            async fn fetch(&self, _request: &Request) -> Result<Response, NetError> {
                let mut response = Response::new(StatusCode::OK, "<html></html>");
                for link in ["</a.css>; rel=preload", "</b.js>; rel=preload"] {
                    response
                        .headers
                        .append(header::LINK, HeaderValue::from_static(link));
                }
                for vary in ["Accept-Encoding", "Origin"] {
                    response
                        .headers
                        .append(header::VARY, HeaderValue::from_static(vary));
                }
                Ok(response)
            }
        }

        let (router, _) = router(Arc::new(Preloads));
        let fresh = router.route(&request("/page.html")).await;
        let cached = router.route(&request("/page.html")).await;

        assert_eq!(cached.source, ResponseSource::Cache);
        for name in [header::LINK, header::VARY] {
            let from_network: Vec<_> = fresh.headers.get_all(&name).iter().collect();
            let from_cache: Vec<_> = cached.headers.get_all(&name).iter().collect();
            assert_eq!(from_cache.len(), 2);
            assert_eq!(from_cache, from_network);
        }
    }

    #[tokio::test]
    async fn test_post_is_never_cached() {
        let network = Arc::new(EchoFetcher {
            calls: AtomicUsize::new(0),
        });
        let (router, store) = router(network.clone());

        router.route(&request("/api/save").method(Method::POST)).await;
        router.route(&request("/api/save").method(Method::POST)).await;

        assert_eq!(network.calls.load(Ordering::SeqCst), 2);
        let cache = store.open("app-v1").await.unwrap();
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_script_offline_is_503_not_fallback() {
        let (router, store) = router(Arc::new(OfflineFetcher));
        let cache = store.open("app-v1").await.unwrap();
        cache
            .put(
                "/fallback.html",
                CacheEntry::from_response(&Response::new(StatusCode::OK, "fallback")),
            )
            .await
            .unwrap();

        let response = router.route(&request("/serviceworker.js")).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.source, ResponseSource::Synthesized);
    }
}
