//! # AppShell Service Worker
//!
//! Offline application-shell worker: precaches a versioned set of shell
//! assets, retires older versions of that cache, and intercepts every
//! outbound request to answer it from the cache, the network, or a fallback.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache) → activate (retire + take over)
//! - **Generations**: one versioned cache per worker build
//! - **Routing**: shell-first navigations, cache-first assets with runtime fill
//! - **Fallback**: cached offline document or a synthesized 503
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (host events: install, activate, fetch)
//!     │
//!     ├── LifecycleController ── CacheStore (generations)
//!     │                      └── ClientRegistry (take-over)
//!     │
//!     └── RequestRouter ──────── CacheStore (active generation)
//!             │              └── NetworkFetch
//!             └── FallbackResolver
//! ```

use appshell_common::AppShellError;
use thiserror::Error;

pub mod clients;
pub mod config;
pub mod fallback;
pub mod generation;
pub mod lifecycle;
pub mod router;
pub mod store;
pub mod worker;

pub use clients::{Client, ClientList, ClientRegistry};
pub use config::{ConfigError, PrecacheRetry, WorkerConfig};
pub use fallback::FallbackResolver;
pub use generation::{stale_generations, CacheGeneration};
pub use lifecycle::{
    ActivateReport, InstallReport, LifecycleController, PrecacheOutcome, WorkerState,
};
pub use router::{RequestRouter, Route};
pub use store::{Cache, CacheEntry, CacheError, CacheStore, MemoryCache, MemoryCacheStore};
pub use worker::{FetchHandle, ServiceWorker};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ServiceWorkerError> for AppShellError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::StateError(message) => AppShellError::lifecycle(message),
            ServiceWorkerError::Cache(e) => AppShellError::cache(e.to_string()),
            ServiceWorkerError::Config(e) => AppShellError::config_with_source("invalid worker config", e),
        }
    }
}

// ==================== Events ====================

/// Notifications published while the worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        generation: String,
        state: WorkerState,
    },
    /// The worker asked to activate without waiting for old clients to close.
    SkipWaiting { generation: String },
    /// A manifest entry could not be precached.
    PrecacheFailed { path: String, reason: String },
    /// A stale generation was deleted.
    GenerationDeleted { name: String },
    /// Open clients were taken over.
    ClientsClaimed { generation: String, count: usize },
}
