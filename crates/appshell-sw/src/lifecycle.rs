//! Install and activate phases.
//!
//! Both phases are best-effort. A manifest entry that cannot be precached is
//! reported and skipped; a generation that cannot be deleted is reported and
//! left behind. Neither stops the worker from moving on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use appshell_common::{retry_with_backoff, with_timeout, RetryConfig};
use appshell_net::{normalize_path, NetworkFetch, Request};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::config::WorkerConfig;
use crate::generation::{stale_generations, CacheGeneration};
use crate::store::{Cache, CacheEntry, CacheStore};
use crate::{ServiceWorkerError, WorkerEvent};

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Installed, eligible for activation.
    Installed,
    /// Retiring old generations and taking over clients.
    Activating,
    /// Serving requests.
    Activated,
    /// Install could not open its generation. Terminal.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

/// Result of precaching one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecacheOutcome {
    Cached { path: String, key: String },
    Failed { path: String, reason: String },
}

impl PrecacheOutcome {
    pub fn path(&self) -> &str {
        match self {
            PrecacheOutcome::Cached { path, .. } | PrecacheOutcome::Failed { path, .. } => path,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, PrecacheOutcome::Cached { .. })
    }
}

/// What install did, entry by entry, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub outcomes: Vec<PrecacheOutcome>,
}

impl InstallReport {
    pub fn cached(&self) -> impl Iterator<Item = &PrecacheOutcome> {
        self.outcomes.iter().filter(|o| o.is_cached())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PrecacheOutcome> {
        self.outcomes.iter().filter(|o| !o.is_cached())
    }

    /// Whether every manifest entry made it into the store.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(PrecacheOutcome::is_cached)
    }
}

/// What activate did. `errors` is empty on a clean activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub generation: String,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub clients_claimed: usize,
}

impl ActivateReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Drives install and activate; owns generation create/retire transitions.
pub struct LifecycleController {
    config: Arc<WorkerConfig>,
    generation: CacheGeneration,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn NetworkFetch>,
    clients: Arc<dyn ClientRegistry>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl LifecycleController {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkFetch>,
        clients: Arc<dyn ClientRegistry>,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            generation: config.generation(),
            config,
            store,
            network,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            event_tx,
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    pub fn generation(&self) -> &CacheGeneration {
        &self.generation
    }

    /// Whether install asked to activate without waiting for old clients.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Precache the manifest into the current generation.
    ///
    /// Fails only if the worker is not freshly parsed or the generation
    /// cannot be opened; individual entries never fail the phase.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;
        self.request_skip_waiting();

        let name = self.generation.name();
        let cache = match self.store.open(&name).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(generation = %name, error = %e, "Failed to open cache generation");
                self.set_state(WorkerState::Redundant).await;
                return Err(e.into());
            }
        };

        info!(
            generation = %name,
            entries = self.config.manifest.len(),
            "Precaching application shell"
        );

        let retry = self.config.precache_retry.to_retry_config();
        let deadline = self
            .config
            .install_timeout()
            .map(|timeout| Instant::now() + timeout);

        let outcomes = join_all(
            self.config
                .manifest
                .iter()
                .map(|path| self.precache_within(cache.as_ref(), path, &retry, deadline)),
        )
        .await;

        for outcome in &outcomes {
            if let PrecacheOutcome::Failed { path, reason } = outcome {
                warn!(path = %path, reason = %reason, "Failed to cache resource during install");
                self.emit(WorkerEvent::PrecacheFailed {
                    path: path.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let report = InstallReport {
            generation: name,
            outcomes,
        };
        info!(
            generation = %report.generation,
            cached = report.cached().count(),
            failed = report.failed().count(),
            "Install complete"
        );

        self.set_state(WorkerState::Installed).await;
        Ok(report)
    }

    /// Retire stale generations and take over open clients.
    ///
    /// Fails only if the worker is not installed. Every store or client
    /// failure is recorded in the report and activation still completes.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;
        info!(generation = %self.generation, "Service worker activating");

        let mut report = ActivateReport {
            generation: self.generation.name(),
            ..Default::default()
        };

        match self.config.activate_timeout() {
            Some(timeout) => {
                let outcome = with_timeout(timeout, self.retire_and_claim(&mut report)).await;
                if let Err(e) = outcome {
                    error!(category = e.category(), error = %e, "Activate handler abandoned");
                    report.errors.push(e.to_string());
                }
            }
            None => self.retire_and_claim(&mut report).await,
        }

        self.set_state(WorkerState::Activated).await;
        if report.is_clean() {
            info!(generation = %self.generation, "Service worker is now active");
        } else {
            error!(
                generation = %self.generation,
                errors = ?report.errors,
                "Service worker active with errors during activate"
            );
        }
        Ok(report)
    }

    async fn retire_and_claim(&self, report: &mut ActivateReport) {
        match self.store.keys().await {
            Ok(names) => {
                let stale = stale_generations(&names, &self.generation);
                if stale.is_empty() {
                    info!("No old caches to clean up");
                } else {
                    info!(caches = ?stale, "Deleting old caches");
                }

                let results = join_all(stale.iter().map(|name| self.store.delete(name))).await;
                for (name, result) in stale.into_iter().zip(results) {
                    match result {
                        Ok(true) => {
                            info!(cache = %name, "Deleted cache");
                            self.emit(WorkerEvent::GenerationDeleted { name: name.clone() });
                            report.deleted.push(name);
                        }
                        Ok(false) => debug!(cache = %name, "Cache already gone"),
                        Err(e) => {
                            error!(cache = %name, error = %e, "Failed to delete cache");
                            report.errors.push(format!("delete {name}: {e}"));
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to list cache generations");
                report.errors.push(format!("list generations: {e}"));
            }
        }

        let name = self.generation.name();
        match self.store.has(&name).await {
            Ok(true) => {}
            Ok(false) => {
                error!(generation = %name, "Current generation missing after retirement");
                report.errors.push(format!("current generation {name} is missing"));
            }
            Err(e) => {
                error!(generation = %name, error = %e, "Failed to check current generation");
                report.errors.push(format!("check {name}: {e}"));
            }
        }

        match self.clients.claim(&name).await {
            Ok(count) => {
                debug!(generation = %name, count, "Claimed clients");
                report.clients_claimed = count;
                self.emit(WorkerEvent::ClientsClaimed {
                    generation: name,
                    count,
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to claim clients");
                report.errors.push(format!("claim clients: {e}"));
            }
        }
    }

    async fn precache_within(
        &self,
        cache: &dyn Cache,
        path: &str,
        retry: &RetryConfig,
        deadline: Option<Instant>,
    ) -> PrecacheOutcome {
        let Some(deadline) = deadline else {
            return self.precache(cache, path, retry).await;
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match with_timeout(remaining, self.precache(cache, path, retry)).await {
            Ok(outcome) => outcome,
            Err(e) => PrecacheOutcome::Failed {
                path: path.to_string(),
                reason: format!("install deadline elapsed: {e}"),
            },
        }
    }

    async fn precache(&self, cache: &dyn Cache, path: &str, retry: &RetryConfig) -> PrecacheOutcome {
        let failed = |reason: String| PrecacheOutcome::Failed {
            path: path.to_string(),
            reason,
        };

        let url = match self.config.resolve(path) {
            Ok(url) => url,
            Err(e) => return failed(e.to_string()),
        };
        let key = normalize_path(&url);
        let request = Request::get(url);

        let response = match retry_with_backoff(retry, || self.network.fetch(&request)).await {
            Ok(response) => response,
            Err(e) => return failed(e.to_string()),
        };
        if !response.ok() {
            return failed(format!("unexpected status {}", response.status));
        }

        match cache.put(&key, CacheEntry::from_response(&response)).await {
            Ok(()) => {
                debug!(path, key = %key, "Precached");
                PrecacheOutcome::Cached {
                    path: path.to_string(),
                    key,
                }
            }
            Err(e) => failed(e.to_string()),
        }
    }

    fn request_skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Release);
        self.emit(WorkerEvent::SkipWaiting {
            generation: self.generation.name(),
        });
    }

    async fn transition(
        &self,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot move to {} from {} (expected {})",
                to.as_str(),
                state.as_str(),
                from.as_str()
            )));
        }
        *state = to;
        drop(state);
        self.emit_state(to);
        Ok(())
    }

    async fn set_state(&self, to: WorkerState) {
        *self.state.write().await = to;
        self.emit_state(to);
    }

    fn emit_state(&self, state: WorkerState) {
        debug!(generation = %self.generation, state = state.as_str(), "State change");
        self.emit(WorkerEvent::StateChange {
            generation: self.generation.name(),
            state,
        });
    }

    fn emit(&self, event: WorkerEvent) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}
