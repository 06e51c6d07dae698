//! Host-facing worker: receives install, activate and fetch events.

use std::sync::Arc;

use appshell_net::{NetworkFetch, Request, RequestId, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::clients::ClientRegistry;
use crate::config::WorkerConfig;
use crate::fallback::FallbackResolver;
use crate::generation::CacheGeneration;
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleController, WorkerState};
use crate::router::RequestRouter;
use crate::store::CacheStore;
use crate::{ServiceWorkerError, WorkerEvent};

/// A registered response for one fetch event.
///
/// Awaiting [`FetchHandle::response`] always yields exactly one response.
pub struct FetchHandle {
    request_id: RequestId,
    task: JoinHandle<Response>,
}

impl FetchHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the response. A handler that died yields a synthesized 503.
    pub async fn response(self) -> Response {
        match self.task.await {
            Ok(response) => response,
            Err(e) => {
                error!(request_id = self.request_id.raw(), error = %e, "Fetch handler failed");
                FallbackResolver::service_unavailable()
            }
        }
    }
}

/// One worker instance for one configured version.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    lifecycle: LifecycleController,
    router: RequestRouter,
    network: Arc<dyn NetworkFetch>,
}

impl ServiceWorker {
    /// Create a worker. Fails if the configuration does not validate.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkFetch>,
        clients: Arc<dyn ClientRegistry>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let config = Arc::new(config);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let router = RequestRouter::new(&config, Arc::clone(&store), Arc::clone(&network));
        let lifecycle = LifecycleController::new(
            Arc::clone(&config),
            store,
            Arc::clone(&network),
            clients,
            event_tx,
        );

        info!(generation = %config.generation(), origin = %config.origin, "Service worker created");

        Ok((
            Self {
                config,
                lifecycle,
                router,
                network,
            },
            event_rx,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn generation(&self) -> &CacheGeneration {
        self.lifecycle.generation()
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    /// Install event. Resolves once precaching has finished or been abandoned.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        self.lifecycle.install().await
    }

    /// Activate event. Resolves once retirement and take-over have been attempted.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        self.lifecycle.activate().await
    }

    /// Install then activate, as the host does for a worker that skips waiting.
    pub async fn start(&self) -> Result<(InstallReport, ActivateReport), ServiceWorkerError> {
        let installed = self.install().await?;
        let activated = self.activate().await?;
        Ok((installed, activated))
    }

    /// Fetch event. Always resolves to a response.
    ///
    /// Until activation completes the worker does not control requests and
    /// they go straight to the network.
    pub async fn handle_fetch(&self, request: Request) -> Response {
        trace!(url = %request.url, "Handling fetch event");

        if self.state().await != WorkerState::Activated {
            debug!(url = %request.url, "Worker not active, not intercepting");
            return match self.network.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(url = %request.url, error = %e, "Uncontrolled fetch failed");
                    FallbackResolver::service_unavailable()
                }
            };
        }

        self.router.route(&request).await
    }

    /// Register a response for a fetch event and resolve it on its own task.
    pub fn respond_with(self: &Arc<Self>, request: Request) -> FetchHandle {
        let request_id = request.id;
        let worker = Arc::clone(self);
        let task = tokio::spawn(async move { worker.handle_fetch(request).await });
        FetchHandle { request_id, task }
    }
}
