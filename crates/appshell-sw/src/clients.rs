//! Open client connections and take-over.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// An open page served through the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Generation currently serving this client, if any.
    pub controller: Option<String>,
}

/// Host capability for taking over already-open clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Make `generation` the controller of every open client. Returns how many were claimed.
    async fn claim(&self, generation: &str) -> Result<usize, ServiceWorkerError>;
}

/// In-memory registry of open clients.
#[derive(Debug, Default)]
pub struct ClientList {
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened, uncontrolled client. Returns its ID.
    pub async fn open(&self, url: Url) -> String {
        let id = next_client_id();
        let client = Client {
            id: id.clone(),
            url,
            controller: None,
        };
        self.clients.write().await.insert(id.clone(), client);
        id
    }

    /// Forget a closed client.
    pub async fn close(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Clients currently controlled by `generation`.
    pub async fn controlled_by(&self, generation: &str) -> Vec<Client> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| c.controller.as_deref() == Some(generation))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl ClientRegistry for ClientList {
    async fn claim(&self, generation: &str) -> Result<usize, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            if client.controller.as_deref() != Some(generation) {
                debug!(client = %client.id, url = %client.url, generation, "Claiming client");
                client.controller = Some(generation.to_string());
            }
        }
        Ok(clients.len())
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
