//! Registry of server connections.
//!
//! Managers are indexed by endpoint, with a secondary name index so that
//! commands can target a server either as `address:port` or by its name.
//! Both indexes live under one lock and are always updated together.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use mcbridge_core::{BridgeError, BridgeResult, Endpoint, EndpointRecord, Envelope, EnvelopeRouter};

use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::transport::Dialer;

/// Builds the envelope router for a newly added endpoint.
pub type RouterFactory = Arc<dyn Fn(&Endpoint) -> EnvelopeRouter + Send + Sync>;

/// Summary of one registered server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub endpoint: Endpoint,
    pub name: String,
    pub status: ConnectionStatus,
}

#[derive(Default)]
struct Entries {
    by_endpoint: HashMap<Endpoint, ConnectionManager>,
    by_name: HashMap<String, Endpoint>,
}

/// All server connections, keyed by endpoint and by name.
pub struct Dispatcher {
    entries: RwLock<Entries>,
    dialer: Arc<dyn Dialer>,
    routers: RouterFactory,
}

impl Dispatcher {
    pub fn new(dialer: Arc<dyn Dialer>, routers: RouterFactory) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            dialer,
            routers,
        }
    }

    /// Register a server and start connecting to it.
    pub async fn add(&self, endpoint: Endpoint, name: String) -> BridgeResult<ConnectionManager> {
        let mut entries = self.entries.write().await;
        if entries.by_endpoint.contains_key(&endpoint) {
            return Err(BridgeError::DuplicateEndpoint(endpoint.to_string()));
        }
        if entries.by_name.contains_key(&name) {
            return Err(BridgeError::DuplicateEndpoint(format!("name {name} already in use")));
        }

        let router = (self.routers)(&endpoint);
        let manager = ConnectionManager::new(endpoint.clone(), name.clone(), Arc::clone(&self.dialer), router);
        manager.start_connect_loop();

        entries.by_name.insert(name.clone(), endpoint.clone());
        entries.by_endpoint.insert(endpoint.clone(), manager.clone());
        info!(%endpoint, %name, "server added");
        Ok(manager)
    }

    /// Close and forget the server at `endpoint`.
    pub async fn remove_by_endpoint(&self, endpoint: &Endpoint) -> BridgeResult<()> {
        let mut entries = self.entries.write().await;
        let manager = entries
            .by_endpoint
            .remove(endpoint)
            .ok_or_else(|| BridgeError::EndpointNotFound(endpoint.to_string()))?;
        entries.by_name.remove(&manager.name());
        drop(entries);

        manager.close();
        info!(%endpoint, name = %manager.name(), "server removed");
        Ok(())
    }

    /// Close and forget the server called `name`.
    pub async fn remove_by_name(&self, name: &str) -> BridgeResult<()> {
        let mut entries = self.entries.write().await;
        let endpoint = entries
            .by_name
            .remove(name)
            .ok_or_else(|| BridgeError::EndpointNotFound(name.to_string()))?;
        let manager = entries.by_endpoint.remove(&endpoint);
        drop(entries);

        if let Some(manager) = manager {
            manager.close();
        }
        info!(%endpoint, %name, "server removed");
        Ok(())
    }

    /// Give the server at `endpoint` a new name.
    pub async fn rename(&self, endpoint: &Endpoint, new_name: String) -> BridgeResult<()> {
        let mut entries = self.entries.write().await;
        if entries.by_name.contains_key(&new_name) {
            return Err(BridgeError::DuplicateEndpoint(format!("name {new_name} already in use")));
        }
        let manager = entries
            .by_endpoint
            .get(endpoint)
            .cloned()
            .ok_or_else(|| BridgeError::EndpointNotFound(endpoint.to_string()))?;
        let old_name = manager.name();
        entries.by_name.remove(&old_name);
        entries.by_name.insert(new_name.clone(), endpoint.clone());
        manager.rename(new_name.clone());
        debug!(%endpoint, %old_name, %new_name, "server renamed");
        Ok(())
    }

    pub async fn get(&self, endpoint: &Endpoint) -> Option<ConnectionManager> {
        self.entries.read().await.by_endpoint.get(endpoint).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<ConnectionManager> {
        let entries = self.entries.read().await;
        let endpoint = entries.by_name.get(name)?;
        entries.by_endpoint.get(endpoint).cloned()
    }

    /// Find a server by `address:port` or, failing that, by name.
    pub async fn resolve(&self, target: &str) -> BridgeResult<ConnectionManager> {
        let by_endpoint = match Endpoint::parse(target) {
            Ok(endpoint) => self.get(&endpoint).await,
            Err(_) => None,
        };
        match by_endpoint {
            Some(manager) => Ok(manager),
            None => self
                .get_by_name(target)
                .await
                .ok_or_else(|| BridgeError::EndpointNotFound(target.to_string())),
        }
    }

    /// Queue `envelope` on every server.
    ///
    /// Enqueues run concurrently. A full queue makes its enqueue wait for
    /// space, so a slow server throttles the caller without holding up
    /// delivery to the others.
    pub async fn send_to_all(&self, envelope: Envelope) {
        let managers: Vec<ConnectionManager> = self.entries.read().await.by_endpoint.values().cloned().collect();
        let sends = managers.iter().map(|manager| {
            let envelope = envelope.clone();
            async move {
                if let Err(e) = manager.enqueue(envelope).await {
                    warn!(endpoint = %manager.endpoint(), error = %e, "broadcast enqueue failed");
                }
            }
        });
        join_all(sends).await;
    }

    /// Queue `envelope` on the server at `endpoint`.
    pub async fn send_to_endpoint(&self, envelope: Envelope, endpoint: &Endpoint) -> BridgeResult<()> {
        let manager = self
            .get(endpoint)
            .await
            .ok_or_else(|| BridgeError::EndpointNotFound(endpoint.to_string()))?;
        manager.enqueue(envelope).await
    }

    /// Queue `envelope` on the server called `name`.
    pub async fn send_to_name(&self, envelope: Envelope, name: &str) -> BridgeResult<()> {
        let manager = self
            .get_by_name(name)
            .await
            .ok_or_else(|| BridgeError::EndpointNotFound(name.to_string()))?;
        manager.enqueue(envelope).await
    }

    /// Every registered server, sorted by name.
    pub async fn list_all(&self) -> Vec<EndpointInfo> {
        let entries = self.entries.read().await;
        let mut list: Vec<EndpointInfo> = entries
            .by_endpoint
            .values()
            .map(|m| EndpointInfo {
                endpoint: m.endpoint().clone(),
                name: m.name(),
                status: m.status(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.endpoint.cmp(&b.endpoint)));
        list
    }

    /// Registered servers in their persisted form.
    pub async fn records(&self) -> Vec<EndpointRecord> {
        self.list_all()
            .await
            .into_iter()
            .map(|info| EndpointRecord {
                endpoint: info.endpoint,
                name: info.name,
            })
            .collect()
    }

    /// Every server name.
    pub async fn identifiers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.by_endpoint.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every connection and empty the registry, returning any errors
    /// hit while stopping them.
    pub async fn close_all(&self) -> Vec<BridgeError> {
        let managers: Vec<ConnectionManager> = {
            let mut entries = self.entries.write().await;
            entries.by_name.clear();
            entries.by_endpoint.drain().map(|(_, m)| m).collect()
        };
        let results = join_all(managers.iter().map(|m| m.shutdown())).await;
        let errors: Vec<BridgeError> = results.into_iter().filter_map(Result::err).collect();
        info!(closed = managers.len(), errors = errors.len(), "all connections closed");
        errors
    }
}
