use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocket;
use parking_lot::RwLock;
use tracing::info;

use crate::{
    config::{SubscriptionConfig, WebSocketConfig},
    metrics,
    rpc::ForwardRpc,
    subscription::SubscriptionManager,
};

use super::{
    connection::{self, ConnectionHandle},
    CloseReason, NetworkInfo,
};

/// Per-network pool of live connections plus the network's subscription
/// manager. Created once per network key and kept for the process
/// lifetime.
pub struct ConnectionManager {
    network: Arc<dyn NetworkInfo>,
    config: WebSocketConfig,
    forward: Arc<dyn ForwardRpc>,
    subscriptions: Arc<SubscriptionManager>,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
}

impl ConnectionManager {
    /// Builds the manager and starts the network's pollers.
    pub fn new(
        network: Arc<dyn NetworkInfo>,
        forward: Arc<dyn ForwardRpc>,
        config: WebSocketConfig,
        sub_config: SubscriptionConfig,
    ) -> Arc<Self> {
        let subscriptions = Arc::new(SubscriptionManager::new(
            network.project_id(),
            network.id(),
            forward.clone(),
            sub_config,
        ));
        subscriptions.start();

        Arc::new(Self {
            network,
            config,
            forward,
            subscriptions,
            connections: RwLock::new(HashMap::new()),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn at_capacity(&self) -> bool {
        self.connection_count() >= self.config.max_connections_per_network
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn project_id(&self) -> &str {
        self.network.project_id()
    }

    pub fn network_id(&self) -> &str {
        self.network.id()
    }

    pub(crate) fn forward(&self) -> Arc<dyn ForwardRpc> {
        self.forward.clone()
    }

    /// Registers the upgraded socket and serves it until it closes.
    pub(crate) async fn serve_connection(self: Arc<Self>, socket: WebSocket) {
        let (handle, outbound) = ConnectionHandle::new();
        self.connections.write().insert(handle.id().to_string(), handle.clone());
        metrics::connection_opened(self.project_id(), self.network_id());
        info!(
            conn_id = %handle.id(),
            network = %self.network_id(),
            project = %self.project_id(),
            "websocket connection established"
        );

        connection::run(socket, self.clone(), handle, outbound).await;
    }

    /// Drops the connection's slot and tears down everything it owned.
    /// Safe to call more than once; only the first call does work.
    pub(crate) fn release(&self, handle: &Arc<ConnectionHandle>) {
        if self.connections.write().remove(handle.id()).is_none() {
            return;
        }

        let removed = self.subscriptions.unsubscribe_connection(handle.id());
        let reason = handle.close_reason().unwrap_or(CloseReason::ClientClose);
        metrics::connection_closed(self.project_id(), self.network_id(), reason.as_str());
        info!(
            conn_id = %handle.id(),
            reason = %reason,
            subscriptions = removed,
            "websocket connection closed"
        );
    }

    /// Broadcasts close to every connection and stops the pollers.
    pub async fn shutdown(&self) {
        info!(network = %self.network_id(), "shutting down connection manager");

        let handles: Vec<_> = self.connections.read().values().cloned().collect();
        for handle in handles {
            handle.begin_close(CloseReason::Shutdown);
        }
        self.subscriptions.stop().await;
    }
}
