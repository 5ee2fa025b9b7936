use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::{SubscriptionConfig, WebSocketConfig},
    rpc::ForwardRpc,
};

use super::{manager::ConnectionManager, NetworkInfo, NetworkKey};

/// Maps a network key to the upstream forwarder serving it. How upstreams
/// are selected, hedged or rate limited is entirely the caller's concern.
pub type ForwardResolver = Arc<dyn Fn(&NetworkKey) -> Option<Arc<dyn ForwardRpc>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("websocket endpoint is disabled")]
    Disabled,
    #[error("connection limit reached for network {0}")]
    ConnectionLimit(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("unknown network")]
    UnknownNetwork,
}

impl UpgradeError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Disabled | Self::ConnectionLimit(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnsupportedArchitecture(_) | Self::UnknownNetwork => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Accepts websocket upgrades and owns one [`ConnectionManager`] per
/// network key.
///
/// Managers are created lazily on first upgrade and live until
/// [`shutdown`](Self::shutdown); their pollers are rooted here, in the
/// server's lifetime, never in the upgrade request that first touched the
/// network.
pub struct WsServer {
    config: WebSocketConfig,
    sub_config: SubscriptionConfig,
    managers: RwLock<HashMap<String, Arc<ConnectionManager>>>,
}

impl WsServer {
    pub fn new(config: WebSocketConfig, sub_config: SubscriptionConfig) -> Arc<Self> {
        Arc::new(Self { config, sub_config, managers: RwLock::new(HashMap::new()) })
    }

    /// Performs the upgrade handshake checks and hands the socket to the
    /// network's connection manager.
    pub fn upgrade(
        &self,
        ws: WebSocketUpgrade,
        network: Arc<dyn NetworkInfo>,
        forward: Arc<dyn ForwardRpc>,
    ) -> Result<Response, UpgradeError> {
        if !self.config.enabled {
            return Err(UpgradeError::Disabled);
        }

        let manager = self.manager_or_create(network.clone(), forward);

        // Checked before upgrading so the reject is an HTTP error, not a
        // websocket close.
        if manager.at_capacity() {
            warn!(
                network = %network.id(),
                count = manager.connection_count(),
                "connection limit reached, rejecting new connection"
            );
            return Err(UpgradeError::ConnectionLimit(network.id().to_string()));
        }

        let ws = ws.write_buffer_size(self.config.write_buffer_size);
        Ok(ws.on_upgrade(move |socket| manager.serve_connection(socket)))
    }

    /// The manager of a network, if one exists yet.
    pub fn manager(&self, project_id: &str, network_id: &str) -> Option<Arc<ConnectionManager>> {
        self.managers.read().get(&manager_key(project_id, network_id)).cloned()
    }

    fn manager_or_create(
        &self,
        network: Arc<dyn NetworkInfo>,
        forward: Arc<dyn ForwardRpc>,
    ) -> Arc<ConnectionManager> {
        let key = manager_key(network.project_id(), network.id());
        if let Some(manager) = self.managers.read().get(&key) {
            return manager.clone();
        }

        let mut managers = self.managers.write();
        // Double-checked under the write lock so concurrent first upgrades
        // cannot create duplicate managers.
        if let Some(manager) = managers.get(&key) {
            return manager.clone();
        }

        let manager = ConnectionManager::new(
            network,
            forward,
            self.config.clone(),
            self.sub_config.clone(),
        );
        managers.insert(key.clone(), manager.clone());
        info!(network = %key, "created connection manager for network");
        manager
    }

    /// Gracefully shuts down every network manager.
    pub async fn shutdown(&self) {
        info!("shutting down websocket server");

        let managers: Vec<_> = self.managers.write().drain().map(|(_, m)| m).collect();
        for manager in managers {
            manager.shutdown().await;
        }
    }
}

fn manager_key(project_id: &str, network_id: &str) -> String {
    format!("{project_id}/{network_id}")
}

#[derive(Clone)]
struct AppState {
    server: Arc<WsServer>,
    resolver: ForwardResolver,
}

/// Builds the upgrade router for `/{projectId}/{architecture}/{chainId}`.
///
/// The upgrade handshake takes over the underlying stream, so this route
/// must stay free of middleware that buffers or re-frames the response
/// body (compression, write timeouts); mount such layers on sibling
/// routers only.
pub fn router(server: Arc<WsServer>, resolver: ForwardResolver) -> Router {
    Router::new()
        .route("/{project_id}/{architecture}/{chain_id}", get(ws_handler))
        .with_state(AppState { server, resolver })
}

async fn ws_handler(
    State(state): State<AppState>,
    Path((project_id, architecture, chain_id)): Path<(String, String, u64)>,
    ws: WebSocketUpgrade,
) -> Response {
    if architecture != "evm" {
        return UpgradeError::UnsupportedArchitecture(architecture).into_response();
    }

    let key = NetworkKey::new(project_id, chain_id);
    let Some(forward) = (state.resolver)(&key) else {
        return UpgradeError::UnknownNetwork.into_response();
    };

    match state.server.upgrade(ws, Arc::new(key), forward) {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}
