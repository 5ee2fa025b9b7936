use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{config::SubscriptionConfig, metrics, rpc::ForwardRpc};

use super::{
    id::random_id, Broadcaster, HeadPoller, LogsPoller, Registry, RegistryError, Subscriber,
    Subscription, SubscriptionKind, SubscriptionParams,
};

#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The per-network cap on distinct active log subscriptions.
    #[error("log filter limit reached ({0} active)")]
    LogFilterLimit(usize),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Owns the subscription state and pollers of one network.
///
/// Its cancellation scope must be rooted in the process lifetime, never in
/// the request that created the first connection: the pollers outlive every
/// individual upgrade request and run until [`stop`](Self::stop) or process
/// shutdown.
pub struct SubscriptionManager {
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    head_poller: Arc<HeadPoller>,
    logs_poller: Arc<LogsPoller>,
    config: SubscriptionConfig,
    project_id: String,
    network_id: String,
    cancel: CancellationToken,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(
        project_id: impl Into<String>,
        network_id: impl Into<String>,
        forward: Arc<dyn ForwardRpc>,
        config: SubscriptionConfig,
    ) -> Self {
        let project_id = project_id.into();
        let network_id = network_id.into();

        let registry = Arc::new(Registry::new());
        let broadcaster =
            Arc::new(Broadcaster::new(registry.clone(), project_id.clone(), network_id.clone()));
        let head_poller = Arc::new(HeadPoller::new(
            registry.clone(),
            broadcaster.clone(),
            forward.clone(),
            config.poll_interval,
            project_id.clone(),
            network_id.clone(),
        ));
        let logs_poller = Arc::new(LogsPoller::new(
            registry.clone(),
            broadcaster.clone(),
            forward,
            config.poll_interval,
            project_id.clone(),
            network_id.clone(),
        ));

        Self {
            registry,
            broadcaster,
            head_poller,
            logs_poller,
            config,
            project_id,
            network_id,
            cancel: CancellationToken::new(),
            pollers: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Launches the head and logs pollers as independent tasks.
    pub fn start(&self) {
        info!(network = %self.network_id, "starting subscription manager");

        let mut pollers = self.pollers.lock();
        pollers.push(tokio::spawn(self.head_poller.clone().run(self.cancel.child_token())));
        pollers.push(tokio::spawn(self.logs_poller.clone().run(self.cancel.child_token())));
    }

    /// Cancels the pollers and waits for them to exit.
    pub async fn stop(&self) {
        info!(network = %self.network_id, "stopping subscription manager");
        self.cancel.cancel();

        let pollers = std::mem::take(&mut *self.pollers.lock());
        for poller in pollers {
            if let Err(err) = poller.await {
                warn!(%err, "poller task aborted");
            }
        }
        // Pollers are gone; drain whatever sends they left in flight.
        self.broadcaster.wait().await;
        info!(network = %self.network_id, "subscription manager stopped");
    }

    /// Creates a subscription and returns its id.
    pub fn subscribe(
        &self,
        kind: SubscriptionKind,
        params: SubscriptionParams,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<String, SubscribeError> {
        if kind == SubscriptionKind::Logs {
            let active = self.registry.count_by_kind(SubscriptionKind::Logs);
            if active >= self.config.max_log_filters {
                warn!(active, limit = self.config.max_log_filters, "log filter limit reached");
                return Err(SubscribeError::LogFilterLimit(active));
            }
        }

        let id = random_id();
        let subscription = Subscription {
            id: id.clone(),
            kind,
            params,
            connection_id: subscriber.connection_id().to_string(),
            created_at: Instant::now(),
        };
        self.registry.add(subscription, subscriber)?;

        metrics::subscription_created(&self.project_id, &self.network_id, kind);
        self.sync_active_gauge(kind);
        info!(sub_id = %id, kind = %kind, "subscription created");
        Ok(id)
    }

    /// Removes a subscription. Returns whether the id existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let Some(subscription) = self.registry.get(id) else {
            return false;
        };
        let existed = self.registry.remove(id);
        if existed {
            metrics::subscription_removed(
                &self.project_id,
                &self.network_id,
                subscription.kind,
                "unsubscribe",
            );
            self.sync_active_gauge(subscription.kind);
            info!(sub_id = %id, "subscription removed");
        }
        existed
    }

    /// Removes every subscription owned by a connection. Returns the count.
    pub fn unsubscribe_connection(&self, connection_id: &str) -> usize {
        let removed = self.registry.remove_by_connection(connection_id);
        for subscription in &removed {
            metrics::subscription_removed(
                &self.project_id,
                &self.network_id,
                subscription.kind,
                "disconnect",
            );
        }
        for kind in SubscriptionKind::ALL {
            self.sync_active_gauge(kind);
        }
        if !removed.is_empty() {
            info!(
                connection_id = %connection_id,
                count = removed.len(),
                "removed all subscriptions for connection"
            );
        }
        removed.len()
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    fn sync_active_gauge(&self, kind: SubscriptionKind) {
        metrics::set_active_subscriptions(
            &self.project_id,
            &self.network_id,
            kind,
            self.registry.count_by_kind(kind),
        );
    }
}
