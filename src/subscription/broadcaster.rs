use std::sync::Arc;

use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{metrics, rpc};

use super::{registry::Registry, SubscriptionKind};

/// Fans notifications out to subscribers.
///
/// Delivery is asynchronous: every send runs on its own task, so one slow
/// client cannot stall a poll tick. In-flight sends are tracked and can be
/// drained with [`wait`](Self::wait) at shutdown. A failed send is counted
/// but does not remove the subscription; the connection tears its
/// subscriptions down when it closes.
pub struct Broadcaster {
    registry: Arc<Registry>,
    sends: TaskTracker,
    project_id: String,
    network_id: String,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<Registry>,
        project_id: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sends: TaskTracker::new(),
            project_id: project_id.into(),
            network_id: network_id.into(),
        }
    }

    /// Sends a notification to one subscription, on its own task.
    pub fn broadcast(&self, subscription_id: &str, result: &Value) {
        let Some(subscriber) = self.registry.subscriber(subscription_id) else {
            debug!(sub_id = %subscription_id, "subscriber not found, skipping notification");
            return;
        };
        let Some(kind) = self.registry.get(subscription_id).map(|sub| sub.kind) else {
            return;
        };

        let frame = rpc::subscription_notification(subscription_id, result).to_string();
        let sub_id = subscription_id.to_string();
        let project_id = self.project_id.clone();
        let network_id = self.network_id.clone();
        self.sends.spawn(async move {
            match subscriber.notify(&sub_id, frame) {
                Ok(()) => {
                    metrics::notification_sent(&project_id, &network_id, kind);
                }
                Err(err) => {
                    warn!(sub_id = %sub_id, %err, "failed to send notification");
                    metrics::notification_error(&project_id, &network_id, kind, err.cause());
                }
            }
        });
    }

    /// Sends a notification to every subscription of a kind. The id list is
    /// snapshotted first, so subscribers added mid-broadcast see only later
    /// events.
    pub fn broadcast_to_kind(&self, kind: SubscriptionKind, result: &Value) {
        let ids = self.registry.list_by_kind(kind);
        debug!(kind = %kind, count = ids.len(), "broadcasting to kind");

        for id in ids {
            self.broadcast(&id, result);
        }
    }

    /// Waits for every in-flight send task to finish.
    pub async fn wait(&self) {
        self.sends.close();
        self.sends.wait().await;
    }
}
