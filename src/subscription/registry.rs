use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::{Subscriber, Subscription, SubscriptionKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("subscription {0} already exists")]
    AlreadyExists(String),
}

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<String, Subscription>,
    subscribers: HashMap<String, Arc<dyn Subscriber>>,
    by_kind: HashMap<SubscriptionKind, Vec<String>>,
    by_connection: HashMap<String, Vec<String>>,
}

/// Concurrent index of the live subscriptions of one network.
///
/// Three views over the same set: by id, by kind, by owning connection.
/// Every mutation updates all views under one write lock, so readers
/// (pollers snapshotting `list_by_kind` every tick, the broadcaster
/// resolving subscribers) never observe a partially-updated structure.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    /// Inserts a subscription into all three views.
    pub fn add(
        &self,
        subscription: Subscription,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(RegistryError::AlreadyExists(subscription.id));
        }

        let id = subscription.id.clone();
        inner.by_kind.entry(subscription.kind).or_default().push(id.clone());
        inner
            .by_connection
            .entry(subscription.connection_id.clone())
            .or_default()
            .push(id.clone());
        inner.subscribers.insert(id.clone(), subscriber);

        debug!(
            sub_id = %id,
            kind = %subscription.kind,
            connection_id = %subscription.connection_id,
            "subscription added"
        );
        inner.subscriptions.insert(id, subscription);
        Ok(())
    }

    /// Removes a subscription from all three views. Removing an unknown id
    /// is a no-op; the return value says whether the id existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write();

        let Some(subscription) = inner.subscriptions.remove(id) else {
            return false;
        };
        inner.subscribers.remove(id);
        Self::unindex(&mut inner.by_kind, &subscription.kind, id);
        Self::unindex(&mut inner.by_connection, &subscription.connection_id, id);

        debug!(sub_id = %id, kind = %subscription.kind, "subscription removed");
        true
    }

    /// Removes every subscription owned by a connection, atomically with
    /// respect to readers. Returns the removed subscriptions.
    pub fn remove_by_connection(&self, connection_id: &str) -> Vec<Subscription> {
        let mut inner = self.inner.write();

        let Some(ids) = inner.by_connection.remove(connection_id) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(subscription) = inner.subscriptions.remove(id) {
                inner.subscribers.remove(id);
                Self::unindex(&mut inner.by_kind, &subscription.kind, id);
                removed.push(subscription);
            }
        }

        debug!(
            connection_id = %connection_id,
            count = removed.len(),
            "removed all subscriptions for connection"
        );
        removed
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.inner.read().subscriptions.get(id).cloned()
    }

    pub fn subscriber(&self, id: &str) -> Option<Arc<dyn Subscriber>> {
        self.inner.read().subscribers.get(id).cloned()
    }

    /// Snapshot of the ids of a kind, in subscription order. Iterating the
    /// copy cannot observe later mutations.
    pub fn list_by_kind(&self, kind: SubscriptionKind) -> Vec<String> {
        self.inner.read().by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.inner.read().subscriptions.len()
    }

    pub fn count_by_kind(&self, kind: SubscriptionKind) -> usize {
        self.inner.read().by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn count_by_connection(&self, connection_id: &str) -> usize {
        self.inner.read().by_connection.get(connection_id).map_or(0, Vec::len)
    }

    fn unindex<K: std::hash::Hash + Eq>(index: &mut HashMap<K, Vec<String>>, key: &K, id: &str) {
        if let Some(ids) = index.get_mut(key) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }
}
