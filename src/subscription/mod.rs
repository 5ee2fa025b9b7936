pub mod broadcaster;
pub mod filter;
pub mod head_poller;
pub mod id;
pub mod logs_poller;
pub mod manager;
pub mod registry;

pub use broadcaster::Broadcaster;
pub use filter::{FilterError, LogFilter};
pub use head_poller::{BlockHeader, HeadPoller};
pub use logs_poller::LogsPoller;
pub use manager::{SubscribeError, SubscriptionManager};
pub use registry::{Registry, RegistryError};

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::ForwardError;

/// The kind of events a subscription delivers.
///
/// `newPendingTransactions` and `syncing` are reserved by the protocol but
/// not implemented; the dispatcher rejects them with invalid params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    NewHeads,
    Logs,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 2] = [Self::NewHeads, Self::Logs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::Logs => "logs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "newHeads" => Some(Self::NewHeads),
            "logs" => Some(Self::Logs),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific parameters, validated when the subscription is created.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionParams {
    NewHeads,
    Logs(LogFilter),
}

/// One active subscription. Never migrates between connections.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub kind: SubscriptionKind,
    pub params: SubscriptionParams,
    pub connection_id: String,
    pub created_at: Instant,
}

/// Failure to hand a notification to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("write queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

impl NotifyError {
    pub(crate) fn cause(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Sink for notification frames, implemented by the owning connection.
///
/// `notify` must never block: it enqueues onto the connection's bounded
/// write queue and reports failure instead of waiting, so a slow client
/// cannot stall a poll tick.
pub trait Subscriber: Send + Sync {
    fn connection_id(&self) -> &str;
    fn notify(&self, subscription_id: &str, frame: String) -> Result<(), NotifyError>;
}

/// Why a single poll tick produced nothing.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("upstream returned error {code}: {message}")]
    Upstream { code: i64, message: String },
    #[error("malformed upstream result: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty upstream result")]
    EmptyResult,
}

impl PollError {
    pub(crate) fn cause(&self) -> &'static str {
        match self {
            Self::Forward(_) => "forward",
            Self::Upstream { .. } => "upstream",
            Self::Parse(_) => "parse",
            Self::EmptyResult => "empty",
        }
    }
}
