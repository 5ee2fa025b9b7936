pub mod config;
pub mod metrics;
pub mod rpc;
pub mod subscription;
pub mod websocket;

pub use config::{SubscriptionConfig, WebSocketConfig};
pub use rpc::{ForwardError, ForwardRpc, JsonRpcRequest, JsonRpcResponse};

pub use subscription::{
    BlockHeader, Broadcaster, HeadPoller, LogFilter, LogsPoller, Registry, Subscriber,
    Subscription, SubscriptionKind, SubscriptionManager, SubscriptionParams,
};

pub use websocket::{
    CloseReason, ConnectionManager, ForwardResolver, NetworkInfo, NetworkKey, WsServer,
};
