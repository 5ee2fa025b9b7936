use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_MAX_CONNECTIONS_PER_NETWORK: usize = 10_000;
pub const DEFAULT_MAX_SUBSCRIPTIONS_PER_CONNECTION: usize = 100;
pub const DEFAULT_MAX_LOG_FILTERS: usize = 50;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Settings for the websocket side of the gateway.
///
/// All fields have serde defaults so a partial config object is enough:
///
/// ```rust
/// use subscription_gateway::WebSocketConfig;
///
/// let config: WebSocketConfig = serde_json::from_str(r#"{"pingInterval": "10s"}"#).unwrap();
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketConfig {
    /// Toggle for the whole upgrade path. Upgrades are rejected when false.
    pub enabled: bool,
    pub max_connections_per_network: usize,
    pub max_subscriptions_per_connection: usize,
    /// How often the server pings each connection.
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// How long a connection may stay silent before it is closed. Any
    /// inbound frame counts as liveness, not just pong frames.
    #[serde(with = "humantime_serde")]
    pub pong_timeout: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections_per_network: DEFAULT_MAX_CONNECTIONS_PER_NETWORK,
            max_subscriptions_per_connection: DEFAULT_MAX_SUBSCRIPTIONS_PER_CONNECTION,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Settings for the per-network pollers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionConfig {
    /// Upstream poll cadence shared by the head and logs pollers.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Cap on distinct active log subscriptions per network.
    pub max_log_filters: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, max_log_filters: DEFAULT_MAX_LOG_FILTERS }
    }
}
