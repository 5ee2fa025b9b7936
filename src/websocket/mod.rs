pub mod connection;
pub mod manager;
pub mod server;

pub use connection::ConnectionHandle;
pub use manager::ConnectionManager;
pub use server::{ForwardResolver, UpgradeError, WsServer};

use std::fmt;

/// Read-only identity of the network a connection is bound to. Used for
/// the manager map key and metric labels.
pub trait NetworkInfo: Send + Sync {
    fn id(&self) -> &str;
    fn project_id(&self) -> &str;
}

/// The `(projectId, chainId)` tuple from the upgrade URL
/// `/{projectId}/{architecture}/{chainId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkKey {
    project_id: String,
    chain_id: u64,
    id: String,
}

impl NetworkKey {
    pub fn new(project_id: impl Into<String>, chain_id: u64) -> Self {
        let project_id = project_id.into();
        let id = format!("evm:{chain_id}");
        Self { project_id, chain_id, id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl NetworkInfo for NetworkKey {
    fn id(&self) -> &str {
        &self.id
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.id)
    }
}

/// Why a connection closed. One reason per connection, first close wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the stream or went away.
    ClientClose,
    /// A read or write error on the transport.
    Error,
    /// The pong deadline passed with no inbound traffic.
    Timeout,
    /// The write queue filled up; closing beats buffering unboundedly.
    Backpressure,
    /// Server-initiated shutdown.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClose => "client_close",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Backpressure => "backpressure",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_key_identity() {
        let key = NetworkKey::new("main", 1);

        assert_eq!(key.id(), "evm:1");
        assert_eq!(key.project_id(), "main");
        assert_eq!(key.chain_id(), 1);
        assert_eq!(key.to_string(), "main/evm:1");
    }

    #[test]
    fn same_tuple_same_key() {
        assert_eq!(NetworkKey::new("main", 137), NetworkKey::new("main", 137));
        assert_ne!(NetworkKey::new("main", 1), NetworkKey::new("main", 137));
        assert_ne!(NetworkKey::new("main", 1), NetworkKey::new("other", 1));
    }
}
