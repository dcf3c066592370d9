//! Network roster file format.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_core::Graph;
use strand_net::{NodeId, Session, SyncPolicy, UdpTransport};

use crate::error::{ConfigError, Result};
use crate::validation::{self, Issue};

/// One node of the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Node label, as used by remote connections.
    pub label: String,
    /// UDP address the node listens on.
    pub addr: SocketAddr,
}

/// Handshake timing, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Worker sleep between polls.
    pub poll_interval_ms: u64,
    /// Resend period for unanswered handshake messages.
    pub retry_interval_ms: u64,
    /// Time allowed for the whole handshake.
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(SyncPolicy::default())
    }
}

impl From<SyncPolicy> for SyncConfig {
    fn from(policy: SyncPolicy) -> Self {
        Self {
            poll_interval_ms: policy.poll_interval.as_millis() as u64,
            retry_interval_ms: policy.retry_interval.as_millis() as u64,
            timeout_ms: policy.timeout.as_millis() as u64,
        }
    }
}

impl SyncConfig {
    /// The policy the sync engine runs with.
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// The roster shared by every node, plus which entry is this machine.
///
/// Every node must list the same nodes in the same order; a node's position
/// in the list is its id on the wire.
///
/// # TOML Format
///
/// ```toml
/// local = "left"
///
/// [[nodes]]
/// label = "left"
/// addr = "192.168.1.10:7400"
///
/// [[nodes]]
/// label = "right"
/// addr = "192.168.1.11:7400"
///
/// [sync]
/// retry_interval_ms = 100
/// timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Label of this machine's roster entry.
    pub local: String,

    /// Roster, in id order.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Handshake timing.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl NetworkConfig {
    /// Create a roster with no nodes.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            nodes: Vec::new(),
            sync: SyncConfig::default(),
        }
    }

    /// Append a node to the roster.
    pub fn with_node(mut self, label: impl Into<String>, addr: SocketAddr) -> Self {
        self.nodes.push(NodeConfig {
            label: label.into(),
            addr,
        });
        self
    }

    /// Load a roster from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a roster from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the roster to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
    }

    /// Convert the roster to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Node labels in id order.
    pub fn labels(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.label.clone()).collect()
    }

    /// Node addresses in id order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(|n| n.addr).collect()
    }

    /// Id of a node label.
    pub fn node_id(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.label == label)
            .and_then(|i| u16::try_from(i).ok())
            .map(NodeId)
    }

    /// This machine's id.
    pub fn local_node(&self) -> Result<NodeId> {
        self.node_id(&self.local)
            .ok_or_else(|| ConfigError::UnknownLocalNode(self.local.clone()))
    }

    /// Checks the roster. Every problem found is returned.
    pub fn validate(&self) -> Vec<Issue> {
        validation::validate_network(self)
    }

    /// Binds this machine's UDP socket.
    pub fn bind(&self) -> Result<UdpTransport> {
        let local = self.local_node()?;
        let transport = UdpTransport::bind(local, self.addresses())?;
        tracing::info!(node = %self.local, %local, nodes = self.nodes.len(), "network bound");
        Ok(transport)
    }

    /// Builds a networked session around `graph`.
    pub fn session(&self, graph: Graph) -> Result<Session> {
        let transport = self.bind()?;
        Ok(Session::with_network(
            graph,
            Box::new(transport),
            self.labels(),
            self.sync.policy(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
local = "right"

[[nodes]]
label = "left"
addr = "127.0.0.1:7400"

[[nodes]]
label = "right"
addr = "127.0.0.1:7401"

[sync]
timeout_ms = 2000
"#;

    #[test]
    fn parses_roster_in_order() {
        let net = NetworkConfig::from_toml(ROSTER).unwrap();
        assert_eq!(net.labels(), vec!["left".to_string(), "right".to_string()]);
        assert_eq!(net.local_node().unwrap(), NodeId(1));
        assert_eq!(net.node_id("left"), Some(NodeId(0)));
        assert_eq!(net.node_id("nowhere"), None);
        assert_eq!(net.addresses()[1], "127.0.0.1:7401".parse().unwrap());
    }

    #[test]
    fn missing_sync_fields_take_defaults() {
        let net = NetworkConfig::from_toml(ROSTER).unwrap();
        let policy = net.sync.policy();
        let default = SyncPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(2));
        assert_eq!(policy.poll_interval, default.poll_interval);
        assert_eq!(policy.retry_interval, default.retry_interval);
    }

    #[test]
    fn bad_address_fails_to_parse() {
        let toml = r#"
local = "a"
[[nodes]]
label = "a"
addr = "not-an-address"
"#;
        assert!(matches!(
            NetworkConfig::from_toml(toml),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn unknown_local_node_is_an_error() {
        let net = NetworkConfig::new("ghost").with_node("a", "127.0.0.1:7400".parse().unwrap());
        assert!(matches!(
            net.local_node(),
            Err(ConfigError::UnknownLocalNode(ref l)) if l == "ghost"
        ));
        assert!(matches!(net.bind(), Err(ConfigError::UnknownLocalNode(_))));
    }

    #[test]
    fn toml_string_round_trip() {
        let net = NetworkConfig::new("a")
            .with_node("a", "127.0.0.1:7400".parse().unwrap())
            .with_node("b", "[::1]:7401".parse().unwrap());
        let text = net.to_toml().unwrap();
        assert_eq!(NetworkConfig::from_toml(&text).unwrap(), net);
    }

    #[test]
    fn bind_on_an_ephemeral_port() {
        let net = NetworkConfig::new("solo").with_node("solo", "127.0.0.1:0".parse().unwrap());
        let transport = net.bind().unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }
}
