//! Node self-description and statistics documents.
//!
//! Published as JSON: the inspect document goes to `edgebus/nodes/inspect`
//! at role startup so fleet-inventory collaborators can discover which
//! virtual sub-devices a node exposes; statistics go to
//! `edgebus/statistics/{nodeId}` periodically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of node roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Event source.
    Trigger,
    /// Request server.
    Endpoint,
    /// Request client / event consumer.
    Driver,
}

impl NodeType {
    /// Role name as used in topics and client ids.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Endpoint => "endpoint",
            Self::Driver => "driver",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One virtual sub-device exposed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNodeInfo {
    /// Addressable id; namespaced under the owning node id before
    /// publication.
    pub virtual_id: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

/// Self-description document broadcast at role startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspect {
    /// Host operating system.
    pub host_os: String,
    /// Host CPU architecture.
    pub host_arch: String,
    /// Role of the announcing node.
    pub node_type: NodeType,
    /// Vendor name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    /// Driver or adapter name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub driver_name: String,
    /// Virtual sub-devices the node exposes.
    #[serde(default)]
    pub virtual_nodes: Vec<VirtualNodeInfo>,
}

impl Inspect {
    /// New document for the given role, pre-filled with the host OS and
    /// architecture.
    #[must_use]
    pub fn new(node_type: NodeType) -> Self {
        Self {
            host_os: std::env::consts::OS.to_string(),
            host_arch: std::env::consts::ARCH.to_string(),
            node_type,
            vendor: String::new(),
            driver_name: String::new(),
            virtual_nodes: Vec::new(),
        }
    }

    /// Namespace every virtual id under the node's own id. Already-prefixed
    /// ids are left unchanged, so the operation is idempotent.
    #[must_use]
    pub fn namespaced(mut self, node_id: &str) -> Self {
        let prefix = format!("{node_id}:");
        for virtual_node in &mut self.virtual_nodes {
            if !virtual_node.virtual_id.starts_with(&prefix) {
                virtual_node.virtual_id = format!("{prefix}{}", virtual_node.virtual_id);
            }
        }
        self
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Lightweight self-statistics published by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Milliseconds since the role started.
    pub uptime_ms: u64,
    /// Messages sent and received.
    pub message_count: u64,
    /// Payload bytes sent and received.
    pub byte_count: u64,
}

impl Statistics {
    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_json_roundtrip() {
        let inspect = Inspect {
            vendor: "acme".to_string(),
            driver_name: "doorctl".to_string(),
            virtual_nodes: vec![VirtualNodeInfo {
                virtual_id: "door1".to_string(),
                desc: "front door".to_string(),
            }],
            ..Inspect::new(NodeType::Endpoint)
        };

        let bytes = inspect.to_json().unwrap();
        let decoded = Inspect::from_json(&bytes).unwrap();

        assert_eq!(decoded, inspect);
    }

    #[test]
    fn namespacing_prefixes_virtual_ids() {
        let inspect = Inspect {
            virtual_nodes: vec![
                VirtualNodeInfo {
                    virtual_id: "door1".to_string(),
                    desc: String::new(),
                },
                VirtualNodeInfo {
                    virtual_id: "gate:door2".to_string(),
                    desc: String::new(),
                },
            ],
            ..Inspect::new(NodeType::Trigger)
        }
        .namespaced("gate");

        assert_eq!(inspect.virtual_nodes[0].virtual_id, "gate:door1");
        assert_eq!(inspect.virtual_nodes[1].virtual_id, "gate:door2");
    }

    #[test]
    fn statistics_json_roundtrip() {
        let stats = Statistics {
            uptime_ms: 120_000,
            message_count: 42,
            byte_count: 4096,
        };

        let decoded = Statistics::from_json(&stats.to_json().unwrap()).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn node_type_names() {
        assert_eq!(NodeType::Trigger.as_str(), "trigger");
        assert_eq!(NodeType::Endpoint.to_string(), "endpoint");
        assert_eq!(NodeType::Driver.as_str(), "driver");
    }
}
