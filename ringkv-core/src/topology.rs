//! Cluster topology as handed over by the bootstrap collaborator.
//!
//! Nothing here parses documents: nodes and store definitions arrive already
//! parsed and stay immutable for the lifetime of a client session.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{NodeId, PartitionId};

/// A storage node and the partitions it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node id, also used as the vector-clock entry key.
    pub id: NodeId,
    /// Hostname or IP address.
    pub host: String,
    /// Client socket port.
    pub port: u16,
    /// Partitions owned by this node.
    pub partitions: BTreeSet<PartitionId>,
}

impl Node {
    /// Creates a node.
    #[must_use]
    pub fn new(
        id: NodeId,
        host: impl Into<String>,
        port: u16,
        partitions: impl IntoIterator<Item = PartitionId>,
    ) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            partitions: partitions.into_iter().collect(),
        }
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if this node listens on the given host and port.
    #[must_use]
    pub fn is_at(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Where requests are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// The client connects to the node owning the key.
    Client,
    /// The client talks to any node, which forwards internally.
    #[default]
    Server,
}

impl RoutingMode {
    /// Parses the routing mode as written in store definitions.
    ///
    /// # Errors
    /// Returns a config error for anything other than `client` or `server`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(Error::config(format!("unknown routing mode '{other}'"))),
        }
    }

    /// Returns true for client-side routing.
    #[must_use]
    pub const fn is_client(self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Serializer type of a store's keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyType {
    /// UTF-8 string keys. The only type usable with client-side routing.
    #[default]
    String,
    /// Any other serializer name (`json`, `avro-generic`, ...).
    Other(String),
}

impl KeyType {
    /// Maps a serializer name to a key type.
    #[must_use]
    pub fn from_serializer(name: &str) -> Self {
        if name == "string" {
            Self::String
        } else {
            Self::Other(name.to_string())
        }
    }
}

/// Store configuration consumed at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefinition {
    /// Store name.
    pub name: String,
    /// Routing mode for this store.
    pub routing: RoutingMode,
    /// Number of partitions holding a copy of each key.
    pub replication_factor: u32,
    /// Key serializer type.
    pub key_type: KeyType,
}

impl StoreDefinition {
    /// Creates a server-routed, single-replica store with string keys.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing: RoutingMode::Server,
            replication_factor: 1,
            key_type: KeyType::String,
        }
    }

    /// Sets the routing mode.
    #[must_use]
    pub const fn with_routing(mut self, routing: RoutingMode) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the replication factor.
    #[must_use]
    pub const fn with_replication_factor(mut self, replication_factor: u32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    /// Sets the key type.
    #[must_use]
    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    /// Returns a config error if the name is empty or the replication factor is zero.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("store name cannot be empty"));
        }
        if self.replication_factor == 0 {
            return Err(Error::config(format!(
                "store '{}' has replication factor 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// The ordered, immutable node list of a cluster.
///
/// Cheap to clone; all clones share the same nodes.
#[derive(Debug, Clone)]
pub struct Cluster {
    nodes: Arc<[Node]>,
}

impl Cluster {
    /// Creates a cluster from its nodes.
    ///
    /// # Errors
    /// Returns a config error if the list is empty or node ids repeat.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::config("cluster has no nodes"));
        }
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !seen.insert(node.id) {
                return Err(Error::config(format!("duplicate node id {}", node.id)));
            }
        }
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    /// Returns the nodes in bootstrap order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a cluster has at least one node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node at `index`.
    #[must_use]
    pub fn node_at(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the position of the node with the given id.
    #[must_use]
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Returns the position of the node listening on `host:port`.
    #[must_use]
    pub fn index_of_addr(&self, host: &str, port: u16) -> Option<usize> {
        self.nodes.iter().position(|n| n.is_at(host, port))
    }
}
