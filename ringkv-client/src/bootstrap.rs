//! Bootstrap from seed hosts.
//!
//! Seeds are tried in order. The first seed that negotiates the protocol
//! and serves both metadata documents wins; the documents are handed to a
//! caller-supplied [`MetadataParser`] and the client session is opened on
//! the parsed topology.

use std::fmt;

use bytes::Bytes;
use ringkv_core::{
    Cluster, ConflictResolver, Error, LastWriteWins, Node, NodeId, Result, StoreDefinition,
};
use ringkv_wire::{Request, Response};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::{ClientConfig, ConnectionConfig, METADATA_STORE};
use crate::connection::Connection;

/// Key of the cluster topology document in the metadata store.
pub const CLUSTER_DOCUMENT: &str = "cluster.xml";

/// Key of the store definitions document in the metadata store.
pub const STORES_DOCUMENT: &str = "stores.xml";

/// Placeholder id for seed connections; the real id is only known once the
/// cluster document is parsed.
const SEED_NODE_ID: NodeId = NodeId::new(-1);

/// Turns raw metadata documents into topology.
pub trait MetadataParser: Send + Sync {
    /// Parses the cluster document into its node list.
    ///
    /// # Errors
    /// Returns an error if the document is malformed.
    fn parse_cluster(&self, document: &[u8]) -> Result<Vec<Node>>;

    /// Parses the stores document and returns the definition of `store`.
    ///
    /// # Errors
    /// Returns an error if the document is malformed or lacks `store`.
    fn parse_store(&self, document: &[u8], store: &str) -> Result<StoreDefinition>;
}

/// A host to bootstrap from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedHost {
    /// Hostname or IP address.
    pub host: String,
    /// Client socket port.
    pub port: u16,
}

impl SeedHost {
    /// Creates a seed host.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`.
    ///
    /// # Errors
    /// Returns a config error if the port is missing or invalid.
    pub fn parse(value: &str) -> Result<Self> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("seed '{value}' is not host:port")))?;
        if host.is_empty() {
            return Err(Error::config(format!("seed '{value}' has no host")));
        }
        let port = port
            .parse()
            .map_err(|_| Error::config(format!("seed '{value}' has an invalid port")))?;
        Ok(Self::new(host, port))
    }

    fn as_node(&self) -> Node {
        Node::new(SEED_NODE_ID, self.host.clone(), self.port, std::iter::empty())
    }
}

impl fmt::Display for SeedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Store the client session is opened for.
    pub store: String,
    /// Connection timing, used for seeds and for the session.
    pub connection: ConnectionConfig,
    /// Start on a random node instead of the seed that answered.
    pub randomize: bool,
}

impl BootstrapConfig {
    /// Creates a config for `store` with default timing.
    #[must_use]
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            connection: ConnectionConfig::default(),
            randomize: true,
        }
    }

    /// Sets the connection configuration.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Sets whether the start node is picked at random.
    #[must_use]
    pub const fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }
}

/// Raw metadata documents served by a seed.
#[derive(Debug, Clone)]
struct Documents {
    cluster: Bytes,
    stores: Bytes,
}

/// Discovers the cluster from `seeds` and opens a client session.
///
/// # Errors
/// Returns `BootstrapFailed` if no seed serves usable metadata, or the
/// session's connect error.
pub async fn bootstrap(
    seeds: &[SeedHost],
    parser: &dyn MetadataParser,
    config: BootstrapConfig,
) -> Result<Client> {
    for seed in seeds {
        match discover(seed, parser, &config).await {
            Ok((cluster, store)) => {
                let seed_index = cluster.index_of_addr(&seed.host, seed.port).unwrap_or(0);
                info!(
                    seed = %seed,
                    nodes = cluster.len(),
                    seed_index,
                    "Cluster discovered"
                );
                let client_config = ClientConfig::new(store)
                    .with_connection(config.connection)
                    .with_randomize(config.randomize);
                return Client::connect_at(cluster, client_config, seed_index).await;
            }
            Err(e) => {
                warn!(seed = %seed, error = %e, "Bootstrap seed failed");
            }
        }
    }

    Err(Error::BootstrapFailed {
        attempts: seeds.len(),
    })
}

async fn discover(
    seed: &SeedHost,
    parser: &dyn MetadataParser,
    config: &BootstrapConfig,
) -> Result<(Cluster, StoreDefinition)> {
    let documents = fetch_documents(seed, &config.connection).await?;
    let cluster = Cluster::new(parser.parse_cluster(&documents.cluster)?)?;
    let store = parser.parse_store(&documents.stores, &config.store)?;
    store.validate()?;
    Ok((cluster, store))
}

async fn fetch_documents(seed: &SeedHost, config: &ConnectionConfig) -> Result<Documents> {
    let connection = Connection::connect(&seed.as_node(), config).await?;
    let cluster = fetch_document(&connection, CLUSTER_DOCUMENT).await?;
    let stores = fetch_document(&connection, STORES_DOCUMENT).await?;
    connection.close();
    Ok(Documents { cluster, stores })
}

async fn fetch_document(connection: &Connection, name: &'static str) -> Result<Bytes> {
    debug!(addr = %connection.addr(), document = name, "Requesting metadata");
    let request = Request::get(METADATA_STORE, Bytes::from_static(name.as_bytes()));
    let versions = match connection.send(request).await? {
        Response::Get(versions) => versions,
        other => {
            return Err(Error::protocol(format!(
                "expected Get response, got {:?}",
                other.request_type()
            )))
        }
    };
    LastWriteWins
        .resolve(versions)
        .map(|versioned| versioned.value)
        .ok_or_else(|| Error::config(format!("metadata document '{name}' not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed() {
        assert_eq!(
            SeedHost::parse("localhost:6666").unwrap(),
            SeedHost::new("localhost", 6666)
        );
        assert_eq!(SeedHost::new("10.0.0.1", 7).to_string(), "10.0.0.1:7");
    }

    #[test]
    fn test_parse_invalid_seed() {
        assert!(SeedHost::parse("localhost").is_err());
        assert!(SeedHost::parse(":6666").is_err());
        assert!(SeedHost::parse("localhost:port").is_err());
        assert!(SeedHost::parse("localhost:70000").is_err());
    }

    #[tokio::test]
    async fn test_no_seeds_fails() {
        struct NoParser;
        impl MetadataParser for NoParser {
            fn parse_cluster(&self, _: &[u8]) -> Result<Vec<Node>> {
                Err(Error::config("unused"))
            }
            fn parse_store(&self, _: &[u8], _: &str) -> Result<StoreDefinition> {
                Err(Error::config("unused"))
            }
        }

        let err = bootstrap(&[], &NoParser, BootstrapConfig::new("test"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BootstrapFailed { attempts: 0 }));
    }
}
