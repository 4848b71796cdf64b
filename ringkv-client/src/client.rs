//! Client session and store operations.
//!
//! # Routing
//!
//! With server-side routing every request goes to the session's current
//! node, which forwards internally. With client-side routing the client
//! hashes the key and talks to the owning node directly. Requests against
//! the metadata store always use the current node.
//!
//! # Versioning
//!
//! `put` and `delete` without an explicit version read the key first and
//! derive the version from what they find. Read and write are separate
//! requests; the pair is not atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use ringkv_core::{
    increment, Cluster, ConflictResolver, Error, LastWriteWins, NodeId, Result, StoreDefinition,
    VectorClock, Versioned,
};
use ringkv_routing::Router;
use ringkv_wire::{Request, RequestType, Response};
use tracing::{debug, info};

use crate::config::{ClientConfig, METADATA_STORE};
use crate::failover::ConnectionManager;
use crate::serializer::{IdentitySerializer, ValueSerializer};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Store to use instead of the client's default store.
    pub store: Option<String>,
    /// Version to write or delete; fetched from the store when absent.
    pub version: Option<VectorClock>,
    /// Return stored bytes without running the value serializer.
    pub raw: bool,
    /// Ask the receiving node to forward the request to the key's owner.
    pub should_route: bool,
}

impl RequestOptions {
    /// Targets `store` instead of the default store.
    #[must_use]
    pub fn for_store(store: impl Into<String>) -> Self {
        Self {
            store: Some(store.into()),
            ..Self::default()
        }
    }

    /// Writes or deletes at `version`.
    #[must_use]
    pub fn with_version(mut self, version: VectorClock) -> Self {
        self.version = Some(version);
        self
    }

    /// Skips value deserialization.
    #[must_use]
    pub const fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Sets the should-route flag.
    #[must_use]
    pub const fn with_should_route(mut self, should_route: bool) -> Self {
        self.should_route = should_route;
        self
    }
}

/// Operations on a key-value store.
#[async_trait]
pub trait StoreOperations: Send + Sync {
    /// Reads `key`. Returns `None` if the key does not exist; multiple
    /// versions are reduced to one by the conflict resolver.
    async fn get(&self, key: Bytes, options: &RequestOptions) -> Result<Option<Versioned>>;

    /// Reads several keys with one request. Missing keys are absent from
    /// the result. Not available with client-side routing.
    async fn get_all(
        &self,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned>>;

    /// Reads several keys, with one request per owning node under
    /// client-side routing.
    async fn bulk_get(
        &self,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned>>;

    /// Writes `value` and returns it with the version it was written at.
    async fn put(&self, key: Bytes, value: Bytes, options: &RequestOptions) -> Result<Versioned>;

    /// Deletes `key`. Returns true if the store reported a deletion.
    async fn delete(&self, key: Bytes, options: &RequestOptions) -> Result<bool>;
}

/// A client session bound to one cluster and a default store.
pub struct Client {
    store: StoreDefinition,
    router: Router,
    connections: ConnectionManager,
    resolver: Arc<dyn ConflictResolver>,
    serializer: Arc<dyn ValueSerializer>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("store", &self.store)
            .field("nodes", &self.connections.cluster().len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to `cluster`, starting at the first node (or a random one
    /// if `config.randomize` is set).
    ///
    /// # Errors
    /// Returns a config error for invalid configuration or topology, and
    /// `ReconnectExhausted` if no node accepts a connection.
    pub async fn connect(cluster: Cluster, config: ClientConfig) -> Result<Self> {
        Self::connect_at(cluster, config, 0).await
    }

    /// Connects to `cluster`, starting at node index `seed_index` unless
    /// `config.randomize` is set.
    ///
    /// # Errors
    /// Same as [`connect`](Self::connect).
    pub async fn connect_at(cluster: Cluster, config: ClientConfig, seed_index: usize) -> Result<Self> {
        config.validate()?;

        let start = if config.randomize {
            rand::thread_rng().gen_range(0..cluster.len())
        } else {
            seed_index
        };
        let router = Router::new(cluster.clone(), &config.store)?;
        let connections = ConnectionManager::new(cluster, config.connection, start);
        let connection = connections.reconnect(0).await?;

        info!(
            store = %config.store.name,
            routing = ?config.store.routing,
            node_id = connection.node_id().get(),
            "Client connected"
        );
        Ok(Self::from_parts(config.store, router, connections))
    }

    /// Assembles a client from its collaborators, with the last-write-wins
    /// resolver and the identity serializer.
    #[must_use]
    pub fn from_parts(
        store: StoreDefinition,
        router: Router,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            store,
            router,
            connections,
            resolver: Arc::new(LastWriteWins),
            serializer: Arc::new(IdentitySerializer),
        }
    }

    /// Replaces the conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the value serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ValueSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Returns the default store definition.
    #[must_use]
    pub const fn store(&self) -> &StoreDefinition {
        &self.store
    }

    /// Returns the router.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the connection manager.
    #[must_use]
    pub const fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Changes the request timeout.
    pub async fn set_timeout(&self, timeout: Duration) {
        self.connections.set_timeout(timeout).await;
    }

    /// Closes every connection. Later requests reconnect.
    pub async fn close(&self) {
        self.connections.close().await;
        debug!(store = %self.store.name, "Client closed");
    }

    fn store_name<'a>(&'a self, options: &'a RequestOptions) -> &'a str {
        options.store.as_deref().unwrap_or(&self.store.name)
    }

    fn routes_by_key(&self, store: &str) -> bool {
        self.store.routing.is_client() && store != METADATA_STORE
    }

    /// Returns the node a key-routed request must go to, or `None` for the
    /// current node.
    fn target(&self, store: &str, key: &[u8]) -> Result<Option<NodeId>> {
        if self.routes_by_key(store) {
            Ok(Some(self.router.master_node(key)?.id))
        } else {
            Ok(None)
        }
    }

    async fn dispatch(&self, target: Option<NodeId>, request: Request) -> Result<Response> {
        match target {
            Some(node_id) => self.connections.send_to(node_id, request).await,
            None => self.connections.send_request(request).await,
        }
    }

    /// Reduces a key's versions to one and deserializes it.
    fn resolve(&self, versions: Vec<Versioned>, raw: bool) -> Result<Option<Versioned>> {
        let chosen = if versions.len() > 1 {
            self.resolver.resolve(versions)
        } else {
            versions.into_iter().next()
        };
        let Some(mut chosen) = chosen else {
            return Ok(None);
        };
        if !raw {
            chosen.value = self.serializer.deserialize(chosen.value)?;
        }
        Ok(Some(chosen))
    }

    /// Sends one GET_ALL and resolves every returned key.
    async fn fetch_all(
        &self,
        target: Option<NodeId>,
        store: &str,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned>> {
        let request = Request::get_all(store, keys).with_should_route(options.should_route);
        let values = match self.dispatch(target, request).await? {
            Response::GetAll(values) => values,
            other => return Err(unexpected(RequestType::GetAll, &other)),
        };

        let mut found = HashMap::with_capacity(values.len());
        for (key, versions) in values {
            if let Some(versioned) = self.resolve(versions, options.raw)? {
                found.insert(key, versioned);
            }
        }
        Ok(found)
    }

    /// Returns the version a write without an explicit version builds on.
    async fn current_version(
        &self,
        key: &Bytes,
        options: &RequestOptions,
    ) -> Result<Option<VectorClock>> {
        if let Some(version) = &options.version {
            return Ok(Some(version.clone()));
        }
        let lookup = RequestOptions {
            version: None,
            raw: true,
            ..options.clone()
        };
        let current = self.get(key.clone(), &lookup).await?;
        Ok(current.map(|versioned| versioned.version))
    }
}

#[async_trait]
impl StoreOperations for Client {
    async fn get(&self, key: Bytes, options: &RequestOptions) -> Result<Option<Versioned>> {
        let store = self.store_name(options);
        let target = self.target(store, &key)?;

        let request = Request::get(store, key).with_should_route(options.should_route);
        let versions = match self.dispatch(target, request).await? {
            Response::Get(versions) => versions,
            other => return Err(unexpected(RequestType::Get, &other)),
        };
        if versions.len() > 1 {
            debug!(store = %store, versions = versions.len(), "Resolving concurrent versions");
        }
        self.resolve(versions, options.raw)
    }

    async fn get_all(
        &self,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned>> {
        let store = self.store_name(options);
        if self.routes_by_key(store) {
            return Err(Error::config(
                "get_all is not available with client-side routing, use bulk_get",
            ));
        }
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.fetch_all(None, store, keys, options).await
    }

    async fn bulk_get(
        &self,
        keys: Vec<Bytes>,
        options: &RequestOptions,
    ) -> Result<HashMap<Bytes, Versioned>> {
        let store = self.store_name(options);
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        if !self.routes_by_key(store) {
            return self.fetch_all(None, store, keys, options).await;
        }

        let buckets = self.router.bucket_by_node(&keys)?;
        debug!(store = %store, keys = keys.len(), nodes = buckets.len(), "Bulk get");

        let fetches = buckets
            .into_iter()
            .map(|(node_id, bucket)| self.fetch_all(Some(node_id), store, bucket, options));
        let results = futures::future::try_join_all(fetches).await?;

        let mut merged = HashMap::with_capacity(keys.len());
        for found in results {
            merged.extend(found);
        }
        Ok(merged)
    }

    async fn put(&self, key: Bytes, value: Bytes, options: &RequestOptions) -> Result<Versioned> {
        let store = self.store_name(options);
        let target = self.target(store, &key)?;

        let version = match &options.version {
            Some(version) => version.clone(),
            None => {
                let current = self.current_version(&key, options).await?;
                let writer = match target {
                    Some(node_id) => node_id,
                    None => self.connections.current_node().await?.id,
                };
                increment(current.as_ref(), writer)
            }
        };

        let stored = self.serializer.serialize(value.clone())?;
        let request = Request::put(store, key, Versioned::new(stored, version.clone()))
            .with_should_route(options.should_route);
        match self.dispatch(target, request).await? {
            Response::Put => {}
            other => return Err(unexpected(RequestType::Put, &other)),
        }

        debug!(store = %store, version = ?version, "Put accepted");
        Ok(Versioned::new(value, version))
    }

    async fn delete(&self, key: Bytes, options: &RequestOptions) -> Result<bool> {
        let store = self.store_name(options);
        let targets: Vec<Option<NodeId>> = if self.routes_by_key(store) {
            self.router
                .responsible_nodes(&key)?
                .iter()
                .map(|node| Some(node.id))
                .collect()
        } else {
            vec![None]
        };

        let Some(version) = self.current_version(&key, options).await? else {
            debug!(store = %store, "Key not found, nothing to delete");
            return Ok(false);
        };

        let mut deleted = false;
        for target in targets {
            let request = Request::delete(store, key.clone(), version.clone())
                .with_should_route(options.should_route);
            match self.dispatch(target, request).await? {
                Response::Delete { deleted: removed } => deleted |= removed,
                other => return Err(unexpected(RequestType::Delete, &other)),
            }
        }
        Ok(deleted)
    }
}

fn unexpected(expected: RequestType, response: &Response) -> Error {
    Error::protocol(format!(
        "expected {expected:?} response, got {:?}",
        response.request_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::serializer::StringSerializer;
    use ringkv_core::{ClockEntry, Node, PartitionId, RoutingMode};

    fn offline_client(routing: RoutingMode) -> Client {
        let nodes = (0..3)
            .map(|id| {
                Node::new(
                    NodeId::new(id),
                    "127.0.0.1",
                    1,
                    (0..3).map(|i| PartitionId::new(i * 3 + id)),
                )
            })
            .collect();
        let cluster = Cluster::new(nodes).unwrap();
        let store = StoreDefinition::new("test").with_routing(routing);
        let router = Router::new(cluster.clone(), &store).unwrap();
        let connections = ConnectionManager::new(cluster, ConnectionConfig::fast_for_testing(), 0);
        Client::from_parts(store, router, connections)
    }

    fn versioned(value: &'static str, timestamp: i64) -> Versioned {
        Versioned::new(
            Bytes::from_static(value.as_bytes()),
            VectorClock::from_entries(
                [ClockEntry {
                    node_id: NodeId::new(0),
                    version: 1,
                }],
                timestamp,
            ),
        )
    }

    #[test]
    fn test_resolve_empty_is_none() {
        let client = offline_client(RoutingMode::Server);
        assert!(client.resolve(Vec::new(), false).unwrap().is_none());
    }

    #[test]
    fn test_resolve_uses_injected_resolver() {
        let first = |versions: Vec<Versioned>| versions.into_iter().next();
        let client = offline_client(RoutingMode::Server).with_resolver(Arc::new(first));

        let chosen = client
            .resolve(vec![versioned("old", 1), versioned("new", 2)], false)
            .unwrap()
            .unwrap();
        assert_eq!(chosen.value, Bytes::from_static(b"old"));

        let client = offline_client(RoutingMode::Server);
        let chosen = client
            .resolve(vec![versioned("old", 1), versioned("new", 2)], false)
            .unwrap()
            .unwrap();
        assert_eq!(chosen.value, Bytes::from_static(b"new"));
    }

    #[test]
    fn test_raw_skips_serializer() {
        let client =
            offline_client(RoutingMode::Server).with_serializer(Arc::new(StringSerializer));
        let invalid = Versioned::new(Bytes::from_static(&[0xff]), VectorClock::new());

        assert!(client.resolve(vec![invalid.clone()], false).is_err());
        assert_eq!(
            client.resolve(vec![invalid.clone()], true).unwrap(),
            Some(invalid)
        );
    }

    #[test]
    fn test_metadata_store_ignores_client_routing() {
        let client = offline_client(RoutingMode::Client);
        assert!(client.routes_by_key("test"));
        assert!(!client.routes_by_key(METADATA_STORE));
        assert_eq!(client.target(METADATA_STORE, b"cluster.xml").unwrap(), None);
        assert_eq!(
            client.target("test", b"chocolate").unwrap(),
            Some(NodeId::new(1))
        );
    }

    #[test]
    fn test_store_override() {
        let client = offline_client(RoutingMode::Server);
        let options = RequestOptions::for_store("other");
        assert_eq!(client.store_name(&options), "other");
        assert_eq!(client.store_name(&RequestOptions::default()), "test");
    }

    #[tokio::test]
    async fn test_get_all_rejected_under_client_routing() {
        let client = offline_client(RoutingMode::Client);
        let err = client
            .get_all(vec![Bytes::from_static(b"a")], &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
