//! Connection and failover manager.
//!
//! Owns the session's active connection (used for server-side routing and
//! metadata reads) and a pool of per-node connections (used when the client
//! routes requests itself).
//!
//! # Failover
//!
//! - A dead active connection is replaced before the next request, starting
//!   with the current node.
//! - Every `reconnect_interval` requests the session moves to the next node,
//!   spreading load across the cluster.
//! - A timed-out request triggers one reconnect to the next node and one
//!   retry. Other errors are returned untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringkv_core::{Cluster, Error, Node, NodeId, Result};
use ringkv_wire::{Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{millis, ConnectionConfig, ROUTED_CONNECT_ATTEMPTS};
use crate::connection::Connection;

/// The session's current position in the node list.
#[derive(Debug)]
struct Active {
    /// Index into the cluster's node list.
    index: usize,
    connection: Option<Arc<Connection>>,
    /// Requests handed the current connection since it was opened.
    served: u64,
}

/// Manages connections to the nodes of one cluster.
#[derive(Debug)]
pub struct ConnectionManager {
    cluster: Cluster,
    config: ConnectionConfig,
    /// Current request timeout; overrides `config.request_timeout`.
    timeout_ms: AtomicU64,
    active: Mutex<Active>,
    routed: Mutex<HashMap<NodeId, Arc<Connection>>>,
}

impl ConnectionManager {
    /// Creates a manager positioned at node `start_index`. No connection is
    /// opened until the first request or an explicit reconnect.
    #[must_use]
    pub fn new(cluster: Cluster, config: ConnectionConfig, start_index: usize) -> Self {
        // Precondition: a cluster always has at least one node.
        debug_assert!(!cluster.is_empty(), "cluster has no nodes");

        let index = start_index % cluster.len().max(1);
        Self {
            timeout_ms: AtomicU64::new(millis(config.request_timeout)),
            cluster,
            config,
            active: Mutex::new(Active {
                index,
                connection: None,
                served: 0,
            }),
            routed: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cluster being managed.
    #[must_use]
    pub const fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Returns the node the session is currently positioned at.
    pub async fn current_node(&self) -> Result<&Node> {
        let index = self.active.lock().await.index;
        self.cluster
            .node_at(index)
            .ok_or_else(|| Error::config(format!("node index {index} out of range")))
    }

    /// Returns the active connection, if one is open.
    pub async fn active_connection(&self) -> Option<Arc<Connection>> {
        self.active.lock().await.connection.clone()
    }

    /// Connects to the node `attempt` positions after the current one,
    /// moving on to the following node after each failed connect.
    ///
    /// # Errors
    /// Returns `ReconnectExhausted` once every node has been probed, or the
    /// first error that is not a connect failure.
    pub async fn reconnect(&self, attempt: usize) -> Result<Arc<Connection>> {
        let mut active = self.active.lock().await;
        self.reconnect_locked(&mut active, attempt).await
    }

    async fn reconnect_locked(
        &self,
        active: &mut Active,
        attempt: usize,
    ) -> Result<Arc<Connection>> {
        if let Some(old) = active.connection.take() {
            old.close();
        }

        let node_count = self.cluster.len();
        let base = active.index;
        for probe in 0..node_count {
            let index = (base + attempt + probe) % node_count;
            let Some(node) = self.cluster.node_at(index) else {
                continue;
            };

            match Connection::connect(node, &self.connection_config()).await {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    active.index = index;
                    active.connection = Some(Arc::clone(&connection));
                    active.served = 0;
                    info!(
                        node_id = node.id.get(),
                        index,
                        probes = probe + 1,
                        "Reconnected"
                    );
                    return Ok(connection);
                }
                Err(e) if e.is_connect_failure() => {
                    warn!(node_id = node.id.get(), error = %e, "Reconnect candidate failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ReconnectExhausted {
            attempts: node_count,
        })
    }

    /// Returns a usable active connection for one request, reconnecting
    /// first if the current one is dead or has served `reconnect_interval`
    /// requests.
    ///
    /// Each call counts as one request against the interval.
    ///
    /// # Errors
    /// Returns an error if a needed reconnect fails.
    pub async fn maybe_reconnect(&self) -> Result<Arc<Connection>> {
        let mut active = self.active.lock().await;
        let interval = self.config.reconnect_interval;

        let connection = match active.connection.clone() {
            None => self.reconnect_locked(&mut active, 0).await?,
            Some(connection) if !connection.is_alive() => {
                debug!(node_id = connection.node_id().get(), "Connection dead, reconnecting");
                self.reconnect_locked(&mut active, 0).await?
            }
            Some(connection) if interval > 0 && active.served >= interval => {
                debug!(
                    node_id = connection.node_id().get(),
                    requests = active.served,
                    "Reconnect interval reached, moving to next node"
                );
                self.reconnect_locked(&mut active, 1).await?
            }
            Some(connection) => connection,
        };
        active.served += 1;
        Ok(connection)
    }

    /// Sends a request on the active connection.
    ///
    /// # Errors
    /// Returns the request's error. A timeout is retried exactly once on
    /// the next node; the retry's outcome is returned as is.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let connection = self.maybe_reconnect().await?;
        match connection.send(request.clone()).await {
            Err(e) if e.is_retryable() => {
                warn!(
                    node_id = connection.node_id().get(),
                    error = %e,
                    "Request timed out, retrying on next node"
                );
                let connection = self.replace_failed(&connection).await?;
                connection.send(request).await
            }
            other => other,
        }
    }

    /// Replaces `failed` with a connection to the next node, unless another
    /// caller already did.
    async fn replace_failed(&self, failed: &Arc<Connection>) -> Result<Arc<Connection>> {
        let mut active = self.active.lock().await;
        let connection = match active.connection.clone() {
            Some(current) if !Arc::ptr_eq(&current, failed) && current.is_alive() => current,
            _ => self.reconnect_locked(&mut active, 1).await?,
        };
        active.served += 1;
        Ok(connection)
    }

    /// Sends a request directly to `node_id`, as client-side routing does.
    ///
    /// # Errors
    /// Returns the request's error. A timeout is retried once on a fresh
    /// connection to the same node.
    pub async fn send_to(&self, node_id: NodeId, request: Request) -> Result<Response> {
        let connection = self.connection_to(node_id).await?;
        match connection.send(request.clone()).await {
            Err(e) if e.is_retryable() => {
                warn!(node_id = node_id.get(), error = %e, "Routed request timed out, retrying");
                self.evict(node_id, &connection).await;
                let connection = self.connection_to(node_id).await?;
                connection.send(request).await
            }
            other => other,
        }
    }

    /// Returns a live pooled connection to `node_id`, opening one with up
    /// to `ROUTED_CONNECT_ATTEMPTS` attempts.
    ///
    /// The pool is not locked while connecting, so a slow node never holds
    /// up requests to other nodes.
    ///
    /// # Errors
    /// Returns a config error for an unknown node and `ReconnectExhausted`
    /// if every attempt fails.
    pub async fn connection_to(&self, node_id: NodeId) -> Result<Arc<Connection>> {
        if let Some(connection) = self.pooled(node_id).await {
            return Ok(connection);
        }

        let node = self
            .cluster
            .node(node_id)
            .ok_or_else(|| Error::config(format!("unknown {node_id}")))?;

        for attempt in 1..=ROUTED_CONNECT_ATTEMPTS {
            match Connection::connect(node, &self.connection_config()).await {
                Ok(connection) => return Ok(self.install(node_id, connection).await),
                Err(e) if e.is_connect_failure() => {
                    warn!(node_id = node_id.get(), attempt, error = %e, "Routed connect failed");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::ReconnectExhausted {
            attempts: ROUTED_CONNECT_ATTEMPTS,
        })
    }

    async fn pooled(&self, node_id: NodeId) -> Option<Arc<Connection>> {
        self.routed
            .lock()
            .await
            .get(&node_id)
            .filter(|connection| connection.is_alive())
            .cloned()
    }

    /// Adds a fresh connection to the pool. If a concurrent caller already
    /// pooled a live one, that one is kept and `connection` is closed.
    async fn install(&self, node_id: NodeId, connection: Connection) -> Arc<Connection> {
        let mut routed = self.routed.lock().await;
        if let Some(existing) = routed.get(&node_id).filter(|c| c.is_alive()) {
            connection.close();
            return Arc::clone(existing);
        }
        let connection = Arc::new(connection);
        routed.insert(node_id, Arc::clone(&connection));
        connection
    }

    async fn evict(&self, node_id: NodeId, failed: &Arc<Connection>) {
        let mut routed = self.routed.lock().await;
        if routed
            .get(&node_id)
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            routed.remove(&node_id);
        }
        failed.close();
    }

    /// Changes the request timeout of every current and future connection.
    pub async fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(millis(timeout), Ordering::Relaxed);
        if let Some(connection) = &self.active.lock().await.connection {
            connection.set_timeout(timeout);
        }
        for connection in self.routed.lock().await.values() {
            connection.set_timeout(timeout);
        }
    }

    /// Returns the current request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Closes every connection.
    pub async fn close(&self) {
        if let Some(connection) = self.active.lock().await.connection.take() {
            connection.close();
        }
        for (_, connection) in self.routed.lock().await.drain() {
            connection.close();
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        self.config.clone().with_request_timeout(self.timeout())
    }
}
