//! Partition router - routes keys to the nodes that store them.
//!
//! The hash must agree bit-for-bit with the server's, otherwise client-side
//! and server-side routing would place the same key on different nodes.

use std::collections::BTreeMap;

use bytes::Bytes;
use ringkv_core::{Cluster, Error, KeyType, Node, NodeId, PartitionId, Result, StoreDefinition};
use tracing::trace;

use crate::ring::PartitionRing;

/// FNV-1 offset basis (32-bit).
const FNV_BASIS: u32 = 0x811c_9dc5;

/// FNV-1 prime (32-bit), `(1 << 24) + 0x193`.
const FNV_PRIME: u32 = (1 << 24) + 0x193;

/// Routes keys of one store across an immutable cluster.
#[derive(Debug, Clone)]
pub struct Router {
    cluster: Cluster,
    ring: PartitionRing,
    replication_factor: usize,
    key_type: KeyType,
}

impl Router {
    /// Builds the ring for `cluster` and prepares routing for `store`.
    ///
    /// # Errors
    /// Returns a config error for an invalid store or overlapping partitions.
    pub fn new(cluster: Cluster, store: &StoreDefinition) -> Result<Self> {
        store.validate()?;
        let ring = PartitionRing::build(&cluster)?;
        Ok(Self {
            cluster,
            ring,
            replication_factor: store.replication_factor as usize,
            key_type: store.key_type.clone(),
        })
    }

    /// Hashes key bytes with the server's FNV variant.
    ///
    /// Each byte is XORed into the hash before multiplying by the prime;
    /// arithmetic wraps at 32 bits and the result is read as signed.
    #[must_use]
    pub fn hash(key: &[u8]) -> i32 {
        let mut hash = FNV_BASIS;
        for &byte in key {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // Reinterpret the bits; the server treats the hash as a signed int.
        #[allow(clippy::cast_possible_wrap)]
        let signed = hash as i32;
        signed
    }

    /// Returns the ring position of the key's master partition:
    /// `abs(hash(key) mod ring_size)`.
    #[must_use]
    pub fn master_partition(&self, key: &[u8]) -> usize {
        // Safe cast: the ring is bounded by PARTITIONS_MAX which fits in i32.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let size = self.ring.len() as i32;
        (Self::hash(key) % size).unsigned_abs() as usize
    }

    /// Returns up to `replication_factor` distinct partitions, starting at
    /// ring position `master` and wrapping around.
    #[must_use]
    pub fn replication_list(&self, master: usize) -> Vec<PartitionId> {
        let size = self.ring.len();
        let wanted = self.replication_factor.min(size);
        let mut partitions = Vec::with_capacity(wanted);
        let mut index = master % size;

        for _ in 0..size {
            if partitions.len() >= wanted {
                break;
            }
            if let Some((partition, _)) = self.ring.at(index) {
                if !partitions.contains(&partition) {
                    partitions.push(partition);
                }
            }
            index = (index + 1) % size;
        }
        partitions
    }

    /// Returns the nodes holding `key`, primary first.
    ///
    /// # Errors
    /// Returns a config error unless the store uses string keys and `key`
    /// is valid UTF-8.
    pub fn responsible_nodes(&self, key: &[u8]) -> Result<Vec<&Node>> {
        self.check_key(key)?;

        let master = self.master_partition(key);
        let mut nodes: Vec<&Node> = Vec::new();
        for partition in self.replication_list(master) {
            let Some(node) = self.ring.owner(partition).and_then(|id| self.cluster.node(id))
            else {
                continue;
            };
            if !nodes.iter().any(|n| n.id == node.id) {
                nodes.push(node);
            }
        }

        trace!(
            master,
            nodes = ?nodes.iter().map(|n| n.id).collect::<Vec<_>>(),
            "routed key"
        );
        Ok(nodes)
    }

    /// Returns the primary node for `key`.
    ///
    /// # Errors
    /// Same conditions as [`responsible_nodes`](Self::responsible_nodes).
    pub fn master_node(&self, key: &[u8]) -> Result<&Node> {
        self.responsible_nodes(key)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::config("no node owns the key's partition"))
    }

    /// Splits a batch of keys by primary node.
    ///
    /// Keys keep their relative order within each bucket.
    ///
    /// # Errors
    /// Returns a config error if any key cannot be routed.
    pub fn bucket_by_node(&self, keys: &[Bytes]) -> Result<BTreeMap<NodeId, Vec<Bytes>>> {
        let mut buckets: BTreeMap<NodeId, Vec<Bytes>> = BTreeMap::new();
        for key in keys {
            let node = self.master_node(key)?;
            buckets.entry(node.id).or_default().push(key.clone());
        }
        Ok(buckets)
    }

    /// Returns the cluster being routed over.
    #[must_use]
    pub const fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Returns the partition ring.
    #[must_use]
    pub const fn ring(&self) -> &PartitionRing {
        &self.ring
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if let KeyType::Other(name) = &self.key_type {
            return Err(Error::config(format!(
                "client-side routing only supports string keys, store uses '{name}'"
            )));
        }
        if std::str::from_utf8(key).is_err() {
            return Err(Error::config(
                "client-side routing only supports string keys, key is not UTF-8",
            ));
        }
        Ok(())
    }
}
