//! Partition ring - mapping of partitions to their owning nodes.
//!
//! The ring is the sorted union of every node's partitions. Partition ids
//! must be exactly `0..n`, so a ring position and the partition id at that
//! position are the same number. A key's master partition is a position on
//! the ring; replicas are the positions that follow it, wrapping around.

use std::collections::BTreeMap;

use ringkv_core::{Cluster, Error, NodeId, PartitionId, Result};

/// Maximum number of partitions supported.
pub const PARTITIONS_MAX: usize = 65_536;

/// Sorted, deduplicated partitions with their owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRing {
    /// Sorted by partition id; each partition appears once.
    entries: Vec<(PartitionId, NodeId)>,
}

impl PartitionRing {
    /// Builds the ring from a cluster's partition assignments.
    ///
    /// # Errors
    /// Returns a config error if two nodes claim the same partition, if no
    /// node owns a partition, if the partition ids are not `0..n`, or if the
    /// ring exceeds `PARTITIONS_MAX`.
    pub fn build(cluster: &Cluster) -> Result<Self> {
        let mut owners: BTreeMap<PartitionId, NodeId> = BTreeMap::new();

        for node in cluster.nodes() {
            for &partition in &node.partitions {
                if let Some(&owner) = owners.get(&partition) {
                    return Err(Error::config(format!(
                        "{partition} is owned by both {owner} and {}",
                        node.id
                    )));
                }
                owners.insert(partition, node.id);
            }
        }

        if owners.is_empty() {
            return Err(Error::config("cluster owns no partitions"));
        }
        if owners.len() > PARTITIONS_MAX {
            return Err(Error::config(format!(
                "too many partitions: {} (max {PARTITIONS_MAX})",
                owners.len()
            )));
        }
        if let Some((position, partition)) = owners
            .keys()
            .enumerate()
            .find(|&(position, partition)| usize::try_from(partition.get()).ok() != Some(position))
        {
            return Err(Error::config(format!(
                "partition ids must be 0..{}, found {partition} at position {position}",
                owners.len()
            )));
        }

        Ok(Self {
            entries: owners.into_iter().collect(),
        })
    }

    /// Returns the number of partitions on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a built ring holds at least one partition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the partition and owner at ring position `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<(PartitionId, NodeId)> {
        self.entries.get(index).copied()
    }

    /// Returns the owner of a partition.
    #[must_use]
    pub fn owner(&self, partition: PartitionId) -> Option<NodeId> {
        self.entries
            .binary_search_by_key(&partition, |&(p, _)| p)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Returns every partition in ring order.
    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.entries.iter().map(|&(p, _)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkv_core::Node;

    fn node(id: i32, partitions: &[i32]) -> Node {
        Node::new(
            NodeId::new(id),
            "localhost",
            6666,
            partitions.iter().copied().map(PartitionId::new),
        )
    }

    #[test]
    fn test_build_sorts_partitions() {
        let cluster = Cluster::new(vec![node(0, &[4, 1]), node(1, &[0, 3]), node(2, &[2])]).unwrap();
        let ring = PartitionRing::build(&cluster).unwrap();

        let partitions: Vec<i32> = ring.partitions().map(PartitionId::get).collect();
        assert_eq!(partitions, vec![0, 1, 2, 3, 4]);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.at(0), Some((PartitionId::new(0), NodeId::new(1))));
        assert_eq!(ring.owner(PartitionId::new(4)), Some(NodeId::new(0)));
        assert_eq!(ring.owner(PartitionId::new(9)), None);
    }

    #[test]
    fn test_overlapping_partitions_rejected() {
        let cluster = Cluster::new(vec![node(0, &[0, 1]), node(1, &[1, 2])]).unwrap();
        let err = PartitionRing::build(&cluster).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_partition_gap_rejected() {
        let cluster = Cluster::new(vec![node(0, &[0, 1]), node(1, &[3, 4])]).unwrap();
        let err = PartitionRing::build(&cluster).unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");

        let offset = Cluster::new(vec![node(0, &[1, 2])]).unwrap();
        assert!(PartitionRing::build(&offset).is_err());
    }

    #[test]
    fn test_empty_ring_rejected() {
        let cluster = Cluster::new(vec![node(0, &[])]).unwrap();
        assert!(PartitionRing::build(&cluster).is_err());
    }
}
