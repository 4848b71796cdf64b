//! Vector-clock versioning.
//!
//! Clocks are immutable values: `increment` returns a new clock and leaves
//! the receiver untouched.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::debug;

use crate::types::NodeId;

/// One `(node, counter)` pair of a vector clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEntry {
    /// Node that performed the writes.
    pub node_id: NodeId,
    /// Number of writes coordinated by that node.
    pub version: i64,
}

/// A vector clock: at most one counter per node, plus a wall-clock timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorClock {
    entries: Vec<ClockEntry>,
    timestamp: i64,
}

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            timestamp: 0,
        }
    }

    /// Builds a clock from decoded entries.
    ///
    /// Entries repeating a node id are merged by keeping the larger counter,
    /// so the one-entry-per-node invariant holds for anything read off the wire.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = ClockEntry>, timestamp: i64) -> Self {
        let mut clock = Self {
            entries: Vec::new(),
            timestamp,
        };
        for entry in entries {
            match clock.entries.iter_mut().find(|e| e.node_id == entry.node_id) {
                Some(existing) => existing.version = existing.version.max(entry.version),
                None => clock.entries.push(entry),
            }
        }
        clock
    }

    /// Returns the entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[ClockEntry] {
        &self.entries
    }

    /// Returns the counter for `node_id`, if present.
    #[must_use]
    pub fn version_of(&self, node_id: NodeId) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.node_id == node_id)
            .map(|e| e.version)
    }

    /// Returns the wall-clock timestamp in milliseconds since the epoch.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns true if the clock has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a copy of this clock with `node_id`'s counter bumped and the
    /// timestamp set to now.
    #[must_use]
    pub fn increment(&self, node_id: NodeId) -> Self {
        self.increment_at(node_id, now_ms())
    }

    /// Like [`increment`](Self::increment) with an explicit timestamp.
    #[must_use]
    pub fn increment_at(&self, node_id: NodeId, timestamp_ms: i64) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.iter_mut().find(|e| e.node_id == node_id) {
            debug!(node_id = node_id.get(), "incrementing clock entry");
            entry.version += 1;
        } else {
            debug!(node_id = node_id.get(), "adding clock entry");
            next.entries.push(ClockEntry {
                node_id,
                version: 1,
            });
        }
        next.timestamp = timestamp_ms;
        next
    }
}

/// Increments `clock` for `node_id`, starting from an empty clock when the
/// key has no current version.
#[must_use]
pub fn increment(clock: Option<&VectorClock>, node_id: NodeId) -> VectorClock {
    clock.map_or_else(VectorClock::new, Clone::clone).increment(node_id)
}

/// A value paired with its version.
///
/// The wire layer works on `Versioned<Bytes>`; typed views decode the value
/// into a caller type with [`Versioned::try_map`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<V = Bytes> {
    /// The value.
    pub value: V,
    /// The value's version.
    pub version: VectorClock,
}

impl<V> Versioned<V> {
    /// Pairs an already typed value with a version.
    #[must_use]
    pub const fn typed(value: V, version: VectorClock) -> Self {
        Self { value, version }
    }

    /// Converts the value, keeping the version.
    ///
    /// # Errors
    /// Returns the conversion's error.
    pub fn try_map<U, E>(
        self,
        f: impl FnOnce(V) -> std::result::Result<U, E>,
    ) -> std::result::Result<Versioned<U>, E> {
        Ok(Versioned {
            value: f(self.value)?,
            version: self.version,
        })
    }
}

impl Versioned {
    /// Pairs a value with a version.
    ///
    /// After a put this is a local echo of what the client believes was
    /// committed, not a read-back from the server.
    #[must_use]
    pub fn new(value: impl Into<Bytes>, version: VectorClock) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}

/// Chooses one version among the siblings returned for a key.
pub trait ConflictResolver: Send + Sync {
    /// Resolves `versions` to a single member, or `None` for an empty list.
    fn resolve(&self, versions: Vec<Versioned>) -> Option<Versioned>;
}

/// Picks the version with the greatest timestamp.
///
/// This is a last-writer-wins heuristic, not causal dominance. On equal
/// timestamps the version scanned last wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, versions: Vec<Versioned>) -> Option<Versioned> {
        versions.into_iter().max_by_key(|v| v.version.timestamp())
    }
}

impl<F> ConflictResolver for F
where
    F: Fn(Vec<Versioned>) -> Option<Versioned> + Send + Sync,
{
    fn resolve(&self, versions: Vec<Versioned>) -> Option<Versioned> {
        self(versions)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(i32, i64)], timestamp: i64) -> VectorClock {
        VectorClock::from_entries(
            entries.iter().map(|&(node, version)| ClockEntry {
                node_id: NodeId::new(node),
                version,
            }),
            timestamp,
        )
    }

    #[test]
    fn test_increment_new_entry() {
        let next = increment(None, NodeId::new(3));
        assert_eq!(next.entries().len(), 1);
        assert_eq!(next.version_of(NodeId::new(3)), Some(1));
        assert!(next.timestamp() > 0);
    }

    #[test]
    fn test_increment_existing_entry() {
        let base = clock(&[(1, 4), (2, 7)], 10);
        let next = base.increment_at(NodeId::new(2), 20);

        assert_eq!(next.version_of(NodeId::new(1)), Some(4));
        assert_eq!(next.version_of(NodeId::new(2)), Some(8));
        assert_eq!(next.entries().len(), 2);
        assert_eq!(next.timestamp(), 20);
    }

    #[test]
    fn test_increment_does_not_mutate_argument() {
        let base = clock(&[(1, 1)], 10);
        let snapshot = base.clone();

        let next = increment(Some(&base), NodeId::new(1));
        let other = increment(Some(&base), NodeId::new(9));

        assert_eq!(base, snapshot);
        assert_eq!(next.version_of(NodeId::new(1)), Some(2));
        assert_eq!(other.version_of(NodeId::new(9)), Some(1));
        assert_eq!(other.version_of(NodeId::new(1)), Some(1));
    }

    #[test]
    fn test_increment_always_refreshes_timestamp() {
        let base = clock(&[(1, 1)], 5);
        assert_eq!(base.increment_at(NodeId::new(1), 99).timestamp(), 99);
        assert_eq!(base.increment_at(NodeId::new(2), 77).timestamp(), 77);
    }

    #[test]
    fn test_from_entries_merges_duplicate_nodes() {
        let merged = clock(&[(1, 3), (1, 5), (2, 1)], 0);
        assert_eq!(merged.entries().len(), 2);
        assert_eq!(merged.version_of(NodeId::new(1)), Some(5));
    }

    #[test]
    fn test_last_write_wins_picks_newest() {
        let old = Versioned::new("old", clock(&[(1, 1)], 100));
        let new = Versioned::new("new", clock(&[(2, 1)], 200));
        let mid = Versioned::new("mid", clock(&[(3, 1)], 150));

        let winner = LastWriteWins.resolve(vec![old, new.clone(), mid]).unwrap();
        assert_eq!(winner, new);
    }

    #[test]
    fn test_last_write_wins_singleton_and_empty() {
        let only = Versioned::new("only", clock(&[(1, 1)], 1));
        assert_eq!(LastWriteWins.resolve(vec![only.clone()]), Some(only));
        assert_eq!(LastWriteWins.resolve(Vec::new()), None);
    }

    #[test]
    fn test_last_write_wins_tie_takes_last_scanned() {
        let first = Versioned::new("first", clock(&[(1, 1)], 100));
        let second = Versioned::new("second", clock(&[(2, 1)], 100));

        let winner = LastWriteWins.resolve(vec![first, second.clone()]).unwrap();
        assert_eq!(winner, second);
    }

    #[test]
    fn test_try_map_keeps_version() {
        let stored = Versioned::new("42", clock(&[(1, 3)], 7));
        let parsed = stored
            .clone()
            .try_map(|value| std::str::from_utf8(&value).map(str::to_owned))
            .unwrap();
        assert_eq!(parsed.value, "42");
        assert_eq!(parsed.version, stored.version);

        let invalid = Versioned::new(vec![0xffu8], VectorClock::new());
        assert!(invalid
            .try_map(|value| String::from_utf8(value.to_vec()))
            .is_err());
    }

    #[test]
    fn test_closure_resolver() {
        let first_wins = |mut versions: Vec<Versioned>| {
            if versions.is_empty() {
                None
            } else {
                Some(versions.swap_remove(0))
            }
        };
        let a = Versioned::new("a", clock(&[(1, 1)], 1));
        let b = Versioned::new("b", clock(&[(1, 2)], 2));
        assert_eq!(first_wins.resolve(vec![a.clone(), b]), Some(a));
    }
}
