//! Partition assignment of table keys to server nodes.
//!
//! Built once per table from the cluster node list; the assignment
//! never changes afterwards (no live rebalancing). Every node computes
//! the same split without communication.

use crate::core::{Error, Key, NodeId, Result, TableId};
use std::collections::BTreeMap;

/// Deterministic key-to-node assignment for one table.
///
/// The set of schemes is closed: `Range` divides a bounded contiguous
/// key domain (dense storage), `Hash` spreads an unbounded domain by
/// modulo (sparse storage).
#[derive(Clone, Debug)]
pub enum PartitionManager {
    /// Contiguous division of `[0, capacity)` across the server list.
    Range {
        table: TableId,
        capacity: Key,
        servers: Vec<NodeId>,
    },
    /// `key % servers.len()` indexes into the server list.
    Hash {
        table: TableId,
        servers: Vec<NodeId>,
    },
}

impl PartitionManager {
    /// Build a range partition over `[0, capacity)`.
    pub fn range(table: TableId, capacity: Key, servers: Vec<NodeId>) -> Self {
        assert!(!servers.is_empty(), "partition requires at least one server");
        Self::Range {
            table,
            capacity,
            servers,
        }
    }

    /// Build a modulo-hash partition.
    pub fn hash(table: TableId, servers: Vec<NodeId>) -> Self {
        assert!(!servers.is_empty(), "partition requires at least one server");
        Self::Hash { table, servers }
    }

    /// Server nodes participating in this table.
    pub fn servers(&self) -> &[NodeId] {
        match self {
            Self::Range { servers, .. } | Self::Hash { servers, .. } => servers,
        }
    }

    /// Owning node of a single key.
    pub fn owner(&self, key: Key) -> Result<NodeId> {
        match self {
            Self::Range {
                table,
                capacity,
                servers,
            } => {
                if key >= *capacity {
                    return Err(Error::KeyOutOfRange {
                        table: *table,
                        key,
                        capacity: *capacity,
                    });
                }
                // Ceil division so the last server takes the remainder.
                let per_server = capacity.div_ceil(servers.len() as Key);
                Ok(servers[(key / per_server) as usize])
            }
            Self::Hash { servers, .. } => Ok(servers[(key % servers.len() as Key) as usize]),
        }
    }

    /// Bounds of the contiguous interval `node` owns, as `(base, len)`.
    ///
    /// `None` for hash partitions (no contiguous shard) or for nodes
    /// outside the server list. Shares the split math with [`owner`],
    /// so server shards and client routing can never disagree.
    ///
    /// [`owner`]: PartitionManager::owner
    pub fn dense_shard(&self, node: NodeId) -> Option<(Key, usize)> {
        match self {
            Self::Range {
                capacity, servers, ..
            } => {
                let idx = servers.iter().position(|&s| s == node)? as Key;
                let per_server = capacity.div_ceil(servers.len() as Key);
                let base = idx * per_server;
                let len = capacity.saturating_sub(base).min(per_server);
                Some((base, len as usize))
            }
            Self::Hash { .. } => None,
        }
    }

    /// Split an ordered key batch into per-node index lists.
    ///
    /// Returns, for each touched node, the indices into `keys` it owns.
    /// Indices let the caller slice an aligned delta sequence the same
    /// way. The union over nodes is exactly `0..keys.len()`.
    pub fn resolve(&self, keys: &[Key]) -> Result<BTreeMap<NodeId, Vec<usize>>> {
        let mut split: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
        for (idx, &key) in keys.iter().enumerate() {
            split.entry(self.owner(key)?).or_default().push(idx);
        }
        Ok(split)
    }
}
